//! The always-present `latest` mirror.
//!
//! Every slot is rewritten on every run, either with a copy of the primary
//! storm's artifact or with a placeholder. Writes go through a sibling
//! temporary file and a rename, so a slot is never left truncated.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::models::StormId;
use crate::pipeline::{ArtifactKind, CycleState};
use crate::render::Renderer;

/// Named files that must exist in the mirror after any run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MirrorSlot {
    Cyclogenesis,
    EnsembleTracks,
    MaxWind,
    /// Legacy name kept for older consumers; mirrors the probability map.
    StrikeProbability,
}

impl MirrorSlot {
    pub const ALL: [MirrorSlot; 4] = [
        MirrorSlot::Cyclogenesis,
        MirrorSlot::EnsembleTracks,
        MirrorSlot::MaxWind,
        MirrorSlot::StrikeProbability,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            MirrorSlot::Cyclogenesis => "cyclogenesis.png",
            MirrorSlot::EnsembleTracks => "ensemble_tracks.png",
            MirrorSlot::MaxWind => "max_wind.png",
            MirrorSlot::StrikeProbability => "strike_probability.png",
        }
    }

    /// Per-storm artifact copied into this slot.
    pub fn source(self) -> ArtifactKind {
        match self {
            MirrorSlot::Cyclogenesis | MirrorSlot::StrikeProbability => {
                ArtifactKind::StrikeProbabilityImage
            }
            MirrorSlot::EnsembleTracks => ArtifactKind::EnsembleOverviewImage,
            MirrorSlot::MaxWind => ArtifactKind::MaxWindImage,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SlotSource {
    Copied { from: PathBuf },
    Placeholder,
}

#[derive(Debug, Clone, Serialize)]
pub struct MirrorManifest {
    pub run_id: Uuid,
    pub run_date: NaiveDateTime,
    pub cycle_start: NaiveDateTime,
    pub state: CycleState,
    pub primary_storm: Option<StormId>,
    pub subtitle: String,
    pub slots: BTreeMap<MirrorSlot, SlotSource>,
}

/// What the mirror should reflect for this run.
pub struct MirrorRequest<'a> {
    pub primary: Option<(&'a StormId, &'a BTreeMap<ArtifactKind, PathBuf>)>,
    pub message: &'a str,
    pub subtitle: &'a str,
}

/// Rewrites every slot, slot by slot. Only I/O failures on the mirror
/// directory itself are returned.
pub fn update_mirror(
    latest_dir: &Path,
    request: &MirrorRequest<'_>,
    renderer: &dyn Renderer,
) -> Result<BTreeMap<MirrorSlot, SlotSource>, PipelineError> {
    fs::create_dir_all(latest_dir).map_err(|err| PipelineError::io(latest_dir, err))?;
    info!(
        primary = request.primary.map(|(id, _)| id.as_str()).unwrap_or("none"),
        "updating latest mirror"
    );

    let mut placeholder: Option<Vec<u8>> = None;
    let mut outcome = BTreeMap::new();

    for slot in MirrorSlot::ALL {
        let target = latest_dir.join(slot.file_name());
        let copied = request
            .primary
            .and_then(|(_, artifacts)| artifacts.get(&slot.source()))
            .and_then(|source| match fs::read(source) {
                Ok(bytes) if !bytes.is_empty() => Some((source.clone(), bytes)),
                Ok(_) => {
                    warn!(path = %source.display(), "artifact is empty, using placeholder");
                    None
                }
                Err(err) => {
                    warn!(path = %source.display(), %err, "artifact unreadable, using placeholder");
                    None
                }
            });

        let source = match copied {
            Some((from, bytes)) => {
                write_atomic(&target, &bytes)?;
                SlotSource::Copied { from }
            }
            None => {
                let bytes = match &placeholder {
                    Some(bytes) => bytes.clone(),
                    None => {
                        let bytes = placeholder_bytes(renderer, request.message, request.subtitle);
                        placeholder = Some(bytes.clone());
                        bytes
                    }
                };
                write_atomic(&target, &bytes)?;
                SlotSource::Placeholder
            }
        };
        info!(slot = slot.file_name(), ?source, "mirror slot written");
        outcome.insert(slot, source);
    }

    Ok(outcome)
}

/// Renders the placeholder, falling back to a text body if the renderer
/// fails so the slot is still never empty.
fn placeholder_bytes(renderer: &dyn Renderer, message: &str, subtitle: &str) -> Vec<u8> {
    match renderer.render_placeholder(message, subtitle) {
        Ok(bytes) if !bytes.is_empty() => bytes,
        Ok(_) | Err(_) => {
            warn!("placeholder rendering failed, writing text placeholder");
            format!("{message}\n{subtitle}\n").into_bytes()
        }
    }
}

pub fn write_manifest(latest_dir: &Path, manifest: &MirrorManifest) -> Result<(), PipelineError> {
    let body = serde_json::to_vec_pretty(manifest)?;
    write_atomic(&latest_dir.join("manifest.json"), &body)
}

/// Writes `bytes` to a sibling temporary file, then renames it over `path`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PipelineError> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|err| PipelineError::io(dir, err))?;
    }
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));

    let written = File::create(&tmp).and_then(|mut file| {
        file.write_all(bytes)?;
        file.sync_all()
    });
    if let Err(err) = written {
        discard_tmp(&tmp);
        return Err(PipelineError::io(&tmp, err));
    }
    if let Err(err) = fs::rename(&tmp, path) {
        discard_tmp(&tmp);
        return Err(PipelineError::io(path, err));
    }
    Ok(())
}

fn discard_tmp(tmp: &Path) {
    if let Err(err) = fs::remove_file(tmp) {
        if err.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %tmp.display(), %err, "could not remove temporary file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::PngRenderer;

    fn slot_bytes(dir: &Path, slot: MirrorSlot) -> Vec<u8> {
        fs::read(dir.join(slot.file_name())).unwrap()
    }

    #[test]
    fn no_primary_fills_every_slot_with_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let request = MirrorRequest {
            primary: None,
            message: "No suspected system",
            subtitle: "Run ECMWF : 2025-01-05",
        };
        let outcome = update_mirror(dir.path(), &request, &PngRenderer::default()).unwrap();

        assert_eq!(outcome.len(), 4);
        assert!(outcome.values().all(|s| *s == SlotSource::Placeholder));
        for slot in MirrorSlot::ALL {
            assert!(!slot_bytes(dir.path(), slot).is_empty());
        }
    }

    #[test]
    fn slots_update_independently() {
        let dir = tempfile::tempdir().unwrap();
        let storm_dir = dir.path().join("storm_71");
        fs::create_dir_all(&storm_dir).unwrap();
        let strike = storm_dir.join("strike_probability.png");
        let tracks = storm_dir.join("ensemble_tracks.png");
        fs::write(&strike, b"strike-bytes").unwrap();
        fs::write(&tracks, b"track-bytes").unwrap();

        let artifacts = BTreeMap::from([
            (ArtifactKind::StrikeProbabilityImage, strike.clone()),
            (ArtifactKind::EnsembleOverviewImage, tracks),
        ]);
        let id = StormId::new("71");
        let latest = dir.path().join("latest");
        let request = MirrorRequest {
            primary: Some((&id, &artifacts)),
            message: "No suspected system",
            subtitle: "Run ECMWF : 2025-01-05",
        };
        let outcome = update_mirror(&latest, &request, &PngRenderer::default()).unwrap();

        assert_eq!(slot_bytes(&latest, MirrorSlot::Cyclogenesis), b"strike-bytes");
        assert_eq!(slot_bytes(&latest, MirrorSlot::StrikeProbability), b"strike-bytes");
        assert_eq!(slot_bytes(&latest, MirrorSlot::EnsembleTracks), b"track-bytes");
        assert_eq!(outcome[&MirrorSlot::MaxWind], SlotSource::Placeholder);
        assert_eq!(outcome[&MirrorSlot::Cyclogenesis], SlotSource::Copied { from: strike });
        assert!(!slot_bytes(&latest, MirrorSlot::MaxWind).is_empty());
    }

    #[test]
    fn atomic_write_replaces_content_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slot.png");
        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");
        let names: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn failed_rename_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        // a non-empty directory cannot be replaced by a file
        let target = dir.path().join("slot.png");
        fs::create_dir_all(target.join("occupied")).unwrap();

        assert!(write_atomic(&target, b"bytes").is_err());
        assert!(!dir.path().join(".slot.png.tmp").exists());
        assert!(target.is_dir());
    }
}
