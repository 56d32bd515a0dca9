use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::{info, info_span, warn};
use uuid::Uuid;

use crate::basin;
use crate::binning::bin_max_wind;
use crate::config::RunConfig;
use crate::error::{DataGap, PipelineError};
use crate::geojson::{ensemble_collection, mean_collection};
use crate::mirror::{self, MirrorManifest, MirrorRequest, MirrorSlot, SlotSource};
use crate::models::{Storm, StormId};
use crate::render::{ColorSpec, Renderer, STRIKE_PALETTE};
use crate::report;
use crate::source::ForecastSource;
use crate::strike::{strike_probability, windowed_products, RasterStats};
use crate::tracks::{ensemble_tracks, mean_of_tracks};

/// Cycle progression. `NoData` and `NoBasinMatch` skip storm processing
/// and go straight to a placeholder-only mirror update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CycleState {
    NoData,
    NoBasinMatch,
    PerStormProcessed,
    MirrorUpdated,
}

impl CycleState {
    fn subtitle(self, base: &str) -> String {
        match self {
            CycleState::NoData => format!("{base} (no storm in feed)"),
            CycleState::NoBasinMatch => format!("{base} (no system in basin)"),
            CycleState::PerStormProcessed | CycleState::MirrorUpdated => base.to_string(),
        }
    }
}

/// Files written per storm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    EnsembleTracks,
    MeanTrack,
    StrikeProbabilityRaster,
    StrikeProbabilityImage,
    StrikeWindows,
    EnsembleOverviewImage,
    MaxWindImage,
}

impl ArtifactKind {
    pub fn file_name(self) -> &'static str {
        match self {
            ArtifactKind::EnsembleTracks => "ensemble_tracks.geojson",
            ArtifactKind::MeanTrack => "mean_track.geojson",
            ArtifactKind::StrikeProbabilityRaster => "strike_probability.json",
            ArtifactKind::StrikeProbabilityImage => "strike_probability.png",
            ArtifactKind::StrikeWindows => "strike_windows.json",
            ArtifactKind::EnsembleOverviewImage => "ensemble_tracks.png",
            ArtifactKind::MaxWindImage => "max_wind.png",
        }
    }
}

#[derive(Debug, Clone)]
pub struct StormReport {
    pub id: StormId,
    pub sample_count: usize,
    pub member_count: usize,
    pub mean_track_len: usize,
    pub peak_wind_ms: Option<f64>,
    pub strike_stats: Option<RasterStats>,
    /// `(window label, domain maximum)` pairs.
    pub window_maxima: Vec<(String, Option<f32>)>,
    pub artifacts: BTreeMap<ArtifactKind, PathBuf>,
    pub gaps: Vec<DataGap>,
}

#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub run_id: Uuid,
    pub run_date: NaiveDateTime,
    pub cycle_start: NaiveDateTime,
    pub states: Vec<CycleState>,
    pub subtitle: String,
    pub storms: Vec<StormReport>,
    pub primary: Option<StormId>,
    pub mirror: BTreeMap<MirrorSlot, SlotSource>,
}

impl CycleOutcome {
    /// The state reached before the mirror update.
    pub fn terminal_data_state(&self) -> CycleState {
        self.states
            .iter()
            .copied()
            .find(|s| *s != CycleState::MirrorUpdated)
            .unwrap_or(CycleState::MirrorUpdated)
    }
}

/// Runs one forecast cycle end to end.
///
/// Acquisition failures and I/O errors on the output tree abort the cycle
/// before the mirror is touched; everything else degrades to placeholders.
pub fn run_cycle(
    config: &RunConfig,
    source: &dyn ForecastSource,
    renderer: &dyn Renderer,
) -> Result<CycleOutcome, PipelineError> {
    let run_id = Uuid::new_v4();
    let _span = info_span!("cycle", run = %config.run_date.format("%Y-%m-%d %H")).entered();
    info!(%run_id, "starting cycle");

    let cycle_start = source.fetch_cycle(config.run_date)?;
    let samples = basin::validate(source.load_samples(cycle_start)?)?;
    let base_subtitle = format!("Run ECMWF : {}", cycle_start.format("%Y-%m-%d"));

    let cycle_dir = config.layout.cycle_dir(config.run_date);
    fs::create_dir_all(&cycle_dir).map_err(|err| PipelineError::io(&cycle_dir, err))?;

    let mut states = Vec::new();
    let mut storms = Vec::new();

    if samples.is_empty() {
        info!("no storm in the forecast feed");
        states.push(CycleState::NoData);
    } else {
        let kept = basin::filter(&samples, &config.basin, config.id_ordering);
        if kept.is_empty() {
            info!(total = samples.len(), "no system tracked inside the basin");
            states.push(CycleState::NoBasinMatch);
        } else {
            let ids = basin::storm_ids(&kept, config.id_ordering);
            info!(storms = ?ids.iter().map(StormId::as_str).collect::<Vec<_>>(), "systems identified");
            for storm in basin::group_storms(kept, config.id_ordering) {
                storms.push(process_storm(config, &storm, renderer)?);
            }
            states.push(CycleState::PerStormProcessed);
        }
    }

    let data_state = states[0];
    let subtitle = data_state.subtitle(&base_subtitle);
    // lowest identifier wins, regardless of intensity
    let primary = storms.first();
    let request = MirrorRequest {
        primary: primary.map(|report| (&report.id, &report.artifacts)),
        message: &config.placeholder_message,
        subtitle: &subtitle,
    };
    let latest_dir = config.layout.latest_dir();
    let mirror = mirror::update_mirror(&latest_dir, &request, renderer)?;
    states.push(CycleState::MirrorUpdated);

    let outcome = CycleOutcome {
        run_id,
        run_date: config.run_date,
        cycle_start,
        states,
        subtitle,
        primary: primary.map(|report| report.id.clone()),
        storms,
        mirror,
    };

    mirror::write_manifest(
        &latest_dir,
        &MirrorManifest {
            run_id,
            run_date: outcome.run_date,
            cycle_start,
            state: data_state,
            primary_storm: outcome.primary.clone(),
            subtitle: outcome.subtitle.clone(),
            slots: outcome.mirror.clone(),
        },
    )?;
    mirror::write_atomic(
        &cycle_dir.join("summary.md"),
        report::build_summary(&outcome).as_bytes(),
    )?;

    info!(state = ?data_state, latest = %latest_dir.display(), "cycle complete");
    Ok(outcome)
}

/// Writes every artifact of one storm into its own directory. Data gaps
/// are recorded and skip only the affected artifact.
pub fn process_storm(
    config: &RunConfig,
    storm: &Storm,
    renderer: &dyn Renderer,
) -> Result<StormReport, PipelineError> {
    let _span = info_span!("storm", id = %storm.id).entered();
    let dir = config.layout.storm_dir(config.run_date, &storm.id);
    fs::create_dir_all(&dir).map_err(|err| PipelineError::io(&dir, err))?;
    info!(samples = storm.samples.len(), "processing storm");

    let mut report = StormReport {
        id: storm.id.clone(),
        sample_count: storm.samples.len(),
        member_count: storm.member_count(),
        mean_track_len: 0,
        peak_wind_ms: storm.peak_wind(),
        strike_stats: None,
        window_maxima: Vec::new(),
        artifacts: BTreeMap::new(),
        gaps: Vec::new(),
    };

    let tracks = ensemble_tracks(&storm.samples);
    if tracks.is_empty() {
        warn!("no member trajectory, skipping storm artifacts");
        report.gaps.push(DataGap::NoTracks);
        return Ok(report);
    }
    let mean = mean_of_tracks(&tracks);
    report.mean_track_len = mean.len();

    let mut artifacts = ArtifactWriter::new(&dir, &mut report);
    artifacts.json(ArtifactKind::EnsembleTracks, &ensemble_collection(&tracks))?;
    artifacts.json(ArtifactKind::MeanTrack, &mean_collection(&mean))?;

    let strike = strike_probability(&tracks, &config.basin, &config.strike);
    artifacts.json(ArtifactKind::StrikeProbabilityRaster, &strike)?;
    artifacts.report.strike_stats = Some(strike.stats());
    if strike.has_signal() {
        let image = renderer.render_raster(
            &strike.masked(),
            ColorSpec::Classified(&STRIKE_PALETTE),
            "5-day cyclogenesis - South-West Indian Ocean",
        );
        artifacts.image(ArtifactKind::StrikeProbabilityImage, image)?;
    } else {
        artifacts.gap(ArtifactKind::StrikeProbabilityImage, DataGap::NoStrikeSignal)?;
    }

    let windows = windowed_products(&tracks, &config.basin, &config.strike);
    artifacts.report.window_maxima = windows
        .windows
        .iter()
        .map(|w| (w.label.clone(), w.domain_max_percent))
        .collect();
    artifacts.json(ArtifactKind::StrikeWindows, &windows)?;

    let overview = renderer.render_track_overview(
        &tracks,
        &mean,
        &format!("ECMWF ensembles - system {}", storm.id),
    );
    artifacts.image(ArtifactKind::EnsembleOverviewImage, overview)?;

    match bin_max_wind(&storm.samples, &config.basin, &config.binning) {
        Ok(grid) => {
            info!(
                cells = grid.data_cells(),
                dropped = grid.dropped,
                max_wind_ms = ?grid.max_value(),
                "max wind grid binned"
            );
            let image = renderer.render_raster(
                &grid.to_raster(),
                ColorSpec::Gradient(colorous::YELLOW_ORANGE_RED),
                &format!("Max wind (m/s) - system {}", storm.id),
            );
            artifacts.image(ArtifactKind::MaxWindImage, image)?;
        }
        Err(gap) => artifacts.gap(ArtifactKind::MaxWindImage, gap)?,
    }

    info!(
        artifacts = report.artifacts.len(),
        gaps = report.gaps.len(),
        dir = %dir.display(),
        "storm artifacts written"
    );
    Ok(report)
}

struct ArtifactWriter<'a> {
    dir: &'a Path,
    report: &'a mut StormReport,
}

impl<'a> ArtifactWriter<'a> {
    fn new(dir: &'a Path, report: &'a mut StormReport) -> Self {
        ArtifactWriter { dir, report }
    }

    fn write(&mut self, kind: ArtifactKind, bytes: &[u8]) -> Result<(), PipelineError> {
        let path = self.dir.join(kind.file_name());
        mirror::write_atomic(&path, bytes)?;
        self.report.artifacts.insert(kind, path);
        Ok(())
    }

    fn json<T: Serialize>(&mut self, kind: ArtifactKind, value: &T) -> Result<(), PipelineError> {
        let bytes = serde_json::to_vec(value)?;
        self.write(kind, &bytes)
    }

    fn image(
        &mut self,
        kind: ArtifactKind,
        rendered: Result<Vec<u8>, crate::error::RenderError>,
    ) -> Result<(), PipelineError> {
        match rendered {
            Ok(bytes) => self.write(kind, &bytes),
            Err(err) => {
                warn!(artifact = kind.file_name(), %err, "rendering failed");
                self.gap(kind, DataGap::RenderFailed(kind.file_name()))
            }
        }
    }

    /// Records a gap and removes any copy left by an earlier run of the same cycle.
    fn gap(&mut self, kind: ArtifactKind, gap: DataGap) -> Result<(), PipelineError> {
        warn!(artifact = kind.file_name(), %gap, "artifact skipped");
        let stale = self.dir.join(kind.file_name());
        if stale.exists() {
            fs::remove_file(&stale).map_err(|err| PipelineError::io(&stale, err))?;
        }
        self.report.gaps.push(gap);
        Ok(())
    }
}
