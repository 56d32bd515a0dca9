use std::path::{Path, PathBuf};

use chrono::{Duration, NaiveDateTime};
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::PipelineError;

/// One row as delivered by the acquisition layer; nothing is guaranteed present.
#[derive(Debug, Clone, Deserialize)]
pub struct RawSample {
    pub storm_id: Option<String>,
    pub member: Option<i32>,
    pub time: Option<String>,
    pub lead_hours: Option<u32>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub pressure_hpa: Option<f64>,
    pub wind_speed_ms: Option<f64>,
}

/// The forecast-data collaborator.
pub trait ForecastSource {
    /// Resolves the cycle actually available for `run_date`.
    fn fetch_cycle(&self, run_date: NaiveDateTime) -> Result<NaiveDateTime, PipelineError>;

    /// Loads every sample of `cycle_start`, possibly none.
    fn load_samples(&self, cycle_start: NaiveDateTime) -> Result<Vec<RawSample>, PipelineError>;
}

const CYCLE_SPACING_HOURS: i64 = 12;

/// Decoded cycles stored as `tracks/tracks_<YYYYMMDDHH>.csv` under a data directory.
#[derive(Debug, Clone)]
pub struct CsvArchive {
    tracks_dir: PathBuf,
    lookback_cycles: u32,
}

impl CsvArchive {
    pub fn new(data_dir: &Path, lookback_cycles: u32) -> Self {
        CsvArchive {
            tracks_dir: data_dir.join("tracks"),
            lookback_cycles,
        }
    }

    pub fn cycle_path(&self, cycle_start: NaiveDateTime) -> PathBuf {
        self.tracks_dir
            .join(format!("tracks_{}.csv", cycle_start.format("%Y%m%d%H")))
    }
}

impl ForecastSource for CsvArchive {
    fn fetch_cycle(&self, run_date: NaiveDateTime) -> Result<NaiveDateTime, PipelineError> {
        for step in 0..=i64::from(self.lookback_cycles) {
            let candidate = run_date - Duration::hours(step * CYCLE_SPACING_HOURS);
            let path = self.cycle_path(candidate);
            if path.is_file() {
                if step > 0 {
                    info!(
                        requested = %run_date,
                        used = %candidate,
                        "requested cycle unavailable, falling back"
                    );
                }
                return Ok(candidate);
            }
            debug!(path = %path.display(), "cycle file not found");
        }

        Err(PipelineError::Acquisition(format!(
            "no cycle at or up to {} cycles before {} under {}",
            self.lookback_cycles,
            run_date,
            self.tracks_dir.display()
        )))
    }

    fn load_samples(&self, cycle_start: NaiveDateTime) -> Result<Vec<RawSample>, PipelineError> {
        read_samples_csv(&self.cycle_path(cycle_start))
    }
}

pub fn read_samples_csv(path: &Path) -> Result<Vec<RawSample>, PipelineError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|err| PipelineError::Acquisition(format!("{}: {err}", path.display())))?;

    let mut rows = Vec::new();
    for result in reader.deserialize::<RawSample>() {
        let row = result.map_err(|err| {
            PipelineError::Acquisition(format!("{}: undecodable row: {err}", path.display()))
        })?;
        rows.push(row);
    }

    info!(path = %path.display(), rows = rows.len(), "samples loaded");
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::cycle_start;

    const HEADER: &str =
        "storm_id,member,time,lead_hours,latitude,longitude,pressure_hpa,wind_speed_ms\n";

    fn archive_with(files: &[(NaiveDateTime, &str)]) -> (tempfile::TempDir, CsvArchive) {
        let dir = tempfile::tempdir().unwrap();
        let archive = CsvArchive::new(dir.path(), 2);
        std::fs::create_dir_all(dir.path().join("tracks")).unwrap();
        for (cycle, body) in files {
            std::fs::write(archive.cycle_path(*cycle), format!("{HEADER}{body}")).unwrap();
        }
        (dir, archive)
    }

    #[test]
    fn fetch_cycle_prefers_requested_date() {
        let (_dir, archive) = archive_with(&[(cycle_start(), "")]);
        assert_eq!(archive.fetch_cycle(cycle_start()).unwrap(), cycle_start());
    }

    #[test]
    fn fetch_cycle_falls_back_to_previous_cycles() {
        let earlier = cycle_start() - Duration::hours(24);
        let (_dir, archive) = archive_with(&[(earlier, "")]);
        assert_eq!(archive.fetch_cycle(cycle_start()).unwrap(), earlier);
    }

    #[test]
    fn fetch_cycle_fails_beyond_lookback() {
        let too_old = cycle_start() - Duration::hours(36);
        let (_dir, archive) = archive_with(&[(too_old, "")]);
        assert!(matches!(
            archive.fetch_cycle(cycle_start()),
            Err(PipelineError::Acquisition(_))
        ));
    }

    #[test]
    fn load_samples_keeps_blank_scalars_as_missing() {
        let body = "71,1,2025-01-05T00:00:00,0,-12.0,55.0,998.0,\n\
                    71,1,2025-01-05T06:00:00,6,-12.4,54.6,,17.5\n";
        let (_dir, archive) = archive_with(&[(cycle_start(), body)]);
        let rows = archive.load_samples(cycle_start()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].wind_speed_ms, None);
        assert_eq!(rows[1].pressure_hpa, None);
        assert_eq!(rows[1].lead_hours, Some(6));
    }

    #[test]
    fn undecodable_row_is_an_acquisition_failure() {
        let body = "71,1,2025-01-05T00:00:00,six,-12.0,55.0,998.0,15.0\n";
        let (_dir, archive) = archive_with(&[(cycle_start(), body)]);
        let err = archive.load_samples(cycle_start()).unwrap_err();
        assert!(matches!(err, PipelineError::Acquisition(ref msg) if msg.contains("undecodable row")));
    }

    #[test]
    fn header_only_file_yields_no_samples() {
        let (_dir, archive) = archive_with(&[(cycle_start(), "")]);
        assert!(archive.load_samples(cycle_start()).unwrap().is_empty());
    }
}
