use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Utc};

use crate::basin::{BasinRegion, IdOrdering};
use crate::models::StormId;
use crate::strike::StrikeConfig;

pub const PLACEHOLDER_MESSAGE: &str =
    "No suspected system\nfor the next 5 days\nin the South-West Indian Ocean";

/// Where a cycle writes its artifacts.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    pub root: PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        OutputLayout { root: root.into() }
    }

    pub fn cycle_dir(&self, run_date: NaiveDateTime) -> PathBuf {
        self.root.join(run_date.format("%Y%m%d").to_string())
    }

    pub fn storm_dir(&self, run_date: NaiveDateTime, storm: &StormId) -> PathBuf {
        self.cycle_dir(run_date).join(format!("storm_{storm}"))
    }

    pub fn latest_dir(&self) -> PathBuf {
        self.root.join("latest")
    }
}

/// Spatial binning parameters for the max-wind heatmap.
#[derive(Debug, Clone, Copy)]
pub struct BinningConfig {
    pub cell_deg: f64,
    pub margin_deg: f64,
}

impl Default for BinningConfig {
    fn default() -> Self {
        BinningConfig {
            cell_deg: 1.0,
            margin_deg: 2.0,
        }
    }
}

/// Everything one cycle needs, passed explicitly through the pipeline.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub layout: OutputLayout,
    pub data_dir: PathBuf,
    pub run_date: NaiveDateTime,
    pub basin: BasinRegion,
    pub id_ordering: IdOrdering,
    pub binning: BinningConfig,
    pub strike: StrikeConfig,
    pub lookback_cycles: u32,
    pub placeholder_message: String,
}

impl RunConfig {
    pub fn new(output_root: &Path, data_dir: &Path, run_date: NaiveDateTime) -> Self {
        RunConfig {
            layout: OutputLayout::new(output_root),
            data_dir: data_dir.to_path_buf(),
            run_date,
            basin: BasinRegion::south_west_indian_ocean(),
            id_ordering: IdOrdering::default(),
            binning: BinningConfig::default(),
            strike: StrikeConfig::default(),
            lookback_cycles: 4,
            placeholder_message: PLACEHOLDER_MESSAGE.to_string(),
        }
    }
}

/// Explicit run date at the cycle hour, or today's UTC date at that hour.
pub fn resolve_run_date(explicit: Option<NaiveDate>, cycle_hour: u32) -> NaiveDateTime {
    let date = explicit.unwrap_or_else(|| Utc::now().date_naive());
    let hour = NaiveTime::from_hms_opt(cycle_hour.min(23), 0, 0).unwrap_or(NaiveTime::MIN);
    date.and_time(hour)
}

pub fn parse_run_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y%m%d")
        .map_err(|err| format!("expected YYYYMMDD, got `{raw}`: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn explicit_run_date_lands_on_cycle_hour() {
        let date = parse_run_date("20250105").unwrap();
        let run = resolve_run_date(Some(date), 12);
        assert_eq!(run.date(), date);
        assert_eq!(run.hour(), 12);
    }

    #[test]
    fn default_run_date_is_today_utc() {
        let before = Utc::now().date_naive();
        let run = resolve_run_date(None, 0);
        let after = Utc::now().date_naive();
        assert!(run.date() == before || run.date() == after);
        assert_eq!(run.hour(), 0);
    }

    #[test]
    fn rejects_malformed_run_date() {
        assert!(parse_run_date("2025-01-05").is_err());
    }

    #[test]
    fn layout_scopes_storms_under_cycle_day() {
        let layout = OutputLayout::new("out");
        let run = resolve_run_date(parse_run_date("20250105").ok(), 0);
        assert_eq!(
            layout.storm_dir(run, &StormId::new("71")),
            PathBuf::from("out/20250105/storm_71")
        );
        assert_eq!(layout.latest_dir(), PathBuf::from("out/latest"));
    }
}
