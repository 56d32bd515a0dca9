use std::fmt;

use chrono::NaiveDateTime;
use serde::Serialize;

/// Storm identifier as issued by the forecast feed.
///
/// The derived ordering is the natural string ordering; the basin filter
/// applies an explicit [`crate::basin::IdOrdering`] policy on top of it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct StormId(String);

impl StormId {
    pub fn new(raw: impl Into<String>) -> Self {
        StormId(raw.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StormId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One ensemble-member observation, validated at the basin filter boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastSample {
    pub storm_id: StormId,
    pub member_id: i32,
    pub time: NaiveDateTime,
    /// Forecast step in hours ahead of the cycle start.
    pub lead_hours: u32,
    pub latitude: f64,
    pub longitude: f64,
    pub pressure_hpa: Option<f64>,
    pub wind_speed_ms: Option<f64>,
}

/// One member's track, index-aligned across all parallel sequences.
#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory {
    pub member_id: i32,
    /// `(latitude, longitude)` pairs.
    pub positions: Vec<(f64, f64)>,
    pub times: Vec<NaiveDateTime>,
    pub lead_hours: Vec<u32>,
    pub pressures_hpa: Vec<Option<f64>>,
    pub winds_ms: Vec<Option<f64>>,
}

impl Trajectory {
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// Percentile levels reported for pressure and wind along the mean track.
pub const PERCENTILE_LEVELS: [f64; 5] = [10.0, 25.0, 50.0, 75.0, 90.0];

/// Values at [`PERCENTILE_LEVELS`], non-decreasing by construction.
pub type PercentileSet = [f64; PERCENTILE_LEVELS.len()];

/// Central estimate of a storm's track with per-step spread.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeanTrajectory {
    pub positions: Vec<(f64, f64)>,
    pub times: Vec<NaiveDateTime>,
    pub lead_hours: Vec<u32>,
    /// Number of members contributing at each index.
    pub contributors: Vec<usize>,
    /// `None` where no contributor reported a pressure.
    pub pressure_percentiles: Vec<Option<PercentileSet>>,
    pub wind_percentiles: Vec<Option<PercentileSet>>,
}

impl MeanTrajectory {
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// Geographic extent of a gridded product, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bounds {
    pub west: f64,
    pub east: f64,
    pub south: f64,
    pub north: f64,
}

/// A north-up field ready for rendering; row 0 is the northernmost row and
/// `None` cells are drawn transparent.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterField {
    pub rows: usize,
    pub cols: usize,
    pub cells: Vec<Option<f32>>,
    pub bounds: Bounds,
}

impl RasterField {
    /// Smallest and largest value among cells that hold data.
    pub fn value_range(&self) -> Option<(f32, f32)> {
        self.cells.iter().flatten().fold(None, |acc, &v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
    }
}

/// A storm and the basin-filtered samples sharing its identifier.
#[derive(Debug, Clone)]
pub struct Storm {
    pub id: StormId,
    pub samples: Vec<ForecastSample>,
}

impl Storm {
    pub fn member_count(&self) -> usize {
        let mut members: Vec<i32> = self.samples.iter().map(|s| s.member_id).collect();
        members.sort_unstable();
        members.dedup();
        members.len()
    }

    pub fn peak_wind(&self) -> Option<f64> {
        self.samples
            .iter()
            .filter_map(|s| s.wind_speed_ms)
            .filter(|w| w.is_finite())
            .fold(None, |acc: Option<f64>, w| Some(acc.map_or(w, |a| a.max(w))))
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::sample;
    use super::*;

    #[test]
    fn storm_id_trims_feed_padding() {
        assert_eq!(StormId::new(" 71 ").as_str(), "71");
    }

    #[test]
    fn storm_counts_distinct_members_and_peak_wind() {
        let storm = Storm {
            id: StormId::new("71"),
            samples: vec![
                sample("71", 1, 0, -12.0, 55.0, Some(18.0)),
                sample("71", 1, 6, -12.5, 54.5, Some(22.0)),
                sample("71", 2, 0, -12.1, 55.2, None),
            ],
        };
        assert_eq!(storm.member_count(), 2);
        assert_eq!(storm.peak_wind(), Some(22.0));
    }
}
