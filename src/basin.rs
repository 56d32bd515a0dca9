use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use tracing::debug;

use crate::error::PipelineError;
use crate::models::{ForecastSample, Storm, StormId};
use crate::source::RawSample;

/// Geographic rectangle of interest plus the spurious-identifier cutoff.
#[derive(Debug, Clone, PartialEq)]
pub struct BasinRegion {
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
    pub min_storm_id: StormId,
}

impl BasinRegion {
    /// East Africa to Australia, equator to 60°S.
    pub fn south_west_indian_ocean() -> Self {
        BasinRegion {
            lat_min: -60.0,
            lat_max: 0.0,
            lon_min: 20.0,
            lon_max: 120.0,
            min_storm_id: StormId::new("70"),
        }
    }

    /// Latitude is exclusive on both ends, longitude inclusive.
    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        latitude > self.lat_min
            && latitude < self.lat_max
            && longitude >= self.lon_min
            && longitude <= self.lon_max
    }
}

/// How storm identifiers are compared against the threshold and sorted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum IdOrdering {
    /// Plain string ordering, as identifiers are issued by the feed.
    #[default]
    Lexicographic,
    /// Integer ordering when both sides parse, string ordering otherwise.
    Numeric,
}

impl IdOrdering {
    pub fn compare(self, a: &StormId, b: &StormId) -> Ordering {
        match self {
            IdOrdering::Lexicographic => a.as_str().cmp(b.as_str()),
            IdOrdering::Numeric => match (a.as_str().parse::<i64>(), b.as_str().parse::<i64>()) {
                (Ok(x), Ok(y)) => x.cmp(&y),
                _ => a.as_str().cmp(b.as_str()),
            },
        }
    }

    pub fn admits(self, id: &StormId, threshold: &StormId) -> bool {
        self.compare(id, threshold) != Ordering::Less
    }
}

/// Validates acquisition rows into typed samples, failing on the first row
/// that lacks a required field.
pub fn validate(rows: Vec<RawSample>) -> Result<Vec<ForecastSample>, PipelineError> {
    rows.into_iter()
        .enumerate()
        .map(|(index, row)| validate_row(index + 1, row))
        .collect()
}

fn validate_row(row: usize, raw: RawSample) -> Result<ForecastSample, PipelineError> {
    let storm_id = raw
        .storm_id
        .filter(|id| !id.trim().is_empty())
        .ok_or(PipelineError::MissingField { row, field: "storm_id" })?;
    let member_id = raw
        .member
        .ok_or(PipelineError::MissingField { row, field: "member" })?;
    let time = raw
        .time
        .ok_or(PipelineError::MissingField { row, field: "time" })?;
    let lead_hours = raw
        .lead_hours
        .ok_or(PipelineError::MissingField { row, field: "lead_hours" })?;
    let latitude = finite(row, "latitude", raw.latitude)?;
    let longitude = finite(row, "longitude", raw.longitude)?;

    Ok(ForecastSample {
        storm_id: StormId::new(storm_id),
        member_id,
        time: parse_time(row, &time)?,
        lead_hours,
        latitude,
        longitude,
        pressure_hpa: raw.pressure_hpa.filter(|p| p.is_finite()),
        wind_speed_ms: raw.wind_speed_ms.filter(|w| w.is_finite()),
    })
}

fn finite(row: usize, field: &'static str, value: Option<f64>) -> Result<f64, PipelineError> {
    match value {
        None => Err(PipelineError::MissingField { row, field }),
        Some(v) if !v.is_finite() => Err(PipelineError::InvalidField {
            row,
            field,
            reason: format!("{v} is not finite"),
        }),
        Some(v) => Ok(v),
    }
}

fn parse_time(row: usize, raw: &str) -> Result<NaiveDateTime, PipelineError> {
    let trimmed = raw.trim();
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .ok_or_else(|| PipelineError::InvalidField {
            row,
            field: "time",
            reason: format!("unrecognised timestamp `{trimmed}`"),
        })
}

/// Keeps samples inside the region whose identifier clears the threshold.
pub fn filter(
    samples: &[ForecastSample],
    region: &BasinRegion,
    ordering: IdOrdering,
) -> Vec<ForecastSample> {
    let kept: Vec<ForecastSample> = samples
        .iter()
        .filter(|s| region.contains(s.latitude, s.longitude))
        .filter(|s| ordering.admits(&s.storm_id, &region.min_storm_id))
        .cloned()
        .collect();
    debug!(
        total = samples.len(),
        kept = kept.len(),
        "basin filter applied"
    );
    kept
}

/// Distinct surviving identifiers in processing order.
pub fn storm_ids(samples: &[ForecastSample], ordering: IdOrdering) -> Vec<StormId> {
    let mut ids: Vec<StormId> = samples.iter().map(|s| s.storm_id.clone()).collect();
    ids.sort_by(|a, b| ordering.compare(a, b).then_with(|| a.cmp(b)));
    ids.dedup();
    ids
}

/// Splits filtered samples into storms, ordered by identifier.
pub fn group_storms(samples: Vec<ForecastSample>, ordering: IdOrdering) -> Vec<Storm> {
    let mut by_id: BTreeMap<StormId, Vec<ForecastSample>> = BTreeMap::new();
    for sample in samples {
        by_id.entry(sample.storm_id.clone()).or_default().push(sample);
    }

    let mut storms: Vec<Storm> = by_id
        .into_iter()
        .map(|(id, samples)| Storm { id, samples })
        .collect();
    storms.sort_by(|a, b| ordering.compare(&a.id, &b.id).then_with(|| a.id.cmp(&b.id)));
    storms
}
