//! LineString feature collections for ensemble and mean tracks.
//!
//! Payloads are built from derived `Serialize` structs so the key order and
//! number formatting are fixed; the same tracks always produce the same bytes.

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::models::{MeanTrajectory, PercentileSet, Trajectory, PERCENTILE_LEVELS};

const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Debug, Serialize)]
pub struct FeatureCollection<P> {
    #[serde(rename = "type")]
    kind: &'static str,
    features: Vec<Feature<P>>,
}

#[derive(Debug, Serialize)]
pub struct Feature<P> {
    #[serde(rename = "type")]
    kind: &'static str,
    geometry: LineString,
    properties: P,
}

#[derive(Debug, Serialize)]
pub struct LineString {
    #[serde(rename = "type")]
    kind: &'static str,
    /// `[longitude, latitude]` pairs.
    coordinates: Vec<[f64; 2]>,
}

impl LineString {
    fn from_positions(positions: &[(f64, f64)]) -> Self {
        LineString {
            kind: "LineString",
            coordinates: positions.iter().map(|&(lat, lon)| [lon, lat]).collect(),
        }
    }
}

fn collection<P>(features: Vec<Feature<P>>) -> FeatureCollection<P> {
    FeatureCollection {
        kind: "FeatureCollection",
        features,
    }
}

fn feature<P>(positions: &[(f64, f64)], properties: P) -> Feature<P> {
    Feature {
        kind: "Feature",
        geometry: LineString::from_positions(positions),
        properties,
    }
}

fn timestamps(times: &[NaiveDateTime]) -> Vec<String> {
    times.iter().map(|t| t.format(TIME_FORMAT).to_string()).collect()
}

#[derive(Debug, Serialize)]
pub struct MemberProperties {
    member: usize,
    member_id: i32,
    timesteps: Vec<String>,
    lead_hours: Vec<u32>,
    pressure_hpa: Vec<Option<f64>>,
    wind_ms: Vec<Option<f64>>,
}

#[derive(Debug, Serialize)]
pub struct MeanProperties {
    member: usize,
    timesteps: Vec<String>,
    lead_hours: Vec<u32>,
    contributors: Vec<usize>,
    percentiles: [f64; PERCENTILE_LEVELS.len()],
    pressure_percentiles_hpa: Vec<Option<PercentileSet>>,
    wind_percentiles_ms: Vec<Option<PercentileSet>>,
}

pub fn ensemble_collection(tracks: &[Trajectory]) -> FeatureCollection<MemberProperties> {
    collection(
        tracks
            .iter()
            .enumerate()
            .map(|(index, track)| {
                feature(
                    &track.positions,
                    MemberProperties {
                        member: index,
                        member_id: track.member_id,
                        timesteps: timestamps(&track.times),
                        lead_hours: track.lead_hours.clone(),
                        pressure_hpa: track.pressures_hpa.clone(),
                        wind_ms: track.winds_ms.clone(),
                    },
                )
            })
            .collect(),
    )
}

pub fn mean_collection(mean: &MeanTrajectory) -> FeatureCollection<MeanProperties> {
    collection(vec![feature(
        &mean.positions,
        MeanProperties {
            member: 0,
            timesteps: timestamps(&mean.times),
            lead_hours: mean.lead_hours.clone(),
            contributors: mean.contributors.clone(),
            percentiles: PERCENTILE_LEVELS,
            pressure_percentiles_hpa: mean.pressure_percentiles.clone(),
            wind_percentiles_ms: mean.wind_percentiles.clone(),
        },
    )])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::sample;
    use crate::tracks::{ensemble_tracks, mean_track};
    use serde_json::Value;

    #[test]
    fn ensemble_features_carry_lon_lat_and_step_arrays() {
        let samples = vec![
            sample("71", 4, 0, -12.0, 55.0, Some(18.0)),
            sample("71", 4, 6, -12.5, 54.5, None),
        ];
        let json = serde_json::to_value(ensemble_collection(&ensemble_tracks(&samples))).unwrap();

        assert_eq!(json["type"], "FeatureCollection");
        let feature = &json["features"][0];
        assert_eq!(feature["geometry"]["type"], "LineString");
        assert_eq!(feature["geometry"]["coordinates"][1][0], 54.5);
        assert_eq!(feature["geometry"]["coordinates"][1][1], -12.5);
        assert_eq!(feature["properties"]["member_id"], 4);
        assert_eq!(feature["properties"]["timesteps"][1], "2025-01-05T06:00:00");
        assert_eq!(feature["properties"]["wind_ms"][1], Value::Null);
    }

    #[test]
    fn mean_feature_lists_percentile_rows() {
        let samples = vec![
            sample("71", 1, 0, -12.0, 55.0, Some(10.0)),
            sample("71", 2, 0, -14.0, 57.0, Some(20.0)),
        ];
        let json = serde_json::to_value(mean_collection(&mean_track(&samples))).unwrap();
        let props = &json["features"][0]["properties"];
        assert_eq!(props["percentiles"].as_array().unwrap().len(), 5);
        assert_eq!(props["wind_percentiles_ms"][0][2], 15.0);
        assert_eq!(json["features"][0]["geometry"]["coordinates"][0][0], 56.0);
    }

    #[test]
    fn same_tracks_serialize_to_same_bytes() {
        let samples = vec![
            sample("71", 2, 6, -12.4, 54.6, Some(21.0)),
            sample("71", 1, 0, -12.0, 55.0, Some(18.0)),
        ];
        let first = serde_json::to_vec(&ensemble_collection(&ensemble_tracks(&samples))).unwrap();
        let second = serde_json::to_vec(&ensemble_collection(&ensemble_tracks(&samples))).unwrap();
        assert_eq!(first, second);
    }
}
