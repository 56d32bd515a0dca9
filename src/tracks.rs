use std::collections::BTreeMap;

use crate::models::{
    ForecastSample, MeanTrajectory, PercentileSet, Trajectory, PERCENTILE_LEVELS,
};

/// One trajectory per reporting member, ordered by forecast step.
pub fn ensemble_tracks(samples: &[ForecastSample]) -> Vec<Trajectory> {
    let mut by_member: BTreeMap<i32, Vec<&ForecastSample>> = BTreeMap::new();
    for sample in samples {
        by_member.entry(sample.member_id).or_default().push(sample);
    }

    by_member
        .into_iter()
        .filter(|(_, steps)| !steps.is_empty())
        .map(|(member_id, mut steps)| {
            // stable: equal steps keep feed order
            steps.sort_by_key(|s| s.lead_hours);
            Trajectory {
                member_id,
                positions: steps.iter().map(|s| (s.latitude, s.longitude)).collect(),
                times: steps.iter().map(|s| s.time).collect(),
                lead_hours: steps.iter().map(|s| s.lead_hours).collect(),
                pressures_hpa: steps.iter().map(|s| s.pressure_hpa).collect(),
                winds_ms: steps.iter().map(|s| s.wind_speed_ms).collect(),
            }
        })
        .collect()
}

/// Mean position and pressure/wind spread at each track index.
///
/// Index `i` aggregates every member whose trajectory has at least `i + 1`
/// steps, so members of different lengths never need to align.
pub fn mean_track(samples: &[ForecastSample]) -> MeanTrajectory {
    mean_of_tracks(&ensemble_tracks(samples))
}

pub fn mean_of_tracks(tracks: &[Trajectory]) -> MeanTrajectory {
    let longest = tracks.iter().map(Trajectory::len).max().unwrap_or(0);
    let mut mean = MeanTrajectory::default();

    for index in 0..longest {
        let contributors: Vec<&Trajectory> = tracks.iter().filter(|t| t.len() > index).collect();
        if contributors.is_empty() {
            continue;
        }

        let count = contributors.len() as f64;
        let lat = contributors.iter().map(|t| t.positions[index].0).sum::<f64>() / count;
        let lon = contributors.iter().map(|t| t.positions[index].1).sum::<f64>() / count;
        let pressures: Vec<f64> = contributors
            .iter()
            .filter_map(|t| t.pressures_hpa[index])
            .collect();
        let winds: Vec<f64> = contributors.iter().filter_map(|t| t.winds_ms[index]).collect();

        mean.positions.push((lat, lon));
        mean.times
            .push(contributors.iter().map(|t| t.times[index]).min().unwrap_or_default());
        mean.lead_hours
            .push(contributors.iter().map(|t| t.lead_hours[index]).min().unwrap_or(0));
        mean.contributors.push(contributors.len());
        mean.pressure_percentiles.push(percentiles(&pressures));
        mean.wind_percentiles.push(percentiles(&winds));
    }

    mean
}

/// [`PERCENTILE_LEVELS`] of `values` by linear interpolation between order
/// statistics; `None` for an empty input.
pub fn percentiles(values: &[f64]) -> Option<PercentileSet> {
    if values.is_empty() {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let mut out = [0.0; PERCENTILE_LEVELS.len()];
    for (slot, level) in out.iter_mut().zip(PERCENTILE_LEVELS) {
        *slot = interpolate(&sorted, level);
    }
    // rounding in the interpolation must not break the ordering
    for k in 1..out.len() {
        out[k] = out[k].max(out[k - 1]);
    }
    Some(out)
}

fn interpolate(sorted: &[f64], level: f64) -> f64 {
    let rank = level / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        return sorted[lo];
    }
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
}
