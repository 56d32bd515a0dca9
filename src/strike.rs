//! Strike probability rasters and their interpretation.
//!
//! Values are percentages of ensemble members passing within a fixed
//! great-circle radius of a cell centre. A stored value `<= 0` means "no
//! signal": it is masked for display and left out of every statistic.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::basin::BasinRegion;
use crate::models::{Bounds, RasterField, Trajectory};

const EARTH_RADIUS_KM: f64 = 6371.0;
const KM_PER_DEGREE: f64 = 111.195;

/// Number of display classes spanning the valid range.
pub const CLASS_COUNT: usize = 10;

/// Inclusive forecast-step interval in hours. Windows may overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StepWindow {
    pub start_hours: u32,
    pub end_hours: u32,
}

impl StepWindow {
    pub const fn new(start_hours: u32, end_hours: u32) -> Self {
        StepWindow {
            start_hours,
            end_hours,
        }
    }

    pub fn contains(&self, lead_hours: u32) -> bool {
        lead_hours >= self.start_hours && lead_hours <= self.end_hours
    }

    pub fn label(&self) -> String {
        format!("{:03}-{:03}h", self.start_hours, self.end_hours)
    }
}

pub const DEFAULT_WINDOWS: [StepWindow; 4] = [
    StepWindow::new(24, 72),
    StepWindow::new(48, 96),
    StepWindow::new(72, 120),
    StepWindow::new(96, 144),
];

#[derive(Debug, Clone)]
pub struct StrikeConfig {
    pub resolution_deg: f64,
    pub radius_km: f64,
    pub windows: Vec<StepWindow>,
}

impl Default for StrikeConfig {
    fn default() -> Self {
        StrikeConfig {
            resolution_deg: 0.5,
            radius_km: 300.0,
            windows: DEFAULT_WINDOWS.to_vec(),
        }
    }
}

/// North-up probability grid over the basin, in percent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrikeRaster {
    pub bounds: Bounds,
    pub resolution_deg: f64,
    pub rows: usize,
    pub cols: usize,
    pub values: Vec<f32>,
}

/// Statistics over unmasked cells only.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RasterStats {
    pub signal_cells: usize,
    pub max_percent: Option<f32>,
    pub mean_percent: Option<f32>,
    /// Share of signal cells at or above 50 %, in percent.
    pub share_at_least_50: Option<f32>,
}

impl StrikeRaster {
    pub fn zeros(region: &BasinRegion, resolution_deg: f64) -> Self {
        let rows = ((region.lat_max - region.lat_min) / resolution_deg).round().max(0.0) as usize;
        let cols = ((region.lon_max - region.lon_min) / resolution_deg).round().max(0.0) as usize;
        StrikeRaster {
            bounds: Bounds {
                west: region.lon_min,
                east: region.lon_min + cols as f64 * resolution_deg,
                south: region.lat_max - rows as f64 * resolution_deg,
                north: region.lat_max,
            },
            resolution_deg,
            rows,
            cols,
            values: vec![0.0; rows * cols],
        }
    }

    pub fn cell_center(&self, row: usize, col: usize) -> (f64, f64) {
        (
            self.bounds.north - (row as f64 + 0.5) * self.resolution_deg,
            self.bounds.west + (col as f64 + 0.5) * self.resolution_deg,
        )
    }

    #[cfg(test)]
    pub fn value(&self, row: usize, col: usize) -> f32 {
        self.values[row * self.cols + col]
    }

    pub fn has_signal(&self) -> bool {
        self.values.iter().any(|v| *v > 0.0)
    }

    /// Display view with no-signal cells masked out.
    pub fn masked(&self) -> RasterField {
        RasterField {
            rows: self.rows,
            cols: self.cols,
            cells: self
                .values
                .iter()
                .map(|&v| if v > 0.0 { Some(v) } else { None })
                .collect(),
            bounds: self.bounds,
        }
    }

    pub fn stats(&self) -> RasterStats {
        let signal: Vec<f32> = self.values.iter().copied().filter(|v| *v > 0.0).collect();
        if signal.is_empty() {
            return RasterStats {
                signal_cells: 0,
                max_percent: None,
                mean_percent: None,
                share_at_least_50: None,
            };
        }
        let count = signal.len() as f32;
        let strong = signal.iter().filter(|v| **v >= 50.0).count() as f32;
        RasterStats {
            signal_cells: signal.len(),
            max_percent: signal.iter().copied().reduce(f32::max),
            mean_percent: Some(signal.iter().sum::<f32>() / count),
            share_at_least_50: Some(strong / count * 100.0),
        }
    }
}

/// Display class of `value` within `(min, max)`, `None` for masked values.
/// A zero-width range puts every valid value in class 0.
pub fn classify(value: f32, range: (f32, f32)) -> Option<usize> {
    if value <= 0.0 || !value.is_finite() {
        return None;
    }
    let (min, max) = range;
    if max <= min {
        return Some(0);
    }
    let scaled = ((value - min) / (max - min) * CLASS_COUNT as f32).floor();
    Some((scaled.max(0.0) as usize).min(CLASS_COUNT - 1))
}

/// Probability that each cell lies within the radius of a member's track
/// at any step.
pub fn strike_probability(
    tracks: &[Trajectory],
    region: &BasinRegion,
    config: &StrikeConfig,
) -> StrikeRaster {
    footprint_probability(tracks, region, config, |_| true)
}

/// Same as [`strike_probability`] restricted to one forecast step.
pub fn step_probability(
    tracks: &[Trajectory],
    lead_hours: u32,
    region: &BasinRegion,
    config: &StrikeConfig,
) -> StrikeRaster {
    footprint_probability(tracks, region, config, |h| h == lead_hours)
}

fn footprint_probability(
    tracks: &[Trajectory],
    region: &BasinRegion,
    config: &StrikeConfig,
    keep_step: impl Fn(u32) -> bool,
) -> StrikeRaster {
    let mut raster = StrikeRaster::zeros(region, config.resolution_deg);
    let members: Vec<&Trajectory> = tracks.iter().filter(|t| !t.is_empty()).collect();
    if members.is_empty() || raster.values.is_empty() {
        return raster;
    }

    let mut hits = vec![0u32; raster.values.len()];
    let mut touched = vec![false; raster.values.len()];
    for track in &members {
        touched.iter_mut().for_each(|t| *t = false);
        for (&(lat, lon), &lead) in track.positions.iter().zip(&track.lead_hours) {
            if keep_step(lead) {
                stamp(&raster, &mut touched, lat, lon, config.radius_km);
            }
        }
        for (hit, was_touched) in hits.iter_mut().zip(&touched) {
            if *was_touched {
                *hit += 1;
            }
        }
    }

    let total = members.len() as f32;
    for (value, hit) in raster.values.iter_mut().zip(hits) {
        *value = hit as f32 / total * 100.0;
    }
    raster
}

fn stamp(raster: &StrikeRaster, touched: &mut [bool], lat: f64, lon: f64, radius_km: f64) {
    let res = raster.resolution_deg;
    let dlat = radius_km / KM_PER_DEGREE;
    let widest = (lat.abs() + dlat).min(89.0).to_radians().cos();
    let dlon = dlat / widest;

    let row_of = |y: f64| ((raster.bounds.north - y) / res - 0.5) as i64;
    let col_of = |x: f64| ((x - raster.bounds.west) / res - 0.5) as i64;
    let clamp = |v: i64, n: usize| v.clamp(0, n as i64 - 1) as usize;

    let (r0, r1) = (
        clamp(row_of(lat + dlat) - 1, raster.rows),
        clamp(row_of(lat - dlat) + 1, raster.rows),
    );
    let (c0, c1) = (
        clamp(col_of(lon - dlon) - 1, raster.cols),
        clamp(col_of(lon + dlon) + 1, raster.cols),
    );

    for row in r0..=r1 {
        for col in c0..=c1 {
            let (clat, clon) = raster.cell_center(row, col);
            if haversine_km(lat, lon, clat, clon) <= radius_km {
                touched[row * raster.cols + col] = true;
            }
        }
    }
}

pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (p1, p2) = (lat1.to_radians(), lat2.to_radians());
    let dp = p2 - p1;
    let dl = (lon2 - lon1).to_radians();
    let a = (dp / 2.0).sin().powi(2) + p1.cos() * p2.cos() * (dl / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().min(1.0).asin()
}

/// Per-step fields for every distinct forecast step, ascending.
pub fn step_fields(
    tracks: &[Trajectory],
    region: &BasinRegion,
    config: &StrikeConfig,
) -> Vec<(u32, StrikeRaster)> {
    let steps: BTreeSet<u32> = tracks.iter().flat_map(|t| t.lead_hours.iter().copied()).collect();
    steps
        .into_iter()
        .map(|h| (h, step_probability(tracks, h, region, config)))
        .collect()
}

/// Per-cell maximum over every step inside `window`. Cells stay at zero
/// when no step falls in the window.
pub fn windowed_max(
    fields: &[(u32, StrikeRaster)],
    window: StepWindow,
    template: &StrikeRaster,
) -> StrikeRaster {
    let mut out = StrikeRaster {
        values: vec![0.0; template.values.len()],
        ..template.clone()
    };
    for (_, field) in fields.iter().filter(|(h, _)| window.contains(*h)) {
        for (acc, v) in out.values.iter_mut().zip(&field.values) {
            *acc = acc.max(*v);
        }
    }
    out
}

/// Domain-wide maximum at one step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub lead_hours: u32,
    pub max_percent: f32,
}

pub fn domain_series(fields: &[(u32, StrikeRaster)]) -> Vec<SeriesPoint> {
    fields
        .iter()
        .map(|(h, field)| SeriesPoint {
            lead_hours: *h,
            max_percent: field.values.iter().copied().fold(0.0, f32::max),
        })
        .collect()
}

pub fn windowed_series_max(series: &[SeriesPoint], window: StepWindow) -> Option<f32> {
    series
        .iter()
        .filter(|p| window.contains(p.lead_hours))
        .map(|p| p.max_percent)
        .reduce(f32::max)
}

#[derive(Debug, Clone, Serialize)]
pub struct WindowProduct {
    pub window: StepWindow,
    pub label: String,
    pub steps: usize,
    pub domain_max_percent: Option<f32>,
    pub stats: RasterStats,
    pub raster: StrikeRaster,
}

#[derive(Debug, Clone, Serialize)]
pub struct WindowedProducts {
    pub radius_km: f64,
    pub series: Vec<SeriesPoint>,
    pub windows: Vec<WindowProduct>,
}

pub fn windowed_products(
    tracks: &[Trajectory],
    region: &BasinRegion,
    config: &StrikeConfig,
) -> WindowedProducts {
    let fields = step_fields(tracks, region, config);
    let series = domain_series(&fields);
    let template = StrikeRaster::zeros(region, config.resolution_deg);

    let windows = config
        .windows
        .iter()
        .map(|&window| {
            let raster = windowed_max(&fields, window, &template);
            WindowProduct {
                window,
                label: window.label(),
                steps: fields.iter().filter(|(h, _)| window.contains(*h)).count(),
                domain_max_percent: windowed_series_max(&series, window),
                stats: raster.stats(),
                raster,
            }
        })
        .collect();

    WindowedProducts {
        radius_km: config.radius_km,
        series,
        windows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::sample;
    use crate::tracks::ensemble_tracks;
    use approx::assert_relative_eq;

    fn small_region() -> BasinRegion {
        BasinRegion {
            lat_min: -20.0,
            lat_max: -10.0,
            lon_min: 50.0,
            lon_max: 60.0,
            ..BasinRegion::south_west_indian_ocean()
        }
    }

    fn two_member_tracks() -> Vec<Trajectory> {
        ensemble_tracks(&[
            sample("71", 1, 24, -15.0, 55.0, Some(20.0)),
            sample("71", 1, 48, -16.0, 54.0, Some(25.0)),
            sample("71", 2, 24, -15.0, 55.0, Some(18.0)),
            sample("71", 2, 120, -12.0, 58.0, Some(30.0)),
        ])
    }

    #[test]
    fn raster_geometry_covers_region_north_up() {
        let raster = StrikeRaster::zeros(&small_region(), 0.5);
        assert_eq!((raster.rows, raster.cols), (20, 20));
        assert_eq!(raster.cell_center(0, 0), (-10.25, 50.25));
        assert_eq!(raster.cell_center(19, 19), (-19.75, 59.75));
    }

    #[test]
    fn haversine_matches_known_distance() {
        assert_relative_eq!(haversine_km(0.0, 0.0, 1.0, 0.0), 111.195, epsilon = 0.01);
        assert_eq!(haversine_km(-15.0, 55.0, -15.0, 55.0), 0.0);
    }

    #[test]
    fn probability_counts_members_once_and_respects_radius() {
        let raster = strike_probability(&two_member_tracks(), &small_region(), &StrikeConfig::default());
        // (-14.75, 55.25) is a few tens of km from the shared first position
        assert_eq!(raster.value(9, 10), 100.0);
        // far south-west corner
        assert_eq!(raster.value(19, 0), 0.0);
        // near member 2's last position only
        assert_eq!(raster.value(3, 16), 50.0);
        assert!(raster.values.iter().all(|v| (0.0..=100.0).contains(v)));
    }

    #[test]
    fn masking_excludes_non_positive_cells_from_stats() {
        let mut raster = StrikeRaster::zeros(&small_region(), 5.0);
        raster.values = vec![0.0, -1.0, 40.0, 80.0];
        let masked = raster.masked();
        assert_eq!(masked.cells, vec![None, None, Some(40.0), Some(80.0)]);
        let stats = raster.stats();
        assert_eq!(stats.signal_cells, 2);
        assert_eq!(stats.mean_percent, Some(60.0));
        assert_eq!(stats.share_at_least_50, Some(50.0));
    }

    #[test]
    fn classification_spans_valid_range_in_ten_bins() {
        assert_eq!(classify(0.0, (10.0, 100.0)), None);
        assert_eq!(classify(10.0, (10.0, 100.0)), Some(0));
        assert_eq!(classify(54.9, (10.0, 100.0)), Some(4));
        assert_eq!(classify(100.0, (10.0, 100.0)), Some(9));
        assert_eq!(classify(42.0, (42.0, 42.0)), Some(0));
    }

    #[test]
    fn windows_are_inclusive_and_may_overlap() {
        let w = StepWindow::new(24, 72);
        assert!(w.contains(24) && w.contains(72) && !w.contains(78));
        assert_eq!(w.label(), "024-072h");
    }

    #[test]
    fn windowed_max_takes_per_cell_maximum_over_steps_in_window() {
        let region = small_region();
        let config = StrikeConfig::default();
        let fields = step_fields(&two_member_tracks(), &region, &config);
        assert_eq!(fields.iter().map(|(h, _)| *h).collect::<Vec<_>>(), vec![24, 48, 120]);

        let template = StrikeRaster::zeros(&region, config.resolution_deg);
        let early = windowed_max(&fields, StepWindow::new(24, 72), &template);
        let late = windowed_max(&fields, StepWindow::new(96, 144), &template);
        let empty = windowed_max(&fields, StepWindow::new(200, 240), &template);

        assert_eq!(early.value(9, 10), 100.0);
        assert_eq!(late.value(9, 10), 0.0);
        assert_eq!(late.value(3, 16), 50.0);
        assert!(!empty.has_signal());
    }

    #[test]
    fn series_windows_pick_domain_maxima() {
        let series = vec![
            SeriesPoint { lead_hours: 24, max_percent: 40.0 },
            SeriesPoint { lead_hours: 48, max_percent: 70.0 },
            SeriesPoint { lead_hours: 120, max_percent: 20.0 },
        ];
        assert_eq!(windowed_series_max(&series, StepWindow::new(24, 72)), Some(70.0));
        assert_eq!(windowed_series_max(&series, StepWindow::new(96, 144)), Some(20.0));
        assert_eq!(windowed_series_max(&series, StepWindow::new(150, 200)), None);
    }

    #[test]
    fn windowed_products_cover_configured_windows() {
        let products =
            windowed_products(&two_member_tracks(), &small_region(), &StrikeConfig::default());
        assert_eq!(products.windows.len(), 4);
        assert_eq!(products.windows[0].steps, 2);
        assert_eq!(products.windows[0].domain_max_percent, Some(100.0));
        assert_eq!(products.series.len(), 3);
    }
}
