use tracing::debug;

use crate::basin::BasinRegion;
use crate::config::BinningConfig;
use crate::error::DataGap;
use crate::models::{Bounds, ForecastSample, RasterField};

/// Per-cell maximum of a scalar over a coarse lat/lon grid.
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialGrid {
    /// Ascending latitude edges; `lat_edges.len() - 1` rows.
    pub lat_edges: Vec<f64>,
    /// Ascending longitude edges; `lon_edges.len() - 1` columns.
    pub lon_edges: Vec<f64>,
    /// Row-major, row 0 at the southernmost edge.
    pub cells: Vec<Option<f64>>,
    pub dropped: usize,
}

impl SpatialGrid {
    pub fn lat_bins(&self) -> usize {
        self.lat_edges.len().saturating_sub(1)
    }

    pub fn lon_bins(&self) -> usize {
        self.lon_edges.len().saturating_sub(1)
    }

    pub fn cell(&self, lat_index: usize, lon_index: usize) -> Option<f64> {
        self.cells[lat_index * self.lon_bins() + lon_index]
    }

    pub fn max_value(&self) -> Option<f64> {
        self.cells.iter().flatten().copied().reduce(f64::max)
    }

    pub fn data_cells(&self) -> usize {
        self.cells.iter().flatten().count()
    }

    /// Flips to north-up for rendering.
    pub fn to_raster(&self) -> RasterField {
        let rows = self.lat_bins();
        let cols = self.lon_bins();
        let mut cells = Vec::with_capacity(rows * cols);
        for lat_index in (0..rows).rev() {
            for lon_index in 0..cols {
                cells.push(self.cell(lat_index, lon_index).map(|v| v as f32));
            }
        }
        RasterField {
            rows,
            cols,
            cells,
            bounds: Bounds {
                west: self.lon_edges[0],
                east: self.lon_edges[cols],
                south: self.lat_edges[0],
                north: self.lat_edges[rows],
            },
        }
    }
}

/// Bins wind speed onto a padded, basin-clamped grid keeping the maximum
/// per cell. Signals [`DataGap::NoWindSamples`] when no sample carries a
/// usable `(latitude, longitude, wind)` triple.
pub fn bin_max_wind(
    samples: &[ForecastSample],
    region: &BasinRegion,
    config: &BinningConfig,
) -> Result<SpatialGrid, DataGap> {
    let points: Vec<(f64, f64, f64)> = samples
        .iter()
        .filter_map(|s| s.wind_speed_ms.map(|w| (s.latitude, s.longitude, w)))
        .filter(|(lat, lon, w)| lat.is_finite() && lon.is_finite() && w.is_finite())
        .collect();
    bin_max(&points, region, config)
}

pub fn bin_max(
    points: &[(f64, f64, f64)],
    region: &BasinRegion,
    config: &BinningConfig,
) -> Result<SpatialGrid, DataGap> {
    if points.is_empty() {
        return Err(DataGap::NoWindSamples);
    }

    let (lat_lo, lat_hi) = extent(points.iter().map(|p| p.0));
    let (lon_lo, lon_hi) = extent(points.iter().map(|p| p.1));
    let lat_edges = edges(
        (lat_lo - config.margin_deg).max(region.lat_min),
        (lat_hi + config.margin_deg).min(region.lat_max),
        config.cell_deg,
    );
    let lon_edges = edges(
        (lon_lo - config.margin_deg).max(region.lon_min),
        (lon_hi + config.margin_deg).min(region.lon_max),
        config.cell_deg,
    );
    if lat_edges.len() < 2 || lon_edges.len() < 2 {
        return Err(DataGap::NoWindSamples);
    }

    let lon_bins = lon_edges.len() - 1;
    let mut cells: Vec<Option<f64>> = vec![None; (lat_edges.len() - 1) * lon_bins];
    let mut dropped = 0usize;

    for &(lat, lon, value) in points {
        match (digitize(&lat_edges, lat), digitize(&lon_edges, lon)) {
            (Some(row), Some(col)) => {
                let cell = &mut cells[row * lon_bins + col];
                *cell = Some(cell.map_or(value, |current| current.max(value)));
            }
            _ => dropped += 1,
        }
    }

    if dropped > 0 {
        debug!(dropped, "samples outside the clamped grid extent");
    }

    let grid = SpatialGrid {
        lat_edges,
        lon_edges,
        cells,
        dropped,
    };
    if grid.data_cells() == 0 {
        return Err(DataGap::NoWindSamples);
    }
    Ok(grid)
}

fn extent(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    })
}

/// Monotonic edges from `lo` in `step` increments; the last edge is `hi`.
pub fn edges(lo: f64, hi: f64, step: f64) -> Vec<f64> {
    if !(hi > lo) || !(step > 0.0) {
        return Vec::new();
    }
    let full = ((hi - lo) / step).ceil() as usize;
    let mut out: Vec<f64> = (0..full)
        .map(|k| lo + k as f64 * step)
        .filter(|e| *e < hi)
        .collect();
    out.push(hi);
    out
}

/// Right-open bin index of `x`, `None` outside `[edges[0], edges[last])`.
pub fn digitize(edges: &[f64], x: f64) -> Option<usize> {
    let first = *edges.first()?;
    let last = *edges.last()?;
    if !(x >= first && x < last) {
        return None;
    }
    Some(edges.partition_point(|e| *e <= x) - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::sample;

    fn region() -> BasinRegion {
        BasinRegion::south_west_indian_ocean()
    }

    #[test]
    fn edges_are_monotonic_and_end_on_upper_bound() {
        assert_eq!(edges(-14.0, -10.0, 1.0), vec![-14.0, -13.0, -12.0, -11.0, -10.0]);
        assert_eq!(edges(0.0, 2.5, 1.0), vec![0.0, 1.0, 2.0, 2.5]);
        assert!(edges(3.0, 3.0, 1.0).is_empty());
    }

    #[test]
    fn digitize_is_right_open() {
        let e = edges(0.0, 3.0, 1.0);
        assert_eq!(digitize(&e, 0.0), Some(0));
        assert_eq!(digitize(&e, 0.999), Some(0));
        assert_eq!(digitize(&e, 1.0), Some(1));
        assert_eq!(digitize(&e, 3.0), None);
        assert_eq!(digitize(&e, -0.1), None);
    }

    #[test]
    fn cell_holds_maximum_of_its_samples() {
        let samples = vec![
            sample("71", 1, 0, -12.2, 55.3, Some(18.0)),
            sample("71", 2, 0, -12.4, 55.9, Some(26.0)),
            sample("71", 3, 0, -12.3, 55.5, Some(21.0)),
            sample("71", 1, 6, -15.0, 52.0, Some(30.0)),
        ];
        let grid = bin_max_wind(&samples, &region(), &BinningConfig::default()).unwrap();

        let row = digitize(&grid.lat_edges, -12.5).unwrap();
        let col = digitize(&grid.lon_edges, 55.5).unwrap();
        assert_eq!(grid.cell(row, col), Some(26.0));
        assert_eq!(grid.data_cells(), 2);
        assert_eq!(grid.max_value(), Some(30.0));
        assert_eq!(grid.dropped, 0);
    }

    #[test]
    fn extent_is_padded_then_clamped_to_basin() {
        let samples = vec![sample("71", 1, 0, -1.0, 119.0, Some(18.0))];
        let grid = bin_max_wind(&samples, &region(), &BinningConfig::default()).unwrap();
        assert_eq!(*grid.lat_edges.first().unwrap(), -3.0);
        assert_eq!(*grid.lat_edges.last().unwrap(), 0.0);
        assert_eq!(*grid.lon_edges.last().unwrap(), 120.0);
    }

    #[test]
    fn points_outside_clamped_extent_are_dropped_not_fatal() {
        let points = vec![(-12.0, 55.0, 20.0), (5.0, 55.0, 99.0)];
        let grid = bin_max(&points, &region(), &BinningConfig::default()).unwrap();
        assert_eq!(grid.dropped, 1);
        assert_eq!(grid.max_value(), Some(20.0));
    }

    #[test]
    fn sample_on_eastern_basin_edge_falls_outside_last_bin() {
        // admitted by the closed-longitude basin filter, dropped by right-open digitize
        assert!(region().contains(-12.0, 120.0));
        assert_eq!(
            bin_max(&[(-12.0, 120.0, 25.0)], &region(), &BinningConfig::default()),
            Err(DataGap::NoWindSamples)
        );

        let points = vec![(-12.0, 119.5, 20.0), (-12.0, 120.0, 25.0)];
        let grid = bin_max(&points, &region(), &BinningConfig::default()).unwrap();
        assert_eq!(grid.dropped, 1);
        assert_eq!(grid.max_value(), Some(20.0));
    }

    #[test]
    fn no_wind_triples_signals_no_data() {
        let samples = vec![sample("71", 1, 0, -12.0, 55.0, None)];
        assert_eq!(
            bin_max_wind(&samples, &region(), &BinningConfig::default()),
            Err(DataGap::NoWindSamples)
        );
    }

    #[test]
    fn raster_is_north_up() {
        let points = vec![(-12.5, 55.5, 20.0), (-10.5, 55.5, 40.0)];
        let grid = bin_max(&points, &region(), &BinningConfig::default()).unwrap();
        let raster = grid.to_raster();
        let first_row_max = raster.cells[..raster.cols].iter().flatten().copied().fold(0.0, f32::max);
        assert_eq!(raster.rows, grid.lat_bins());
        assert!(raster.bounds.north > raster.bounds.south);
        // northern padding row is empty, the 40 m/s cell sits right below it
        assert_eq!(first_row_max, 0.0);
        assert_eq!(raster.cells[raster.cols + 2], Some(40.0));
    }
}
