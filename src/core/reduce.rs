//! Tiled region reductions with a pixel budget and cooperative cancellation.
//!
//! The region's pixel window is cut into row tiles aligned to the sampling
//! block size. Each tile produces a partial result and partials are merged,
//! so peak memory is bounded by the tile size rather than the region size.

use crate::core::histogram::{value_range, Histogram, HistogramAccumulator, HistogramLayout, HistogramSpec};
use crate::core::raster::Raster;
use crate::core::region::{PixelWindow, Region};
use crate::types::{SarError, SarResult};
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared cancellation flag with an optional deadline
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token that expires `timeout` from now
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst) || self.deadline.map_or(false, |d| Instant::now() >= d)
    }

    pub fn check(&self, what: &str) -> SarResult<()> {
        if self.is_cancelled() {
            return Err(SarError::Cancelled(format!("{} stopped before completion", what)));
        }
        Ok(())
    }
}

/// Options for region reductions
#[derive(Debug, Clone)]
pub struct ReduceRegionOptions {
    /// Sampling scale in metres
    pub scale: f64,
    /// Maximum number of native pixels read
    pub max_pixels: u64,
    /// Tile height in pixel rows
    pub tile_size: usize,
    pub cancel: CancellationToken,
}

impl Default for ReduceRegionOptions {
    fn default() -> Self {
        Self {
            scale: 0.0,
            max_pixels: 10_000_000_000_000,
            tile_size: 256,
            cancel: CancellationToken::default(),
        }
    }
}

impl ReduceRegionOptions {
    pub fn new(scale: f64, max_pixels: u64) -> Self {
        Self {
            scale,
            max_pixels,
            ..Default::default()
        }
    }
}

/// A band of rows of the region window
pub struct Tile<'a> {
    raster: &'a Raster,
    region: &'a Region,
    rows: Range<usize>,
    cols: Range<usize>,
    factor: usize,
}

impl<'a> Tile<'a> {
    /// Visit every valid in-region pixel as (row, col, value)
    pub fn for_each_pixel<F>(&self, mut f: F)
    where
        F: FnMut(usize, usize, f32),
    {
        let grid = self.raster.grid();
        for r in self.rows.clone() {
            for c in self.cols.clone() {
                if let Some(v) = self.raster.get(r, c) {
                    if self.region.contains_pixel(grid, r, c) {
                        f(r, c, v);
                    }
                }
            }
        }
    }

    /// Block samples as (mean value, valid fraction of the block)
    pub fn block_samples(&self) -> Vec<(f64, f64)> {
        let grid = self.raster.grid();
        let block_area = (self.factor * self.factor) as f64;
        let mut samples = Vec::new();

        let mut r0 = self.rows.start;
        while r0 < self.rows.end {
            let r1 = (r0 + self.factor).min(self.rows.end);
            let mut c0 = self.cols.start;
            while c0 < self.cols.end {
                let c1 = (c0 + self.factor).min(self.cols.end);
                let mut n = 0usize;
                let mut sum = 0.0f64;
                for r in r0..r1 {
                    for c in c0..c1 {
                        if let Some(v) = self.raster.get(r, c) {
                            if self.region.contains_pixel(grid, r, c) {
                                n += 1;
                                sum += v as f64;
                            }
                        }
                    }
                }
                if n > 0 {
                    samples.push((sum / n as f64, n as f64 / block_area));
                }
                c0 = c1;
            }
            r0 = r1;
        }
        samples
    }
}

/// Tiled reductions of rasters over a region
pub struct RegionReducer<'a> {
    region: &'a Region,
    options: ReduceRegionOptions,
}

impl<'a> RegionReducer<'a> {
    pub fn new(region: &'a Region, options: ReduceRegionOptions) -> Self {
        Self { region, options }
    }

    pub fn options(&self) -> &ReduceRegionOptions {
        &self.options
    }

    /// Pixels per sampling block edge, at most the larger grid dimension
    pub fn sampling_factor(&self, raster: &Raster) -> usize {
        let (rows, cols) = raster.dim();
        let largest = rows.max(cols).max(1);
        let ratio = (self.options.scale / raster.nominal_scale_m()).round();
        if ratio.is_finite() && ratio >= 1.0 {
            ratio.min(largest as f64) as usize
        } else {
            1
        }
    }

    fn plan(&self, raster: &Raster) -> SarResult<(PixelWindow, usize, Vec<Range<usize>>)> {
        if self.options.tile_size == 0 {
            return Err(SarError::InvalidParameter("tile_size must be positive".to_string()));
        }
        raster.grid().transform.validate()?;
        let window = self.region.pixel_window(raster.grid());
        let factor = self.sampling_factor(raster);
        // Tiles hold a whole number of sampling blocks
        let tile_rows = self.options.tile_size.div_ceil(factor) * factor;

        // Every reduction reads each window pixel once, whatever the block size
        let mut tiles = Vec::new();
        let mut required = 0u64;
        let mut blocks = 0u64;
        let cols = window.cols() as u64;
        let mut start = window.row_start;
        while start < window.row_end {
            let end = (start + tile_rows).min(window.row_end);
            required += (end - start) as u64 * cols;
            blocks += (end - start).div_ceil(factor) as u64 * window.cols().div_ceil(factor) as u64;
            tiles.push(start..end);
            start = end;
        }

        if required > self.options.max_pixels {
            return Err(SarError::AggregationBudgetExceeded {
                required,
                limit: self.options.max_pixels,
            });
        }

        log::debug!(
            "Reducing '{}' over {}x{} window: {} tiles, factor {}, {} pixels in {} blocks",
            raster.band(),
            window.rows(),
            window.cols(),
            tiles.len(),
            factor,
            required,
            blocks
        );
        Ok((window, factor, tiles))
    }

    /// Run `f` on every tile and collect the partial results in tile order
    pub fn map_tiles<T, F>(&self, raster: &Raster, f: F) -> SarResult<Vec<T>>
    where
        T: Send,
        F: Fn(&Tile) -> T + Sync + Send,
    {
        let (window, factor, tiles) = self.plan(raster)?;
        self.options.cancel.check("region reduction")?;

        let run = |rows: &Range<usize>| -> SarResult<T> {
            self.options.cancel.check("region reduction")?;
            let tile = Tile {
                raster,
                region: self.region,
                rows: rows.clone(),
                cols: window.col_start..window.col_end,
                factor,
            };
            Ok(f(&tile))
        };

        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;
            tiles.par_iter().map(run).collect()
        }
        #[cfg(not(feature = "parallel"))]
        {
            tiles.iter().map(run).collect()
        }
    }

    /// Weighted sum of block samples
    pub fn sum(&self, raster: &Raster) -> SarResult<f64> {
        let partials = self.map_tiles(raster, |tile| {
            tile.block_samples().iter().map(|(v, w)| v * w).sum::<f64>()
        })?;
        Ok(partials.into_iter().sum())
    }

    /// Total block weight (number of valid samples at the sampling scale)
    pub fn count(&self, raster: &Raster) -> SarResult<f64> {
        let partials = self.map_tiles(raster, |tile| {
            tile.block_samples().iter().map(|(_, w)| w).sum::<f64>()
        })?;
        Ok(partials.into_iter().sum())
    }

    /// Sum of value x pixel area (m^2) over valid in-region pixels
    pub fn sum_area(&self, raster: &Raster) -> SarResult<f64> {
        let grid = *raster.grid();
        let partials = self.map_tiles(raster, |tile| {
            let mut sum = 0.0f64;
            tile.for_each_pixel(|r, _, v| {
                sum += v as f64 * crate::core::raster::pixel_area_m2(&grid, r);
            });
            sum
        })?;
        Ok(partials.into_iter().sum())
    }

    /// Weighted histogram of block samples.
    ///
    /// Samples are buffered while their total stays within `max_raw`;
    /// larger regions are binned in a second pass over the tiles using the
    /// global value range.
    pub fn histogram(&self, raster: &Raster, spec: &HistogramSpec) -> SarResult<Histogram> {
        let max_raw = spec.max_raw;
        let partials = self.map_tiles(raster, |tile| {
            let samples = tile.block_samples();
            let range = value_range(&samples);
            let count = samples.len();
            let buffered = if count <= max_raw { Some(samples) } else { None };
            (range, count, buffered)
        })?;

        let total: usize = partials.iter().map(|(_, n, _)| n).sum();
        let range = partials
            .iter()
            .filter_map(|(r, _, _)| *r)
            .reduce(|(a, b), (c, d)| (a.min(c), b.max(d)))
            .ok_or_else(|| {
                SarError::DegenerateHistogram(format!("no valid samples of '{}' inside the region", raster.band()))
            })?;

        if total <= max_raw && partials.iter().all(|(_, _, b)| b.is_some()) {
            log::debug!("Histogram of '{}' from {} buffered samples", raster.band(), total);
            let samples: Vec<(f64, f64)> = partials.into_iter().flat_map(|(_, _, b)| b.unwrap_or_default()).collect();
            return Histogram::from_samples(&samples, spec);
        }

        log::debug!(
            "Histogram of '{}': {} samples exceed raw limit {}, binning per tile",
            raster.band(),
            total,
            max_raw
        );
        let layout = HistogramLayout::new(range.0, range.1, spec)?;
        let accumulators = self.map_tiles(raster, |tile| {
            let mut acc = HistogramAccumulator::new(layout);
            for (v, w) in tile.block_samples() {
                acc.add(v, w);
            }
            acc
        })?;
        let merged = accumulators
            .into_iter()
            .fold(HistogramAccumulator::new(layout), |acc, part| acc.merge(&part));
        Ok(merged.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingBox, CoordinateSystem, GeoTransform, GridSpec, Units};
    use approx::assert_relative_eq;
    use ndarray::Array2;

    fn grid(rows: usize, cols: usize) -> GridSpec {
        GridSpec::new(
            rows,
            cols,
            GeoTransform::north_up(0.0, rows as f64 * 10.0, 10.0, -10.0),
            CoordinateSystem::Projected { epsg: 32642 },
        )
    }

    fn ramp(rows: usize, cols: usize) -> Raster {
        Raster::new(
            "ramp",
            Units::Unitless,
            grid(rows, cols),
            Array2::from_shape_fn((rows, cols), |(i, j)| (i * cols + j) as f32),
        )
        .unwrap()
    }

    #[test]
    fn test_sum_and_count_at_native_scale() {
        let r = ramp(20, 10);
        let region = Region::from_grid(r.grid()).unwrap();
        let options = ReduceRegionOptions { scale: 10.0, tile_size: 7, ..Default::default() };
        let reducer = RegionReducer::new(&region, options);
        assert_relative_eq!(reducer.count(&r).unwrap(), 200.0);
        assert_relative_eq!(reducer.sum(&r).unwrap(), (0..200).sum::<usize>() as f64);
    }

    #[test]
    fn test_coarse_scale_averages_blocks() {
        let r = Raster::filled("one", Units::Unitless, grid(8, 8), 1.0);
        let region = Region::from_grid(r.grid()).unwrap();
        let reducer = RegionReducer::new(&region, ReduceRegionOptions::new(40.0, 1_000));
        assert_eq!(reducer.sampling_factor(&r), 4);
        // four 4x4 blocks, each fully valid
        assert_relative_eq!(reducer.count(&r).unwrap(), 4.0);
        assert_relative_eq!(reducer.sum(&r).unwrap(), 4.0);
    }

    #[test]
    fn test_sum_area_respects_region() {
        let r = Raster::filled("mask", Units::Unitless, grid(10, 10), 1.0);
        let region = Region::rectangle(BoundingBox { min_x: 0.0, max_x: 50.0, min_y: 0.0, max_y: 100.0 }).unwrap();
        let reducer = RegionReducer::new(&region, ReduceRegionOptions::new(250.0, 1_000));
        // 50 pixels of 100 m^2 regardless of the sampling scale
        assert_relative_eq!(reducer.sum_area(&r).unwrap(), 5_000.0);
    }

    #[test]
    fn test_budget_exceeded_fails_before_work() {
        let r = ramp(20, 20);
        let region = Region::from_grid(r.grid()).unwrap();
        let reducer = RegionReducer::new(&region, ReduceRegionOptions::new(10.0, 399));
        match reducer.sum(&r) {
            Err(SarError::AggregationBudgetExceeded { required, limit }) => {
                assert_eq!(required, 400);
                assert_eq!(limit, 399);
            }
            other => panic!("expected budget error, got {:?}", other),
        }
    }

    #[test]
    fn test_budget_counts_pixels_read_not_blocks() {
        // 25 blocks of 4x4 at 40 m, but 400 pixels are read
        let r = ramp(20, 20);
        let region = Region::from_grid(r.grid()).unwrap();
        let reducer = RegionReducer::new(&region, ReduceRegionOptions::new(40.0, 100));
        assert_eq!(reducer.sampling_factor(&r), 4);
        for result in [reducer.sum_area(&r), reducer.sum(&r)] {
            match result {
                Err(SarError::AggregationBudgetExceeded { required, limit }) => {
                    assert_eq!(required, 400);
                    assert_eq!(limit, 100);
                }
                other => panic!("expected budget error, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_oversized_scale_is_one_block() {
        let r = Raster::filled("one", Units::Unitless, grid(8, 8), 1.0);
        let region = Region::from_grid(r.grid()).unwrap();
        let reducer = RegionReducer::new(&region, ReduceRegionOptions::new(1e300, 1_000));
        assert_eq!(reducer.sampling_factor(&r), 8);
        assert_relative_eq!(reducer.count(&r).unwrap(), 1.0);
    }

    #[test]
    fn test_rotated_grid_is_rejected() {
        let north_up = grid(8, 8);
        let region = Region::from_grid(&north_up).unwrap();
        let rotated = GridSpec {
            transform: GeoTransform {
                pixel_width: 0.0,
                rotation_x: 10.0,
                rotation_y: -10.0,
                pixel_height: 0.0,
                ..north_up.transform
            },
            ..north_up
        };
        let r = Raster::filled("one", Units::Unitless, rotated, 1.0);
        let reducer = RegionReducer::new(&region, ReduceRegionOptions::new(10.0, 1_000));
        assert!(matches!(reducer.sum_area(&r), Err(SarError::InvalidFormat(_))));
    }

    #[test]
    fn test_cancelled_token_stops_reduction() {
        let r = ramp(10, 10);
        let region = Region::from_grid(r.grid()).unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let options = ReduceRegionOptions { cancel: token, ..Default::default() };
        let reducer = RegionReducer::new(&region, options);
        assert!(matches!(reducer.count(&r), Err(SarError::Cancelled(_))));

        let expired = CancellationToken::with_timeout(Duration::from_secs(0));
        assert!(expired.is_cancelled());
    }

    #[test]
    fn test_histogram_two_pass_matches_buffered() {
        let r = ramp(30, 30);
        let region = Region::from_grid(r.grid()).unwrap();
        let options = ReduceRegionOptions { tile_size: 8, ..Default::default() };
        let reducer = RegionReducer::new(&region, options);

        let spec = HistogramSpec { max_buckets: 16, ..Default::default() };
        let buffered = reducer.histogram(&r, &spec).unwrap();
        let binned = reducer.histogram(&r, &HistogramSpec { max_raw: 50, ..spec }).unwrap();
        assert_eq!(buffered.counts, binned.counts);
        assert_relative_eq!(buffered.total(), 900.0);
        for (a, b) in buffered.bucket_means.iter().zip(&binned.bucket_means) {
            assert_relative_eq!(a, b, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_histogram_of_masked_raster_is_degenerate() {
        let r = Raster::filled("none", Units::Unitless, grid(4, 4), f32::NAN);
        let region = Region::from_grid(r.grid()).unwrap();
        let reducer = RegionReducer::new(&region, ReduceRegionOptions::default());
        assert!(matches!(
            reducer.histogram(&r, &HistogramSpec::default()),
            Err(SarError::DegenerateHistogram(_))
        ));
    }
}
