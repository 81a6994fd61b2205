//! Edge-guided Otsu thresholding.
//!
//! A preliminary binary layer is traced with Canny; long edge chains are
//! buffered and only pixels under the buffer feed the histogram, which makes
//! the sampled distribution strongly bimodal around real water/land
//! boundaries before Otsu's method picks the split.

use crate::core::composite::mean_collection;
use crate::core::edge_detection::CannyEdgeDetector;
use crate::core::histogram::{ChartPoint, Histogram, HistogramSpec};
use crate::core::kernel::KernelShape;
use crate::core::raster::Raster;
use crate::core::reduce::{CancellationToken, ReduceRegionOptions, RegionReducer};
use crate::core::region::Region;
use crate::types::{SarError, SarResult};
use serde::{Deserialize, Serialize};

/// User-facing options; unset fields take the documented defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EdgeOtsuOptions {
    pub initial_threshold: Option<f64>,
    pub reduction_scale: Option<f64>,
    pub smoothing: Option<f64>,
    pub band_name: Option<String>,
    pub connected_pixels: Option<usize>,
    pub edge_length: Option<usize>,
    pub smooth_edges: Option<f64>,
    pub canny_threshold: Option<f64>,
    pub canny_sigma: Option<f64>,
    pub canny_lt: Option<f64>,
    pub max_buckets: Option<usize>,
    pub min_bucket_width: Option<f64>,
    pub max_raw: Option<f64>,
    pub invert: Option<bool>,
    pub verbose: Option<bool>,
    pub max_pixels: Option<f64>,
    pub tile_size: Option<usize>,
}

/// Fully resolved thresholding parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeOtsuParams {
    /// Preliminary binarisation cutoff
    pub initial_threshold: f64,
    /// Histogram sampling resolution in metres
    pub reduction_scale: f64,
    /// Accepted for compatibility, not used
    pub smoothing: f64,
    pub band_name: String,
    /// Cap on the connected-pixel count of edge chains
    pub connected_pixels: usize,
    /// Minimum edge chain size kept
    pub edge_length: usize,
    /// Buffer radius around kept edges in metres
    pub smooth_edges: f64,
    pub canny_threshold: f64,
    pub canny_sigma: f64,
    pub canny_lt: f64,
    pub max_buckets: usize,
    pub min_bucket_width: f64,
    pub max_raw: usize,
    pub invert: bool,
    pub verbose: bool,
    /// Pixel budget of the histogram reduction
    pub max_pixels: u64,
    pub tile_size: usize,
}

impl Default for EdgeOtsuParams {
    fn default() -> Self {
        Self {
            initial_threshold: 1.0,
            reduction_scale: 180.0,
            smoothing: 100.0,
            band_name: "constant".to_string(),
            connected_pixels: 30,
            edge_length: 20,
            smooth_edges: 20.0,
            canny_threshold: 1.0,
            canny_sigma: 1.0,
            canny_lt: 0.05,
            max_buckets: 255,
            min_bucket_width: 0.001,
            max_raw: 1_000_000,
            invert: false,
            verbose: true,
            max_pixels: 10_000_000_000_000,
            tile_size: 256,
        }
    }
}

impl EdgeOtsuOptions {
    /// Merge with the defaults in one step
    pub fn apply_defaults(&self) -> EdgeOtsuParams {
        let d = EdgeOtsuParams::default();
        EdgeOtsuParams {
            initial_threshold: self.initial_threshold.unwrap_or(d.initial_threshold),
            reduction_scale: self.reduction_scale.unwrap_or(d.reduction_scale),
            smoothing: self.smoothing.unwrap_or(d.smoothing),
            band_name: self.band_name.clone().unwrap_or(d.band_name),
            connected_pixels: self.connected_pixels.unwrap_or(d.connected_pixels),
            edge_length: self.edge_length.unwrap_or(d.edge_length),
            smooth_edges: self.smooth_edges.unwrap_or(d.smooth_edges),
            canny_threshold: self.canny_threshold.unwrap_or(d.canny_threshold),
            canny_sigma: self.canny_sigma.unwrap_or(d.canny_sigma),
            canny_lt: self.canny_lt.unwrap_or(d.canny_lt),
            max_buckets: self.max_buckets.unwrap_or(d.max_buckets),
            min_bucket_width: self.min_bucket_width.unwrap_or(d.min_bucket_width),
            max_raw: self.max_raw.map_or(d.max_raw, |v| v.max(0.0) as usize),
            invert: self.invert.unwrap_or(d.invert),
            verbose: self.verbose.unwrap_or(d.verbose),
            max_pixels: self.max_pixels.map_or(d.max_pixels, |v| v.max(0.0) as u64),
            tile_size: self.tile_size.unwrap_or(d.tile_size),
        }
    }
}

impl EdgeOtsuParams {
    pub fn validate(&self) -> SarResult<()> {
        let positive = [
            ("reductionScale", self.reduction_scale),
            ("minBucketWidth", self.min_bucket_width),
        ];
        for (name, value) in positive {
            if !(value > 0.0) || !value.is_finite() {
                return Err(SarError::InvalidParameter(format!("{} must be positive, got {}", name, value)));
            }
        }
        let non_negative = [
            ("smoothEdges", self.smooth_edges),
            ("cannySigma", self.canny_sigma),
        ];
        for (name, value) in non_negative {
            if !(value >= 0.0) || !value.is_finite() {
                return Err(SarError::InvalidParameter(format!("{} must be >= 0, got {}", name, value)));
            }
        }
        if !self.initial_threshold.is_finite() || !self.canny_threshold.is_finite() || !self.canny_lt.is_finite() {
            return Err(SarError::InvalidParameter(
                "initialThreshold, cannyThreshold and cannyLt must be finite".to_string(),
            ));
        }
        if self.connected_pixels == 0 || self.connected_pixels > 1024 {
            return Err(SarError::InvalidParameter(format!(
                "connectedPixels must be within 1..=1024, got {}",
                self.connected_pixels
            )));
        }
        if self.max_buckets == 0 {
            return Err(SarError::InvalidParameter("maxBuckets must be positive".to_string()));
        }
        if self.tile_size == 0 {
            return Err(SarError::InvalidParameter("tileSize must be positive".to_string()));
        }
        Ok(())
    }

    pub fn histogram_spec(&self) -> HistogramSpec {
        HistogramSpec {
            max_buckets: self.max_buckets,
            min_bucket_width: self.min_bucket_width,
            max_raw: self.max_raw,
        }
    }
}

/// Diagnostic payload for inspecting a threshold
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdDiagnostics {
    pub params: EdgeOtsuParams,
    pub edge_pixels: usize,
    pub buffer_pixels: usize,
    pub buffer_radius_px: usize,
    pub histogram: Histogram,
    pub sample_mean: Option<f64>,
    pub bss: Vec<f64>,
    pub chart: Vec<ChartPoint>,
}

/// Threshold together with the binary water layer it produces
#[derive(Debug, Clone)]
pub struct ThresholdResult {
    pub threshold: f64,
    /// 1 where water, 0 where not, invalid where the input is invalid
    pub water: Raster,
    pub diagnostics: Option<ThresholdDiagnostics>,
}

pub struct EdgeOtsuThresholder {
    params: EdgeOtsuParams,
    cancel: CancellationToken,
}

impl EdgeOtsuThresholder {
    pub fn new(params: EdgeOtsuParams) -> SarResult<Self> {
        params.validate()?;
        Ok(Self {
            params,
            cancel: CancellationToken::default(),
        })
    }

    pub fn from_options(options: &EdgeOtsuOptions) -> SarResult<Self> {
        Self::new(options.apply_defaults())
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn params(&self) -> &EdgeOtsuParams {
        &self.params
    }

    /// Threshold the band named `bandName`; several matching layers are
    /// averaged per pixel first
    pub fn threshold_band(&self, layers: &[Raster], region: &Region) -> SarResult<ThresholdResult> {
        let matching: Vec<Raster> = layers
            .iter()
            .filter(|r| r.band() == self.params.band_name)
            .cloned()
            .collect();
        match matching.len() {
            0 => Err(SarError::MissingBand(format!(
                "'{}' not among [{}]",
                self.params.band_name,
                layers.iter().map(|r| r.band()).collect::<Vec<_>>().join(", ")
            ))),
            1 => self.threshold(&matching[0], region),
            _ => {
                let composite = mean_collection(&matching, &self.params.band_name)?;
                self.threshold(&composite, region)
            }
        }
    }

    /// Derive the threshold of `img` over `region` and classify it
    pub fn threshold(&self, img: &Raster, region: &Region) -> SarResult<ThresholdResult> {
        let p = &self.params;
        log::info!("Edge Otsu thresholding of '{}'", img.band());
        log::debug!("Algorithm parameters: {:?}", p);

        img.grid().transform.validate()?;
        let binary = img.lt(p.initial_threshold as f32).renamed("binary");
        let canny = CannyEdgeDetector::new(p.canny_threshold as f32, p.canny_sigma as f32).detect(&binary)?;

        let connected = canny
            .self_mask()
            .lt(p.canny_lt as f32)
            .connected_pixel_count(p.connected_pixels, true);
        let edges = connected.gte(p.edge_length as f32).self_mask();
        let edge_pixels = edges.valid_count();

        let (rows, cols) = img.dim();
        // A buffer wider than the raster covers it already
        let radius = (p.smooth_edges / img.nominal_scale_m())
            .round()
            .clamp(0.0, rows.max(cols) as f64) as usize;
        let buffer = edges.focal_max(radius, KernelShape::Square);
        let buffer_pixels = buffer.valid_count();
        log::debug!(
            "{} edge pixels kept, buffer of {} px radius covers {} pixels",
            edge_pixels,
            radius,
            buffer_pixels
        );

        let histogram_image = img.update_mask(&buffer)?;
        let reducer = RegionReducer::new(
            region,
            ReduceRegionOptions {
                scale: p.reduction_scale,
                max_pixels: p.max_pixels,
                tile_size: p.tile_size,
                cancel: self.cancel.clone(),
            },
        );
        let histogram = reducer.histogram(&histogram_image, &p.histogram_spec())?;
        let otsu = histogram.otsu()?;
        let threshold = otsu.threshold;

        let water = if p.invert {
            img.gt(threshold as f32)
        } else {
            img.lt(threshold as f32)
        }
        .renamed("water");

        log::info!("Calculated threshold for '{}': {:.4}", img.band(), threshold);

        let diagnostics = if p.verbose {
            log::info!(
                "Thresholding histogram: {} buckets, {} non-empty, total weight {:.1}",
                histogram.len(),
                histogram.non_empty_buckets(),
                histogram.total()
            );
            Some(ThresholdDiagnostics {
                params: p.clone(),
                edge_pixels,
                buffer_pixels,
                buffer_radius_px: radius,
                sample_mean: histogram.mean(),
                chart: histogram.chart_series(&otsu),
                bss: otsu.bss,
                histogram,
            })
        } else {
            None
        };

        Ok(ThresholdResult {
            threshold,
            water,
            diagnostics,
        })
    }
}
