//! Canny edge detection on single-band rasters.
//!
//! Gaussian smoothing, Sobel gradients, non-maximum suppression along the
//! quantised gradient direction and a single magnitude threshold. The output
//! carries the gradient magnitude at edge pixels and 0 elsewhere.

use crate::core::raster::Raster;
use crate::types::{SarError, SarResult, Units};
use ndarray::{Array2, Zip};

const TAN_22_5: f32 = 0.414_213_57;
const TAN_67_5: f32 = 2.414_213_7;

/// Canny detector parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CannyEdgeDetector {
    /// Gradient magnitude an edge must exceed
    pub threshold: f32,
    /// Gaussian blur sigma in pixels; 0 disables smoothing
    pub sigma: f32,
}

impl Default for CannyEdgeDetector {
    fn default() -> Self {
        Self {
            threshold: 1.0,
            sigma: 1.0,
        }
    }
}

impl CannyEdgeDetector {
    pub fn new(threshold: f32, sigma: f32) -> Self {
        Self { threshold, sigma }
    }

    /// Detect edges; validity of the result follows the input
    pub fn detect(&self, raster: &Raster) -> SarResult<Raster> {
        if !self.sigma.is_finite() || self.sigma < 0.0 {
            return Err(SarError::InvalidParameter(format!("canny sigma must be >= 0, got {}", self.sigma)));
        }
        if !self.threshold.is_finite() {
            return Err(SarError::InvalidParameter("canny threshold must be finite".to_string()));
        }

        let smoothed = gaussian_blur(raster.data(), raster.validity(), self.sigma);
        let (gx, gy) = sobel(&smoothed);
        let edges = non_max_suppression(&gx, &gy, self.threshold);

        let valid = raster.validity();
        let out = Raster::from_fn(raster.band(), Units::Unitless, *raster.grid(), |r, c| {
            if valid[[r, c]] {
                Some(edges[[r, c]])
            } else {
                None
            }
        });

        log::debug!(
            "Canny on '{}' (threshold {}, sigma {}): {} edge pixels",
            raster.band(),
            self.threshold,
            self.sigma,
            out.count_nonzero()
        );
        Ok(out)
    }
}

fn gaussian_weights(sigma: f32) -> Vec<f32> {
    let radius = (3.0 * sigma).ceil() as isize;
    let two_s2 = 2.0 * sigma * sigma;
    (-radius..=radius)
        .map(|k| (-((k * k) as f32) / two_s2).exp())
        .collect()
}

/// Separable 1D pass along rows (`axis` 1) or columns (`axis` 0)
fn convolve_axis(src: &Array2<f32>, weights: &[f32], axis: usize) -> Array2<f32> {
    let (rows, cols) = src.dim();
    let radius = (weights.len() / 2) as isize;
    let mut out = Array2::zeros((rows, cols));

    let tap = |r: usize, c: usize| -> f32 {
        let mut acc = 0.0;
        for (k, &w) in weights.iter().enumerate() {
            let off = k as isize - radius;
            let (rr, cc) = if axis == 1 {
                (r as isize, c as isize + off)
            } else {
                (r as isize + off, c as isize)
            };
            if rr >= 0 && cc >= 0 && rr < rows as isize && cc < cols as isize {
                acc += w * src[[rr as usize, cc as usize]];
            }
        }
        acc
    };

    #[cfg(feature = "parallel")]
    Zip::indexed(&mut out).par_for_each(|(r, c), o| *o = tap(r, c));
    #[cfg(not(feature = "parallel"))]
    Zip::indexed(&mut out).for_each(|(r, c), o| *o = tap(r, c));

    out
}

/// Gaussian smoothing renormalised over valid in-bounds taps
fn gaussian_blur(data: &Array2<f32>, valid: &Array2<bool>, sigma: f32) -> Array2<f32> {
    let mut values = Array2::zeros(data.dim());
    let mut mask = Array2::zeros(data.dim());
    Zip::from(&mut values)
        .and(&mut mask)
        .and(data)
        .and(valid)
        .for_each(|v, m, &d, &ok| {
            if ok {
                *v = d;
                *m = 1.0f32;
            }
        });

    if sigma == 0.0 {
        return values;
    }

    let weights = gaussian_weights(sigma);
    let num = convolve_axis(&convolve_axis(&values, &weights, 1), &weights, 0);
    let den = convolve_axis(&convolve_axis(&mask, &weights, 1), &weights, 0);

    let mut out = Array2::zeros(data.dim());
    Zip::from(&mut out).and(&num).and(&den).for_each(|o, &n, &d| {
        if d > 0.0 {
            *o = n / d;
        }
    });
    out
}

/// Unnormalised Sobel gradients with replicated borders
fn sobel(src: &Array2<f32>) -> (Array2<f32>, Array2<f32>) {
    let (rows, cols) = src.dim();
    let mut gx = Array2::zeros((rows, cols));
    let mut gy = Array2::zeros((rows, cols));
    if rows == 0 || cols == 0 {
        return (gx, gy);
    }

    for r in 0..rows {
        let rm = r.saturating_sub(1);
        let rp = (r + 1).min(rows - 1);
        for c in 0..cols {
            let cm = c.saturating_sub(1);
            let cp = (c + 1).min(cols - 1);

            let p00 = src[[rm, cm]];
            let p01 = src[[rm, c]];
            let p02 = src[[rm, cp]];
            let p10 = src[[r, cm]];
            let p12 = src[[r, cp]];
            let p20 = src[[rp, cm]];
            let p21 = src[[rp, c]];
            let p22 = src[[rp, cp]];

            gx[[r, c]] = (p02 + 2.0 * p12 + p22) - (p00 + 2.0 * p10 + p20);
            gy[[r, c]] = (p20 + 2.0 * p21 + p22) - (p00 + 2.0 * p01 + p02);
        }
    }
    (gx, gy)
}

/// Thin edges to local maxima along the gradient and apply the threshold.
///
/// A pixel survives when its magnitude is at least that of the neighbour
/// before it and strictly greater than the neighbour after it (row-major
/// order), so plateaus two pixels wide keep the later pixel.
fn non_max_suppression(gx: &Array2<f32>, gy: &Array2<f32>, threshold: f32) -> Array2<f32> {
    let (rows, cols) = gx.dim();
    let mut mag = Array2::zeros((rows, cols));
    Zip::from(&mut mag).and(gx).and(gy).for_each(|m, &x, &y| *m = (x * x + y * y).sqrt());

    let at = |r: isize, c: isize| -> f32 {
        if r < 0 || c < 0 || r >= rows as isize || c >= cols as isize {
            0.0
        } else {
            mag[[r as usize, c as usize]]
        }
    };

    let mut out = Array2::zeros((rows, cols));
    let keep = |(r, c): (usize, usize), o: &mut f32| {
        let m = mag[[r, c]];
        if m <= threshold {
            return;
        }
        let x = gx[[r, c]];
        let y = gy[[r, c]];
        let (ax, ay) = (x.abs(), y.abs());
        let (r, c) = (r as isize, c as isize);

        let (before, after) = if ay <= ax * TAN_22_5 {
            (at(r, c - 1), at(r, c + 1))
        } else if ay >= ax * TAN_67_5 {
            (at(r - 1, c), at(r + 1, c))
        } else if x * y > 0.0 {
            (at(r - 1, c - 1), at(r + 1, c + 1))
        } else {
            (at(r - 1, c + 1), at(r + 1, c - 1))
        };

        if m >= before && m > after {
            *o = m;
        }
    };

    #[cfg(feature = "parallel")]
    Zip::indexed(&mut out).par_for_each(keep);
    #[cfg(not(feature = "parallel"))]
    Zip::indexed(&mut out).for_each(keep);

    out
}
