//! Fixed-weight kernels and neighbourhood reductions.
//!
//! Kernel coordinates are (row, col) with the anchor at `(anchor_row,
//! anchor_col)`; a weight at kernel cell `(kr, kc)` samples the image at
//! offset `(kr - anchor_row, kc - anchor_col)`. Neighbourhoods are truncated
//! at the raster border and only valid samples contribute.

use crate::core::raster::Raster;
use crate::types::{SarError, SarResult, Units};
use ndarray::Array2;

/// Neighbourhood reducers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reducer {
    Mean,
    /// Weighted population variance (divides by the tap weight sum)
    Variance,
    Max,
    Sum,
}

/// Shape of morphological kernels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelShape {
    Square,
    Circle,
}

/// Fixed 2D weight template
#[derive(Debug, Clone, PartialEq)]
pub struct Kernel {
    weights: Array2<f32>,
    anchor_row: usize,
    anchor_col: usize,
}

impl Kernel {
    /// Kernel from row-major weights
    pub fn fixed(
        rows: usize,
        cols: usize,
        weights: &[f32],
        anchor_row: usize,
        anchor_col: usize,
    ) -> SarResult<Self> {
        if weights.len() != rows * cols {
            return Err(SarError::InvalidParameter(format!(
                "kernel {}x{} needs {} weights, got {}",
                rows,
                cols,
                rows * cols,
                weights.len()
            )));
        }
        if anchor_row >= rows || anchor_col >= cols {
            return Err(SarError::InvalidParameter(format!(
                "kernel anchor ({}, {}) outside {}x{} kernel",
                anchor_row, anchor_col, rows, cols
            )));
        }
        let weights = Array2::from_shape_vec((rows, cols), weights.to_vec())
            .map_err(|e| SarError::InvalidParameter(format!("Failed to shape kernel: {}", e)))?;
        Ok(Self { weights, anchor_row, anchor_col })
    }

    /// Square of ones with side 2 * radius + 1
    pub fn square(radius: usize) -> Self {
        let size = 2 * radius + 1;
        Self {
            weights: Array2::ones((size, size)),
            anchor_row: radius,
            anchor_col: radius,
        }
    }

    /// Disc of ones with the given radius in pixels
    pub fn circle(radius: usize) -> Self {
        let size = 2 * radius + 1;
        let r = radius as f32 + 0.5;
        let weights = Array2::from_shape_fn((size, size), |(i, j)| {
            let di = i as f32 - radius as f32;
            let dj = j as f32 - radius as f32;
            if di * di + dj * dj <= r * r {
                1.0
            } else {
                0.0
            }
        });
        Self { weights, anchor_row: radius, anchor_col: radius }
    }

    pub fn shaped(shape: KernelShape, radius: usize) -> Self {
        match shape {
            KernelShape::Square => Self::square(radius),
            KernelShape::Circle => Self::circle(radius),
        }
    }

    pub fn dim(&self) -> (usize, usize) {
        self.weights.dim()
    }

    pub fn anchor(&self) -> (usize, usize) {
        (self.anchor_row, self.anchor_col)
    }

    pub fn weights(&self) -> &Array2<f32> {
        &self.weights
    }

    /// Rotate by 90 degree steps; positive turns are clockwise
    pub fn rotate(&self, quarter_turns: i32) -> Self {
        let mut k = self.clone();
        for _ in 0..quarter_turns.rem_euclid(4) {
            k = k.rotate_clockwise();
        }
        k
    }

    fn rotate_clockwise(&self) -> Self {
        let (rows, cols) = self.weights.dim();
        // new[r][c] = old[rows - 1 - c][r]
        let weights = Array2::from_shape_fn((cols, rows), |(r, c)| self.weights[[rows - 1 - c, r]]);
        Self {
            weights,
            anchor_row: self.anchor_col,
            anchor_col: rows - 1 - self.anchor_row,
        }
    }

    /// Non-zero taps as (d_row, d_col, weight)
    pub fn taps(&self) -> Vec<(isize, isize, f32)> {
        self.weights
            .indexed_iter()
            .filter(|(_, &w)| w != 0.0)
            .map(|((r, c), &w)| {
                (
                    r as isize - self.anchor_row as isize,
                    c as isize - self.anchor_col as isize,
                    w,
                )
            })
            .collect()
    }
}

/// Reduce the valid in-bounds neighbourhood of (row, col)
pub(crate) fn reduce_at(
    raster: &Raster,
    row: usize,
    col: usize,
    taps: &[(isize, isize, f32)],
    reducer: Reducer,
) -> Option<f32> {
    let (rows, cols) = raster.dim();
    let data = raster.data();
    let valid = raster.validity();

    let mut w_sum = 0.0f64;
    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    let mut max = f32::NEG_INFINITY;

    for &(dr, dc, w) in taps {
        let r = row as isize + dr;
        let c = col as isize + dc;
        if r < 0 || c < 0 || r >= rows as isize || c >= cols as isize {
            continue;
        }
        let (r, c) = (r as usize, c as usize);
        if !valid[[r, c]] {
            continue;
        }
        let v = data[[r, c]];
        let w = w as f64;
        w_sum += w;
        sum += w * v as f64;
        sum_sq += w * (v as f64) * (v as f64);
        if v > max {
            max = v;
        }
    }

    if w_sum <= 0.0 {
        return None;
    }

    let value = match reducer {
        Reducer::Mean => sum / w_sum,
        Reducer::Sum => sum,
        Reducer::Max => max as f64,
        Reducer::Variance => ((sum_sq - sum * sum / w_sum) / w_sum).max(0.0),
    };
    Some(value as f32)
}

impl Raster {
    /// Neighbourhood reduction evaluated at every valid pixel
    pub fn reduce_neighborhood(&self, reducer: Reducer, kernel: &Kernel) -> Raster {
        let taps = kernel.taps();
        let (rows, cols) = self.dim();
        let units = match reducer {
            Reducer::Variance => Units::Unitless,
            _ => self.units(),
        };

        let reduce_row = |i: usize| -> Vec<Option<f32>> {
            (0..cols)
                .map(|j| {
                    if self.is_valid(i, j) {
                        reduce_at(self, i, j, &taps, reducer)
                    } else {
                        None
                    }
                })
                .collect()
        };

        #[cfg(feature = "parallel")]
        let values: Vec<Vec<Option<f32>>> = {
            use rayon::prelude::*;
            (0..rows).into_par_iter().map(reduce_row).collect()
        };
        #[cfg(not(feature = "parallel"))]
        let values: Vec<Vec<Option<f32>>> = (0..rows).map(reduce_row).collect();

        Raster::from_fn(self.band(), units, *self.grid(), |i, j| values[i][j])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CoordinateSystem, GeoTransform, GridSpec};
    use approx::assert_relative_eq;
    use ndarray::array;

    fn grid(rows: usize, cols: usize) -> GridSpec {
        GridSpec::new(
            rows,
            cols,
            GeoTransform::north_up(0.0, 0.0, 10.0, -10.0),
            CoordinateSystem::Projected { epsg: 3857 },
        )
    }

    #[test]
    fn test_rotation_moves_filled_half() {
        // Bottom two rows filled, anchored at the centre
        let k = Kernel::fixed(3, 3, &[0., 0., 0., 1., 1., 1., 1., 1., 1.], 1, 1).unwrap();
        let cw = k.rotate(1);
        // Clockwise quarter turn moves the bottom half to the left
        assert_eq!(cw.weights(), &array![[1., 1., 0.], [1., 1., 0.], [1., 1., 0.]]);
        assert_eq!(cw.anchor(), (1, 1));
        assert_eq!(k.rotate(4), k);
        assert_eq!(k.rotate(-1), k.rotate(3));
    }

    #[test]
    fn test_rotation_of_asymmetric_anchor() {
        let k = Kernel::fixed(1, 3, &[1., 2., 3.], 0, 0).unwrap();
        let cw = k.rotate(1);
        assert_eq!(cw.dim(), (3, 1));
        assert_eq!(cw.weights(), &array![[1.], [2.], [3.]]);
        assert_eq!(cw.anchor(), (0, 0));
    }

    #[test]
    fn test_bad_kernel_rejected() {
        assert!(Kernel::fixed(3, 3, &[1.0; 8], 1, 1).is_err());
        assert!(Kernel::fixed(3, 3, &[1.0; 9], 3, 1).is_err());
    }

    #[test]
    fn test_mean_and_variance_truncate_at_border() {
        let r = Raster::new(
            "x",
            Units::Power,
            grid(3, 3),
            array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]],
        )
        .unwrap();
        let k = Kernel::square(1);
        let mean = r.reduce_neighborhood(Reducer::Mean, &k);
        assert_relative_eq!(mean.get(1, 1).unwrap(), 5.0);
        // Corner only sees 1, 2, 4, 5
        assert_relative_eq!(mean.get(0, 0).unwrap(), 3.0);

        let var = r.reduce_neighborhood(Reducer::Variance, &k);
        assert_relative_eq!(var.get(1, 1).unwrap(), 60.0 / 9.0, epsilon = 1e-5);

        let max = r.reduce_neighborhood(Reducer::Max, &k);
        assert_eq!(max.get(0, 0), Some(5.0));
        let sum = r.reduce_neighborhood(Reducer::Sum, &k);
        assert_eq!(sum.get(2, 2), Some(28.0));
    }

    #[test]
    fn test_variance_divides_by_tap_count() {
        let r = Raster::new("x", Units::Power, grid(1, 3), array![[2.0, f32::NAN, 4.0]]).unwrap();
        let k = Kernel::square(1);
        let var = r.reduce_neighborhood(Reducer::Variance, &k);
        // A lone tap has no spread
        assert_eq!(var.get(0, 0), Some(0.0));
        // Corner sees 1, 2, 4, 5: mean 3, squared deviations sum to 10
        let grid3 = Raster::new(
            "x",
            Units::Power,
            grid(3, 3),
            array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]],
        )
        .unwrap();
        let var3 = grid3.reduce_neighborhood(Reducer::Variance, &k);
        assert_relative_eq!(var3.get(0, 0).unwrap(), 2.5, epsilon = 1e-6);
    }

    #[test]
    fn test_invalid_neighbours_are_skipped() {
        let r = Raster::new("x", Units::Power, grid(1, 3), array![[2.0, f32::NAN, 4.0]]).unwrap();
        let mean = r.reduce_neighborhood(Reducer::Mean, &Kernel::square(1));
        assert_eq!(mean.get(0, 0), Some(2.0));
        assert_eq!(mean.get(0, 1), None);
        assert_eq!(mean.get(0, 2), Some(4.0));
        assert_eq!(mean.valid_count(), r.valid_count());
    }

    #[test]
    fn test_circle_kernel() {
        let k = Kernel::circle(2);
        assert_eq!(k.dim(), (5, 5));
        assert_eq!(k.weights()[[2, 2]], 1.0);
        assert_eq!(k.weights()[[0, 2]], 1.0);
        assert_eq!(k.weights()[[0, 0]], 0.0);
    }
}
