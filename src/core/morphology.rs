//! Connectivity counting and focal dilation on rasters.

use crate::core::kernel::{Kernel, KernelShape};
use crate::core::raster::Raster;
use crate::types::Units;
use ndarray::Array2;
use std::collections::VecDeque;

const NEIGHBOURS_4: [(isize, isize); 4] = [(-1, 0), (0, -1), (0, 1), (1, 0)];
const NEIGHBOURS_8: [(isize, isize); 8] = [
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, -1),
    (0, 1),
    (1, -1),
    (1, 0),
    (1, 1),
];

impl Raster {
    /// Size of the connected component of same-valued valid pixels each
    /// pixel belongs to, capped at `max_size`.
    ///
    /// Components are labelled once with a breadth-first flood fill; every
    /// member of a component receives `min(size, max_size)`.
    pub fn connected_pixel_count(&self, max_size: usize, eight_connected: bool) -> Raster {
        let (rows, cols) = self.dim();
        let data = self.data();
        let valid = self.validity();
        let neighbours: &[(isize, isize)] = if eight_connected { &NEIGHBOURS_8 } else { &NEIGHBOURS_4 };

        let mut counts: Array2<f32> = Array2::from_elem((rows, cols), f32::NAN);
        let mut visited = Array2::from_elem((rows, cols), false);
        let mut queue = VecDeque::new();
        let mut members = Vec::new();
        let mut components = 0usize;

        for i in 0..rows {
            for j in 0..cols {
                if visited[[i, j]] || !valid[[i, j]] {
                    continue;
                }
                let value = data[[i, j]];
                visited[[i, j]] = true;
                queue.push_back((i, j));
                members.clear();

                while let Some((r, c)) = queue.pop_front() {
                    members.push((r, c));
                    for &(dr, dc) in neighbours {
                        let nr = r as isize + dr;
                        let nc = c as isize + dc;
                        if nr < 0 || nc < 0 || nr >= rows as isize || nc >= cols as isize {
                            continue;
                        }
                        let (nr, nc) = (nr as usize, nc as usize);
                        if !visited[[nr, nc]] && valid[[nr, nc]] && data[[nr, nc]] == value {
                            visited[[nr, nc]] = true;
                            queue.push_back((nr, nc));
                        }
                    }
                }

                let size = members.len().min(max_size) as f32;
                for &(r, c) in &members {
                    counts[[r, c]] = size;
                }
                components += 1;
            }
        }

        log::debug!(
            "Connected pixel count on '{}': {} components (cap {})",
            self.band(),
            components,
            max_size
        );

        Raster::from_fn(self.band(), Units::Unitless, *self.grid(), |i, j| {
            Some(counts[[i, j]]).filter(|v| v.is_finite())
        })
    }

    /// Focal maximum (grey-level dilation) with a square or circular kernel.
    ///
    /// Unlike neighbourhood reductions, the output is valid wherever any
    /// valid input sample falls inside the kernel, so the valid footprint
    /// grows with the dilation.
    pub fn focal_max(&self, radius: usize, shape: KernelShape) -> Raster {
        let taps = Kernel::shaped(shape, radius).taps();
        let (rows, cols) = self.dim();
        let data = self.data();
        let valid = self.validity();

        let dilate_row = |i: usize| -> Vec<Option<f32>> {
            (0..cols)
                .map(|j| {
                    let mut best: Option<f32> = None;
                    for &(dr, dc, _) in &taps {
                        let r = i as isize + dr;
                        let c = j as isize + dc;
                        if r < 0 || c < 0 || r >= rows as isize || c >= cols as isize {
                            continue;
                        }
                        let (r, c) = (r as usize, c as usize);
                        if valid[[r, c]] {
                            let v = data[[r, c]];
                            best = Some(best.map_or(v, |b| b.max(v)));
                        }
                    }
                    best
                })
                .collect()
        };

        #[cfg(feature = "parallel")]
        let values: Vec<Vec<Option<f32>>> = {
            use rayon::prelude::*;
            (0..rows).into_par_iter().map(dilate_row).collect()
        };
        #[cfg(not(feature = "parallel"))]
        let values: Vec<Vec<Option<f32>>> = (0..rows).map(dilate_row).collect();

        Raster::from_fn(self.band(), self.units(), *self.grid(), |i, j| values[i][j])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CoordinateSystem, GeoTransform, GridSpec};
    use ndarray::array;

    fn grid(rows: usize, cols: usize) -> GridSpec {
        GridSpec::new(
            rows,
            cols,
            GeoTransform::north_up(0.0, rows as f64 * 10.0, 10.0, -10.0),
            CoordinateSystem::Projected { epsg: 32642 },
        )
    }

    #[test]
    fn test_connected_count_groups_same_values() {
        let r = Raster::new(
            "m",
            Units::Unitless,
            grid(3, 4),
            array![
                [1.0, 1.0, 0.0, 1.0],
                [0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0]
            ],
        )
        .unwrap();

        let eight = r.connected_pixel_count(100, true);
        // (2,2) touches (1,1) diagonally
        assert_eq!(eight.get(0, 0), Some(4.0));
        assert_eq!(eight.get(2, 2), Some(4.0));
        assert_eq!(eight.get(0, 3), Some(1.0));
        // all seven zeros link up through the (2,1)-(1,2) diagonal
        assert_eq!(eight.get(1, 0), Some(7.0));
        assert_eq!(eight.get(1, 3), Some(7.0));

        let four = r.connected_pixel_count(100, false);
        assert_eq!(four.get(0, 0), Some(3.0));
        assert_eq!(four.get(2, 2), Some(1.0));
    }

    #[test]
    fn test_connected_count_is_capped_and_skips_invalid() {
        let mut data = Array2::from_elem((10, 10), 1.0f32);
        data[[0, 0]] = f32::NAN;
        let r = Raster::new("m", Units::Unitless, grid(10, 10), data).unwrap();
        let counts = r.connected_pixel_count(30, true);
        assert_eq!(counts.get(5, 5), Some(30.0));
        assert_eq!(counts.get(0, 0), None);
        assert_eq!(counts.valid_count(), 99);
    }

    #[test]
    fn test_focal_max_dilates_footprint() {
        let r = Raster::new(
            "e",
            Units::Unitless,
            grid(5, 5),
            Array2::from_shape_fn((5, 5), |(i, j)| if i == 2 && j == 2 { 3.0 } else { f32::NAN }),
        )
        .unwrap();

        let square = r.focal_max(1, KernelShape::Square);
        assert_eq!(square.valid_count(), 9);
        assert_eq!(square.get(1, 1), Some(3.0));
        assert_eq!(square.get(0, 0), None);

        let disc = r.focal_max(2, KernelShape::Circle);
        assert_eq!(disc.get(0, 2), Some(3.0));
        assert_eq!(disc.get(0, 0), None);
    }

    #[test]
    fn test_focal_max_takes_largest_neighbour() {
        let r = Raster::new("v", Units::Unitless, grid(1, 4), array![[0.0, 5.0, 0.0, 0.0]]).unwrap();
        let d = r.focal_max(1, KernelShape::Square);
        assert_eq!(d.data().as_slice().unwrap(), &[5.0, 5.0, 5.0, 0.0]);
    }
}
