use crate::core::raster::{Raster, EARTH_RADIUS_M};
use crate::types::{CoordinateSystem, GridSpec, SarError, SarResult, Units};
use ndarray::Array2;

/// DEM derivatives for the terrain filter
pub struct TerrainProcessor;

impl TerrainProcessor {
    /// Ground pixel spacing (dx, dy) in metres for a given row
    fn pixel_spacing(grid: &GridSpec, row: usize) -> (f64, f64) {
        let t = &grid.transform;
        match grid.coordinate_system {
            CoordinateSystem::Projected { .. } => (t.pixel_width.abs(), t.pixel_height.abs()),
            CoordinateSystem::Geographic => {
                let lat = t.top_left_y + (row as f64 + 0.5) * t.pixel_height;
                let dy = t.pixel_height.abs().to_radians() * EARTH_RADIUS_M;
                let dx = t.pixel_width.abs().to_radians() * EARTH_RADIUS_M * lat.to_radians().cos();
                (dx, dy)
            }
        }
    }

    /// Slope and aspect in degrees.
    ///
    /// Central differences on interior pixels; aspect is the downslope
    /// azimuth clockwise from north (0 on flat ground). Border pixels copy
    /// their nearest interior neighbour.
    pub fn slope_aspect(dem: &Raster) -> SarResult<(Raster, Raster)> {
        log::debug!("Calculating slope and aspect from DEM '{}'", dem.band());

        let (height, width) = dem.dim();
        if height < 3 || width < 3 {
            return Err(SarError::Processing(format!(
                "DEM of {}x{} is too small for slope computation",
                height, width
            )));
        }

        let mut slope = Array2::from_elem((height, width), f32::NAN);
        let mut aspect = Array2::from_elem((height, width), f32::NAN);
        let z = |i: usize, j: usize| dem.get(i, j).map(|v| v as f64);

        for i in 1..height - 1 {
            let (dx, dy) = Self::pixel_spacing(dem.grid(), i);
            for j in 1..width - 1 {
                if !dem.is_valid(i, j) {
                    continue;
                }
                let (Some(e), Some(w), Some(n), Some(s)) = (z(i, j + 1), z(i, j - 1), z(i - 1, j), z(i + 1, j))
                else {
                    continue;
                };
                let dz_east = (e - w) / (2.0 * dx);
                let dz_north = (n - s) / (2.0 * dy);

                slope[[i, j]] = (dz_east * dz_east + dz_north * dz_north).sqrt().atan().to_degrees() as f32;
                aspect[[i, j]] = if dz_east == 0.0 && dz_north == 0.0 {
                    0.0
                } else {
                    (-dz_east).atan2(-dz_north).to_degrees().rem_euclid(360.0) as f32
                };
            }
        }

        Self::fill_edge_values(&mut slope);
        Self::fill_edge_values(&mut aspect);

        let valid = dem.validity();
        let slope = Raster::with_validity("slope", Units::Unitless, *dem.grid(), slope, valid.clone())?;
        let aspect = Raster::with_validity("aspect", Units::Unitless, *dem.grid(), aspect, valid.clone())?;
        Ok((slope, aspect))
    }

    /// Fill edge values by copying from nearest interior pixels
    fn fill_edge_values(array: &mut Array2<f32>) {
        let (height, width) = array.dim();
        for j in 0..width {
            array[[0, j]] = array[[1, j]];
            array[[height - 1, j]] = array[[height - 2, j]];
        }
        for i in 0..height {
            array[[i, 0]] = array[[i, 1]];
            array[[i, width - 1]] = array[[i, width - 2]];
        }
    }

    /// Fill DEM voids by iterative neighbour averaging.
    ///
    /// A void is filled once at least three of its eight neighbours hold
    /// data; anything left after `max_iterations` passes takes the mean of
    /// all valid elevations.
    pub fn fill_voids(dem: &Raster, max_iterations: usize) -> SarResult<Raster> {
        let (height, width) = dem.dim();
        let mut values = dem.data().clone();
        let mut void_mask = dem.validity().mapv(|v| !v);
        let void_count = void_mask.iter().filter(|&&v| v).count();

        log::info!(
            "Found {} void pixels in DEM ({:.2}%)",
            void_count,
            void_count as f64 / (height * width).max(1) as f64 * 100.0
        );
        if void_count == 0 {
            return Ok(dem.clone());
        }
        if void_count == height * width {
            return Err(SarError::Processing("DEM has no valid elevations".to_string()));
        }

        let mut filled_count = 0;
        for iteration in 0..max_iterations {
            let snapshot_values = values.clone();
            let snapshot_mask = void_mask.clone();
            let mut changed = false;

            for i in 0..height {
                for j in 0..width {
                    if !snapshot_mask[[i, j]] {
                        continue;
                    }
                    let mut sum = 0.0f64;
                    let mut count = 0;
                    for di in -1isize..=1 {
                        for dj in -1isize..=1 {
                            if di == 0 && dj == 0 {
                                continue;
                            }
                            let ni = i as isize + di;
                            let nj = j as isize + dj;
                            if ni < 0 || nj < 0 || ni >= height as isize || nj >= width as isize {
                                continue;
                            }
                            let (ni, nj) = (ni as usize, nj as usize);
                            if !snapshot_mask[[ni, nj]] {
                                sum += snapshot_values[[ni, nj]] as f64;
                                count += 1;
                            }
                        }
                    }
                    if count >= 3 {
                        values[[i, j]] = (sum / count as f64) as f32;
                        void_mask[[i, j]] = false;
                        filled_count += 1;
                        changed = true;
                    }
                }
            }

            if !changed {
                break;
            }
            log::debug!("Iteration {}: filled {} pixels", iteration + 1, filled_count);
        }

        let (valid_sum, valid_count) = values
            .iter()
            .zip(void_mask.iter())
            .filter(|(_, &void)| !void)
            .fold((0.0f64, 0usize), |(s, n), (&v, _)| (s + v as f64, n + 1));
        let global_mean = (valid_sum / valid_count as f64) as f32;
        for (v, void) in values.iter_mut().zip(void_mask.iter()) {
            if *void {
                *v = global_mean;
                filled_count += 1;
            }
        }

        log::info!("Filled {} total void pixels", filled_count);
        Raster::new(dem.band(), dem.units(), *dem.grid(), values)
    }
}
