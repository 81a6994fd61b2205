use crate::types::{CoordinateSystem, GridSpec, SarError, SarResult, Units};
use ndarray::{Array2, Zip};

/// Mean Earth radius (authalic sphere) in metres
pub const EARTH_RADIUS_M: f64 = 6_371_007.2;

/// Convert a decibel value to natural power units
pub fn db_to_power(db: f32) -> f32 {
    10.0_f32.powf(db / 10.0)
}

/// Convert a natural power value to decibels
pub fn power_to_db(power: f32) -> f32 {
    10.0 * power.log10()
}

/// Single-band raster with per-pixel validity.
///
/// Invalid ("nodata") samples are stored as NaN and flagged false in the
/// validity array. Every pixel-wise operation between two rasters requires
/// identical [`GridSpec`]s and fails with [`SarError::GridMismatch`] otherwise.
/// Masks are rasters whose valid samples carry 0/1 values; "update mask"
/// operations intersect validity and never add pixels back.
#[derive(Debug, Clone)]
pub struct Raster {
    band: String,
    units: Units,
    grid: GridSpec,
    data: Array2<f32>,
    valid: Array2<bool>,
}

impl Raster {
    /// Create a raster; non-finite samples become invalid
    pub fn new(band: &str, units: Units, grid: GridSpec, mut data: Array2<f32>) -> SarResult<Self> {
        if data.dim() != grid.dim() {
            return Err(SarError::GridMismatch {
                expected: grid.describe(),
                found: format!("{}x{} array", data.nrows(), data.ncols()),
            });
        }
        let valid = data.mapv(|v| v.is_finite());
        data.mapv_inplace(|v| if v.is_finite() { v } else { f32::NAN });
        Ok(Self { band: band.to_string(), units, grid, data, valid })
    }

    /// Create a raster with an explicit validity layer
    pub fn with_validity(
        band: &str,
        units: Units,
        grid: GridSpec,
        mut data: Array2<f32>,
        mut valid: Array2<bool>,
    ) -> SarResult<Self> {
        if data.dim() != grid.dim() || valid.dim() != grid.dim() {
            return Err(SarError::GridMismatch {
                expected: grid.describe(),
                found: format!(
                    "{}x{} data / {}x{} validity",
                    data.nrows(),
                    data.ncols(),
                    valid.nrows(),
                    valid.ncols()
                ),
            });
        }
        Zip::from(&mut data).and(&mut valid).for_each(|d, v| {
            if !d.is_finite() {
                *v = false;
            }
            if !*v {
                *d = f32::NAN;
            }
        });
        Ok(Self { band: band.to_string(), units, grid, data, valid })
    }

    /// Constant raster, valid everywhere
    pub fn filled(band: &str, units: Units, grid: GridSpec, value: f32) -> Self {
        Self {
            band: band.to_string(),
            units,
            grid,
            data: Array2::from_elem(grid.dim(), value),
            valid: Array2::from_elem(grid.dim(), value.is_finite()),
        }
    }

    /// Build a raster from a per-pixel generator; `None` marks the pixel invalid
    pub fn from_fn<F>(band: &str, units: Units, grid: GridSpec, f: F) -> Self
    where
        F: Fn(usize, usize) -> Option<f32>,
    {
        let mut data = Array2::from_elem(grid.dim(), f32::NAN);
        let mut valid = Array2::from_elem(grid.dim(), false);
        Zip::indexed(&mut data).and(&mut valid).for_each(|(r, c), d, v| {
            if let Some(value) = f(r, c).filter(|x| x.is_finite()) {
                *d = value;
                *v = true;
            }
        });
        Self { band: band.to_string(), units, grid, data, valid }
    }

    pub fn band(&self) -> &str {
        &self.band
    }

    pub fn units(&self) -> Units {
        self.units
    }

    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    pub fn data(&self) -> &Array2<f32> {
        &self.data
    }

    pub fn validity(&self) -> &Array2<bool> {
        &self.valid
    }

    pub fn dim(&self) -> (usize, usize) {
        self.data.dim()
    }

    /// Sample at (row, col) if in bounds and valid
    pub fn get(&self, row: usize, col: usize) -> Option<f32> {
        match self.valid.get((row, col)) {
            Some(true) => Some(self.data[[row, col]]),
            _ => None,
        }
    }

    pub fn is_valid(&self, row: usize, col: usize) -> bool {
        self.valid.get((row, col)).copied().unwrap_or(false)
    }

    pub fn valid_count(&self) -> usize {
        self.valid.iter().filter(|&&v| v).count()
    }

    /// Number of valid samples with a non-zero value
    pub fn count_nonzero(&self) -> usize {
        Zip::from(&self.data)
            .and(&self.valid)
            .fold(0, |acc, &d, &v| if v && d != 0.0 { acc + 1 } else { acc })
    }

    pub fn renamed(mut self, band: &str) -> Self {
        self.band = band.to_string();
        self
    }

    pub fn ensure_same_grid(&self, other: &Raster) -> SarResult<()> {
        if self.grid != other.grid {
            return Err(SarError::GridMismatch {
                expected: format!("'{}' {}", self.band, self.grid.describe()),
                found: format!("'{}' {}", other.band, other.grid.describe()),
            });
        }
        Ok(())
    }

    /// Apply `f` to every valid sample; non-finite results become invalid
    pub fn map_valid<F>(&self, units: Units, f: F) -> Raster
    where
        F: Fn(f32) -> f32,
    {
        let mut data = Array2::from_elem(self.dim(), f32::NAN);
        let mut valid = Array2::from_elem(self.dim(), false);
        Zip::from(&mut data)
            .and(&mut valid)
            .and(&self.data)
            .and(&self.valid)
            .for_each(|d, v, &x, &ok| {
                if ok {
                    let y = f(x);
                    if y.is_finite() {
                        *d = y;
                        *v = true;
                    }
                }
            });
        Raster { band: self.band.clone(), units, grid: self.grid, data, valid }
    }

    /// Combine two aligned rasters pixel by pixel; valid where both inputs are valid
    pub fn zip_map<F>(&self, other: &Raster, units: Units, f: F) -> SarResult<Raster>
    where
        F: Fn(f32, f32) -> f32,
    {
        self.ensure_same_grid(other)?;
        let mut data = Array2::from_elem(self.dim(), f32::NAN);
        let mut valid = Array2::from_elem(self.dim(), false);
        Zip::from(&mut data)
            .and(&mut valid)
            .and(&self.data)
            .and(&self.valid)
            .and(&other.data)
            .and(&other.valid)
            .for_each(|d, v, &a, &a_ok, &b, &b_ok| {
                if a_ok && b_ok {
                    let y = f(a, b);
                    if y.is_finite() {
                        *d = y;
                        *v = true;
                    }
                }
            });
        Ok(Raster { band: self.band.clone(), units, grid: self.grid, data, valid })
    }

    pub fn add(&self, other: &Raster) -> SarResult<Raster> {
        self.zip_map(other, self.units, |a, b| a + b)
    }

    pub fn subtract(&self, other: &Raster) -> SarResult<Raster> {
        self.zip_map(other, self.units, |a, b| a - b)
    }

    pub fn multiply(&self, other: &Raster) -> SarResult<Raster> {
        self.zip_map(other, self.units, |a, b| a * b)
    }

    /// Division; pixels with a zero divisor become invalid
    pub fn divide(&self, other: &Raster) -> SarResult<Raster> {
        self.zip_map(other, self.units, |a, b| a / b)
    }

    pub fn powf(&self, exponent: f32) -> Raster {
        self.map_valid(self.units, |v| v.powf(exponent))
    }

    pub fn log10(&self) -> Raster {
        self.map_valid(Units::Unitless, |v| v.log10())
    }

    /// dB -> natural power
    pub fn to_power(&self) -> SarResult<Raster> {
        if self.units != Units::Decibel {
            return Err(SarError::InvalidParameter(format!(
                "band '{}' is {:?}, expected decibel input",
                self.band, self.units
            )));
        }
        Ok(self.map_valid(Units::Power, db_to_power))
    }

    /// Natural power -> dB
    pub fn to_db(&self) -> SarResult<Raster> {
        if self.units != Units::Power {
            return Err(SarError::InvalidParameter(format!(
                "band '{}' is {:?}, expected power input",
                self.band, self.units
            )));
        }
        Ok(self.map_valid(Units::Decibel, power_to_db))
    }

    fn compare<F>(&self, f: F) -> Raster
    where
        F: Fn(f32) -> bool,
    {
        self.map_valid(Units::Unitless, |v| if f(v) { 1.0 } else { 0.0 })
    }

    pub fn lt(&self, value: f32) -> Raster {
        self.compare(|v| v < value)
    }

    pub fn gt(&self, value: f32) -> Raster {
        self.compare(|v| v > value)
    }

    pub fn gte(&self, value: f32) -> Raster {
        self.compare(|v| v >= value)
    }

    pub fn eq_value(&self, value: f32) -> Raster {
        self.compare(|v| v == value)
    }

    /// Logical NOT of a 0/1 layer
    pub fn not(&self) -> Raster {
        self.compare(|v| v == 0.0)
    }

    /// Logical AND of two 0/1 layers; valid where both are valid
    pub fn and(&self, other: &Raster) -> SarResult<Raster> {
        self.zip_map(other, Units::Unitless, |a, b| {
            if a != 0.0 && b != 0.0 {
                1.0
            } else {
                0.0
            }
        })
    }

    /// Keep pixels where `mask` is valid and non-zero; everything else becomes invalid
    pub fn update_mask(&self, mask: &Raster) -> SarResult<Raster> {
        self.ensure_same_grid(mask)?;
        let mut out = self.clone();
        Zip::from(&mut out.data)
            .and(&mut out.valid)
            .and(&mask.data)
            .and(&mask.valid)
            .for_each(|d, v, &m, &m_ok| {
                if !(m_ok && m != 0.0) {
                    *v = false;
                    *d = f32::NAN;
                }
            });
        Ok(out)
    }

    /// Mask the raster with itself: zero-valued pixels become invalid
    pub fn self_mask(&self) -> Raster {
        let mut out = self.clone();
        Zip::from(&mut out.data).and(&mut out.valid).for_each(|d, v| {
            if *v && *d == 0.0 {
                *v = false;
                *d = f32::NAN;
            }
        });
        out
    }

    /// Replace valid samples with `value` where `condition` is valid and non-zero
    pub fn where_mask(&self, condition: &Raster, value: f32) -> SarResult<Raster> {
        self.ensure_same_grid(condition)?;
        let mut out = self.clone();
        Zip::from(&mut out.data)
            .and(&out.valid)
            .and(&condition.data)
            .and(&condition.valid)
            .for_each(|d, &v, &c, &c_ok| {
                if v && c_ok && c != 0.0 {
                    *d = value;
                }
            });
        Ok(out)
    }

    /// Nominal pixel size in metres (north-south extent for geographic grids)
    pub fn nominal_scale_m(&self) -> f64 {
        nominal_scale_m(&self.grid)
    }

    /// Ground area of one pixel in row `row`, in square metres
    pub fn pixel_area_m2(&self, row: usize) -> f64 {
        pixel_area_m2(&self.grid, row)
    }
}

/// Nominal pixel size in metres of a grid
pub fn nominal_scale_m(grid: &GridSpec) -> f64 {
    match grid.coordinate_system {
        CoordinateSystem::Projected { .. } => grid.transform.pixel_width.abs(),
        CoordinateSystem::Geographic => {
            grid.transform.pixel_height.abs().to_radians() * EARTH_RADIUS_M
        }
    }
}

/// Ground area of a pixel in `row` of a grid, in square metres.
///
/// Geographic cells use the spherical zone area between the row's bounding
/// parallels, so cells shrink toward the poles.
pub fn pixel_area_m2(grid: &GridSpec, row: usize) -> f64 {
    let t = &grid.transform;
    match grid.coordinate_system {
        CoordinateSystem::Projected { .. } => (t.pixel_width * t.pixel_height).abs(),
        CoordinateSystem::Geographic => {
            let lat_top = t.top_left_y + row as f64 * t.pixel_height;
            let lat_bottom = lat_top + t.pixel_height;
            let dlon = t.pixel_width.abs().to_radians();
            EARTH_RADIUS_M * EARTH_RADIUS_M
                * dlon
                * (lat_top.to_radians().sin() - lat_bottom.to_radians().sin()).abs()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GeoTransform;
    use approx::assert_relative_eq;
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
    fn test_db_power_round_trip() {
        for &db in &[-35.0f32, -12.5, 0.0, 3.3, 20.0] {
            assert_relative_eq!(power_to_db(db_to_power(db)), db, epsilon = 1e-4);
        }
        for &p in &[1e-4f32, 0.03, 1.0, 42.0] {
            assert_relative_eq!(db_to_power(power_to_db(p)), p, max_relative = 1e-5);
        }
    }

    #[test]
    fn test_non_finite_samples_are_invalid() {
        let r = Raster::new("b", Units::Decibel, grid(2, 2), array![[1.0, f32::NAN], [f32::INFINITY, 4.0]])
            .unwrap();
        assert_eq!(r.valid_count(), 2);
        assert_eq!(r.get(0, 1), None);
        assert_eq!(r.get(1, 1), Some(4.0));
        assert_eq!(r.get(5, 5), None);
    }

    #[test]
    fn test_grid_mismatch_is_rejected() {
        let a = Raster::filled("a", Units::Decibel, grid(3, 3), 1.0);
        let b = Raster::filled("b", Units::Decibel, grid(3, 4), 1.0);
        match a.subtract(&b) {
            Err(SarError::GridMismatch { .. }) => {}
            other => panic!("expected grid mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_division_by_zero_masks_pixel() {
        let a = Raster::new("a", Units::Unitless, grid(1, 2), array![[1.0, 2.0]]).unwrap();
        let b = Raster::new("b", Units::Unitless, grid(1, 2), array![[0.0, 4.0]]).unwrap();
        let q = a.divide(&b).unwrap();
        assert_eq!(q.get(0, 0), None);
        assert_eq!(q.get(0, 1), Some(0.5));
    }

    #[test]
    fn test_mask_composition() {
        let g = grid(1, 4);
        let flood = Raster::new("f", Units::Unitless, g, array![[1.0, 1.0, 0.0, 1.0]]).unwrap();
        let water = Raster::with_validity(
            "w",
            Units::Unitless,
            g,
            array![[1.0, 0.0, 1.0, 1.0]],
            array![[true, true, true, false]],
        )
        .unwrap();

        let cleaned = flood.where_mask(&water, 0.0).unwrap().self_mask();
        assert_eq!(cleaned.get(0, 0), None); // permanent water removed
        assert_eq!(cleaned.get(0, 1), Some(1.0));
        assert_eq!(cleaned.get(0, 2), None); // was never flooded
        assert_eq!(cleaned.get(0, 3), Some(1.0)); // invalid condition leaves pixel alone

        let restricted = flood.update_mask(&water).unwrap();
        assert_eq!(restricted.valid_count(), 2);
        assert!(restricted.valid_count() <= flood.valid_count());
    }

    #[test]
    fn test_comparisons_and_logic() {
        let g = grid(1, 3);
        let r = Raster::new("d", Units::Decibel, g, array![[-3.0, 1.0, 5.0]]).unwrap();
        let lt = r.lt(1.0);
        assert_eq!(lt.data().as_slice().unwrap(), &[1.0, 0.0, 0.0]);
        assert_eq!(r.gte(1.0).count_nonzero(), 2);
        assert_eq!(lt.not().count_nonzero(), 2);
        assert_eq!(lt.and(&r.gt(-5.0)).unwrap().count_nonzero(), 1);
        assert_eq!(lt.units(), Units::Unitless);
    }

    #[test]
    fn test_unit_conversion_requires_matching_units() {
        let r = Raster::filled("p", Units::Power, grid(2, 2), 0.1);
        assert!(r.to_power().is_err());
        let db = r.to_db().unwrap();
        assert_relative_eq!(db.get(0, 0).unwrap(), -10.0, epsilon = 1e-5);
    }

    #[test]
    fn test_pixel_area_geographic_shrinks_poleward() {
        let g = GridSpec::new(
            2,
            1,
            GeoTransform::north_up(68.0, 60.0, 0.001, -30.0),
            CoordinateSystem::Geographic,
        );
        // Row 0 spans 60N..30N, row 1 spans 30N..0
        assert!(pixel_area_m2(&g, 0) < pixel_area_m2(&g, 1));

        let equator = GridSpec::new(
            1,
            1,
            GeoTransform::north_up(0.0, 0.0005, 0.001, -0.001),
            CoordinateSystem::Geographic,
        );
        // ~111.2 m x ~111.2 m at the equator
        assert_relative_eq!(pixel_area_m2(&equator, 0), 12_364.0, max_relative = 1e-3);
        assert_relative_eq!(nominal_scale_m(&equator), 111.195, max_relative = 1e-3);
    }
}
