use crate::core::flood_classifier::FloodMasks;
use crate::core::raster::Raster;
use crate::core::reduce::{CancellationToken, ReduceRegionOptions, RegionReducer};
use crate::core::region::Region;
use crate::types::{SarError, SarResult, Units};
use serde::{Deserialize, Serialize};

const M2_PER_HECTARE: f64 = 10_000.0;

/// Sampling settings of the area aggregation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatisticsParams {
    /// Statistical sampling scale in metres
    pub scale: f64,
    /// Upper bound on native pixels read per statistic
    pub max_pixels: u64,
    /// Tile height in rows
    pub tile_size: usize,
}

impl Default for StatisticsParams {
    fn default() -> Self {
        Self {
            scale: 250.0,
            max_pixels: 100_000_000_000_000,
            tile_size: 256,
        }
    }
}

/// Hectare totals of the three output masks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FloodStatistics {
    pub flood_ha: u64,
    pub cropland_ha: u64,
    pub flooded_cropland_ha: u64,
    /// `None` when there is no cropland to relate to
    pub flooded_cropland_percent: Option<u32>,
}

impl FloodStatistics {
    pub fn from_hectares(flood_ha: u64, cropland_ha: u64, flooded_cropland_ha: u64) -> Self {
        Self {
            flood_ha,
            cropland_ha,
            flooded_cropland_ha,
            flooded_cropland_percent: flooded_percentage(flooded_cropland_ha, cropland_ha).ok(),
        }
    }

    pub fn percentage(&self) -> SarResult<u32> {
        flooded_percentage(self.flooded_cropland_ha, self.cropland_ha)
    }
}

/// Square metres to whole hectares
pub fn hectares(area_m2: f64) -> u64 {
    (area_m2.max(0.0) / M2_PER_HECTARE).round() as u64
}

/// round(100 * flooded / cropland) on the rounded hectare figures
pub fn flooded_percentage(flooded_cropland_ha: u64, cropland_ha: u64) -> SarResult<u32> {
    if cropland_ha == 0 {
        return Err(SarError::UndefinedPercentage(format!(
            "{} ha flooded cropland against 0 ha cropland",
            flooded_cropland_ha
        )));
    }
    Ok((100.0 * flooded_cropland_ha as f64 / cropland_ha as f64).round() as u32)
}

/// Pixel-area aggregation of masks over a region
pub struct AreaStatistics<'a> {
    region: &'a Region,
    params: StatisticsParams,
    cancel: CancellationToken,
}

impl<'a> AreaStatistics<'a> {
    pub fn new(region: &'a Region, params: StatisticsParams) -> Self {
        Self {
            region,
            params,
            cancel: CancellationToken::default(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn reducer(&self) -> RegionReducer<'a> {
        RegionReducer::new(
            self.region,
            ReduceRegionOptions {
                scale: self.params.scale,
                max_pixels: self.params.max_pixels,
                tile_size: self.params.tile_size,
                cancel: self.cancel.clone(),
            },
        )
    }

    /// Ground area of the valid pixels of a mask, in square metres
    pub fn mask_area_m2(&self, mask: &Raster) -> SarResult<f64> {
        let ones = mask.map_valid(Units::Unitless, |_| 1.0);
        self.reducer().sum_area(&ones)
    }

    pub fn mask_hectares(&self, mask: &Raster) -> SarResult<u64> {
        let area = self.mask_area_m2(mask)?;
        let ha = hectares(area);
        log::debug!("'{}': {:.1} m^2 -> {} ha", mask.band(), area, ha);
        Ok(ha)
    }

    /// Hectares of flood, cropland and flooded cropland, computed concurrently
    pub fn compute(&self, masks: &FloodMasks) -> SarResult<FloodStatistics> {
        #[cfg(feature = "parallel")]
        let (flood, (cropland, flooded_cropland)) = rayon::join(
            || self.mask_hectares(&masks.flood),
            || {
                rayon::join(
                    || self.mask_hectares(&masks.cropland),
                    || self.mask_hectares(&masks.flooded_cropland),
                )
            },
        );
        #[cfg(not(feature = "parallel"))]
        let (flood, (cropland, flooded_cropland)) = (
            self.mask_hectares(&masks.flood),
            (
                self.mask_hectares(&masks.cropland),
                self.mask_hectares(&masks.flooded_cropland),
            ),
        );

        let stats = FloodStatistics::from_hectares(flood?, cropland?, flooded_cropland?);
        match stats.flooded_cropland_percent {
            Some(p) => log::info!(
                "Flooded area: {} ha, cropland: {} ha, flooded cropland: {} ha ({}%)",
                stats.flood_ha,
                stats.cropland_ha,
                stats.flooded_cropland_ha,
                p
            ),
            None => log::warn!(
                "Flooded area: {} ha, no cropland in region; flooded cropland percentage undefined",
                stats.flood_ha
            ),
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CoordinateSystem, GeoTransform, GridSpec};
    use ndarray::Array2;

    fn grid() -> GridSpec {
        GridSpec::new(
            100,
            100,
            GeoTransform::north_up(0.0, 1000.0, 10.0, -10.0),
            CoordinateSystem::Projected { epsg: 32642 },
        )
    }

    fn mask(name: &str, f: impl Fn(usize, usize) -> bool) -> Raster {
        Raster::new(
            name,
            Units::Unitless,
            grid(),
            Array2::from_shape_fn((100, 100), |(r, c)| if f(r, c) { 1.0 } else { f32::NAN }),
        )
        .unwrap()
    }

    #[test]
    fn test_hectare_rounding() {
        assert_eq!(hectares(0.0), 0);
        assert_eq!(hectares(14_999.0), 1);
        assert_eq!(hectares(15_000.0), 2);
        assert_eq!(hectares(-5.0), 0);
    }

    #[test]
    fn test_percentage_and_zero_cropland() {
        assert_eq!(flooded_percentage(1, 3).unwrap(), 33);
        assert_eq!(flooded_percentage(2, 3).unwrap(), 67);
        assert_eq!(flooded_percentage(0, 3).unwrap(), 0);
        assert!(matches!(flooded_percentage(0, 0), Err(SarError::UndefinedPercentage(_))));

        let stats = FloodStatistics::from_hectares(5, 0, 0);
        assert_eq!(stats.flooded_cropland_percent, None);
        assert!(stats.percentage().is_err());
    }

    #[test]
    fn test_masks_to_hectares() {
        // 100 m^2 pixels: 10 000 px = 100 ha, 2 500 px = 25 ha
        let masks = FloodMasks {
            flood: mask("flood", |_, c| c < 50),
            cropland: mask("cropland", |r, _| r < 50),
            flooded_cropland: mask("flooded_cropland", |r, c| r < 50 && c < 50),
        };
        let region = Region::from_grid(&grid()).unwrap();
        let stats = AreaStatistics::new(&region, StatisticsParams::default()).compute(&masks).unwrap();
        assert_eq!(stats.flood_ha, 50);
        assert_eq!(stats.cropland_ha, 50);
        assert_eq!(stats.flooded_cropland_ha, 25);
        assert_eq!(stats.flooded_cropland_percent, Some(50));
    }

    #[test]
    fn test_budget_is_enforced() {
        let region = Region::from_grid(&grid()).unwrap();
        let params = StatisticsParams {
            scale: 10.0,
            max_pixels: 100,
            ..Default::default()
        };
        let err = AreaStatistics::new(&region, params).mask_hectares(&mask("flood", |_, _| true));
        assert!(matches!(err, Err(SarError::AggregationBudgetExceeded { .. })));
    }

    #[test]
    fn test_coarse_scale_does_not_hide_pixels_read() {
        // 1000x1000 pixels at 10 m are only 40x40 blocks at 250 m
        let n = 1000;
        let big = GridSpec::new(
            n,
            n,
            GeoTransform::north_up(0.0, n as f64 * 10.0, 10.0, -10.0),
            CoordinateSystem::Projected { epsg: 32642 },
        );
        let flood = Raster::filled("flood", Units::Unitless, big, 1.0);
        let region = Region::from_grid(&big).unwrap();
        let params = StatisticsParams {
            scale: 250.0,
            max_pixels: 10_000,
            ..Default::default()
        };
        match AreaStatistics::new(&region, params).mask_hectares(&flood) {
            Err(SarError::AggregationBudgetExceeded { required, limit }) => {
                assert_eq!(required, 1_000_000);
                assert_eq!(limit, 10_000);
            }
            other => panic!("expected budget error, got {:?}", other),
        }

        let roomy = StatisticsParams { scale: 250.0, max_pixels: 1_000_000, ..Default::default() };
        assert_eq!(AreaStatistics::new(&region, roomy).mask_hectares(&flood).unwrap(), 10_000);
    }
}
