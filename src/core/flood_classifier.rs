//! Change detection and mask refinement against ancillary layers.
//!
//! Every refinement step only removes pixels from the flood mask; the
//! cropland mask is derived independently and intersected at the end.

use crate::core::edge_otsu::{EdgeOtsuThresholder, ThresholdResult};
use crate::core::raster::Raster;
use crate::core::region::Region;
use crate::types::SarResult;
use serde::{Deserialize, Serialize};

/// Thresholds of the post-processing steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierParams {
    /// Months per year of water occurrence marking permanent water
    pub permanent_water_months: f32,
    /// Minimum connected flood pixels (8-connectivity)
    pub min_connected_pixels: usize,
    /// Cap for the connectivity count
    pub connectivity_cap: usize,
    /// Pixels at or above this slope (degrees) are removed
    pub max_slope_deg: f32,
    /// Land-cover class code for cropland
    pub cropland_class: f32,
    /// Classification confidence (percent) a cropland pixel must exceed
    pub accuracy_threshold: f32,
}

impl Default for ClassifierParams {
    fn default() -> Self {
        Self {
            permanent_water_months: 8.0,
            min_connected_pixels: 8,
            connectivity_cap: 100,
            max_slope_deg: 5.0,
            cropland_class: 40.0,
            accuracy_threshold: 50.0,
        }
    }
}

/// Read-only layers aligned to the SAR grid
#[derive(Debug, Clone)]
pub struct AncillaryLayers {
    /// Water occurrence in months per year (0-12)
    pub water_occurrence: Raster,
    /// Terrain slope in degrees
    pub slope: Raster,
    /// Discrete land-cover class codes
    pub landcover: Raster,
    /// Land-cover classification confidence (0-100)
    pub landcover_confidence: Raster,
}

impl AncillaryLayers {
    fn ensure_grid(&self, reference: &Raster) -> SarResult<()> {
        reference.ensure_same_grid(&self.water_occurrence)?;
        reference.ensure_same_grid(&self.slope)?;
        reference.ensure_same_grid(&self.landcover)?;
        reference.ensure_same_grid(&self.landcover_confidence)
    }
}

/// Final masks; each is 1 where set and invalid elsewhere
#[derive(Debug, Clone)]
pub struct FloodMasks {
    pub flood: Raster,
    pub cropland: Raster,
    pub flooded_cropland: Raster,
}

#[derive(Debug, Clone)]
pub struct ClassificationResult {
    /// During-event minus pre-event backscatter (dB)
    pub difference: Raster,
    pub threshold: ThresholdResult,
    pub masks: FloodMasks,
}

pub struct FloodClassifier {
    params: ClassifierParams,
    thresholder: EdgeOtsuThresholder,
}

impl FloodClassifier {
    pub fn new(params: ClassifierParams, thresholder: EdgeOtsuThresholder) -> Self {
        Self { params, thresholder }
    }

    pub fn params(&self) -> &ClassifierParams {
        &self.params
    }

    /// Full classification of filtered pre/during mosaics
    pub fn classify(
        &self,
        pre: &Raster,
        during: &Raster,
        ancillary: &AncillaryLayers,
        region: &Region,
    ) -> SarResult<ClassificationResult> {
        pre.ensure_same_grid(during)?;
        ancillary.ensure_grid(pre)?;

        let band = self.thresholder.params().band_name.clone();
        let difference = during.subtract(pre)?.renamed(&band);
        log::info!("Change detection layer '{}' on {}", band, pre.grid().describe());

        let threshold = self.thresholder.threshold_band(std::slice::from_ref(&difference), region)?;
        let flood = self.refine_flood(&threshold.water, ancillary)?;
        let cropland = self.cropland_mask(ancillary)?;
        let flooded_cropland = flood.update_mask(&cropland)?.renamed("flooded_cropland");

        log::info!(
            "Flood pixels: {}, cropland pixels: {}, flooded cropland pixels: {}",
            flood.valid_count(),
            cropland.valid_count(),
            flooded_cropland.valid_count()
        );

        Ok(ClassificationResult {
            difference,
            threshold,
            masks: FloodMasks {
                flood,
                cropland,
                flooded_cropland,
            },
        })
    }

    /// Permanent water, connectivity and slope refinement of a raw 0/1 layer
    pub fn refine_flood(&self, raw: &Raster, ancillary: &AncillaryLayers) -> SarResult<Raster> {
        ancillary.ensure_grid(raw)?;
        let p = &self.params;

        let permanent = ancillary.water_occurrence.gte(p.permanent_water_months);
        let flood = raw.where_mask(&permanent, 0.0)?.self_mask();
        log::debug!("After permanent water removal: {} pixels", flood.valid_count());

        let connections = flood.connected_pixel_count(p.connectivity_cap, true);
        let flood = flood.update_mask(&connections.gte(p.min_connected_pixels as f32))?;
        log::debug!("After connectivity filter: {} pixels", flood.valid_count());

        let flood = flood.update_mask(&ancillary.slope.lt(p.max_slope_deg))?;
        log::debug!("After slope filter: {} pixels", flood.valid_count());

        Ok(flood.renamed("flood"))
    }

    /// Cropland class with sufficient classification confidence
    pub fn cropland_mask(&self, ancillary: &AncillaryLayers) -> SarResult<Raster> {
        let p = &self.params;
        let confident = ancillary.landcover_confidence.gt(p.accuracy_threshold);
        let cropland = ancillary
            .landcover
            .eq_value(p.cropland_class)
            .update_mask(&confident)?
            .self_mask()
            .renamed("cropland");
        if cropland.valid_count() == 0 {
            log::warn!(
                "No cropland pixels (class {}, confidence > {})",
                p.cropland_class,
                p.accuracy_threshold
            );
        }
        Ok(cropland)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::edge_otsu::EdgeOtsuParams;
    use crate::types::{CoordinateSystem, GeoTransform, GridSpec, Units};
    use ndarray::Array2;

    const N: usize = 12;

    fn grid() -> GridSpec {
        GridSpec::new(
            N,
            N,
            GeoTransform::north_up(0.0, N as f64 * 10.0, 10.0, -10.0),
            CoordinateSystem::Projected { epsg: 32642 },
        )
    }

    fn layer(f: impl Fn(usize, usize) -> f32) -> Raster {
        Raster::new("layer", Units::Unitless, grid(), Array2::from_shape_fn((N, N), |(r, c)| f(r, c))).unwrap()
    }

    fn ancillary() -> AncillaryLayers {
        AncillaryLayers {
            // Permanent water in the top-left 3x3 corner
            water_occurrence: layer(|r, c| if r < 3 && c < 3 { 12.0 } else { 0.0 }),
            // Steep strip along the last column
            slope: layer(|_, c| if c == N - 1 { 20.0 } else { 1.0 }),
            // Cropland in the left half, confident except in row 0
            landcover: layer(|_, c| if c < N / 2 { 40.0 } else { 20.0 }),
            landcover_confidence: layer(|r, _| if r == 0 { 30.0 } else { 80.0 }),
        }
    }

    fn classifier() -> FloodClassifier {
        FloodClassifier::new(
            ClassifierParams::default(),
            EdgeOtsuThresholder::new(EdgeOtsuParams::default()).unwrap(),
        )
    }

    #[test]
    fn test_permanent_water_never_flooded() {
        let raw = layer(|_, _| 1.0);
        let flood = classifier().refine_flood(&raw, &ancillary()).unwrap();
        for r in 0..3 {
            for c in 0..3 {
                assert_eq!(flood.get(r, c), None);
            }
        }
        assert_eq!(flood.get(5, 5), Some(1.0));
    }

    #[test]
    fn test_isolated_pixels_and_steep_terrain_removed() {
        // A lone pixel and a 3x3 block in open terrain
        let raw = layer(|r, c| {
            if (r == 6 && c == 9) || ((6..9).contains(&r) && (3..6).contains(&c)) {
                1.0
            } else {
                0.0
            }
        });
        let flood = classifier().refine_flood(&raw, &ancillary()).unwrap();
        assert_eq!(flood.get(6, 9), None);
        assert_eq!(flood.valid_count(), 9);

        let edge = layer(|r, c| if r >= 4 && r < 8 && c >= N - 3 { 1.0 } else { 0.0 });
        let flood = classifier().refine_flood(&edge, &ancillary()).unwrap();
        assert_eq!(flood.get(5, N - 1), None);
        assert_eq!(flood.get(5, N - 2), Some(1.0));
    }

    #[test]
    fn test_cropland_requires_confidence() {
        let cropland = classifier().cropland_mask(&ancillary()).unwrap();
        assert_eq!(cropland.get(0, 0), None);
        assert_eq!(cropland.get(1, 0), Some(1.0));
        assert_eq!(cropland.get(1, N - 1), None);
        assert_eq!(cropland.valid_count(), (N - 1) * N / 2);
    }

    #[test]
    fn test_flooded_cropland_is_subset() {
        let anc = ancillary();
        let c = classifier();
        let raw = layer(|r, c| if (r + c) % 5 != 0 { 1.0 } else { 0.0 });
        let flood = c.refine_flood(&raw, &anc).unwrap();
        let cropland = c.cropland_mask(&anc).unwrap();
        let flooded_cropland = flood.update_mask(&cropland).unwrap();
        for r in 0..N {
            for col in 0..N {
                if flooded_cropland.is_valid(r, col) {
                    assert!(flood.is_valid(r, col) && cropland.is_valid(r, col));
                }
            }
        }
    }

    #[test]
    fn test_misaligned_ancillary_rejected() {
        let mut anc = ancillary();
        anc.slope = Raster::filled("slope", Units::Unitless, GridSpec { rows: N + 1, ..grid() }, 0.0);
        assert!(classifier().refine_flood(&layer(|_, _| 1.0), &anc).is_err());
    }
}
