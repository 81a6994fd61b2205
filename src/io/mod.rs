//! Raster input

pub mod geotiff;

pub use geotiff::GeoTiffReader;

use crate::core::pipeline::{FloodInputs, TerrainInput};
use crate::types::{Polarization, SarError, SarResult, Units};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// File locations of the layers consumed by a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputPaths {
    pub pre_event: PathBuf,
    pub during_event: PathBuf,
    pub water_occurrence: PathBuf,
    /// Slope in degrees; takes precedence over `dem`
    #[serde(default)]
    pub slope: Option<PathBuf>,
    #[serde(default)]
    pub dem: Option<PathBuf>,
    pub landcover: PathBuf,
    pub landcover_confidence: PathBuf,
    #[serde(default)]
    pub precipitation: Vec<PathBuf>,
}

impl InputPaths {
    /// Read every layer; the SAR mosaics are named after the polarization
    pub fn load(&self, polarization: Polarization) -> SarResult<FloodInputs> {
        let band = polarization.to_string();
        let terrain = match (&self.slope, &self.dem) {
            (Some(slope), _) => TerrainInput::Slope(GeoTiffReader::read(slope, "slope", Units::Unitless)?),
            (None, Some(dem)) => TerrainInput::Elevation(GeoTiffReader::read(dem, "elevation", Units::Unitless)?),
            (None, None) => {
                return Err(SarError::InvalidParameter(
                    "either a slope or a DEM layer is required".to_string(),
                ))
            }
        };
        let precipitation = self
            .precipitation
            .iter()
            .map(|p| GeoTiffReader::read(p, "precipitation", Units::Unitless))
            .collect::<SarResult<Vec<_>>>()?;

        Ok(FloodInputs {
            pre_event: GeoTiffReader::read(&self.pre_event, &band, Units::Decibel)?,
            during_event: GeoTiffReader::read(&self.during_event, &band, Units::Decibel)?,
            water_occurrence: GeoTiffReader::read(&self.water_occurrence, "seasonality", Units::Unitless)?,
            terrain,
            landcover: GeoTiffReader::read(&self.landcover, "landcover", Units::Unitless)?,
            landcover_confidence: GeoTiffReader::read(&self.landcover_confidence, "confidence", Units::Unitless)?,
            precipitation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::geotiff::tests::write_test_geotiff;
    use ndarray::Array2;

    #[test]
    fn test_load_with_dem_and_precipitation() {
        let dir = tempfile::tempdir().unwrap();
        let write = |name: &str, value: f32| {
            let path = dir.path().join(name);
            write_test_geotiff(&path, &Array2::from_elem((5, 5), value), (0.0, 50.0), 10.0, false, None);
            path
        };
        let paths = InputPaths {
            pre_event: write("pre.tif", -8.0),
            during_event: write("during.tif", -15.0),
            water_occurrence: write("occurrence.tif", 0.0),
            slope: None,
            dem: Some(write("dem.tif", 120.0)),
            landcover: write("landcover.tif", 40.0),
            landcover_confidence: write("confidence.tif", 90.0),
            precipitation: vec![write("rain1.tif", 2.0), write("rain2.tif", 3.0)],
        };
        let inputs = paths.load(Polarization::VH).unwrap();
        assert_eq!(inputs.pre_event.band(), "VH");
        assert_eq!(inputs.during_event.units(), Units::Decibel);
        assert!(matches!(inputs.terrain, TerrainInput::Elevation(_)));
        assert_eq!(inputs.precipitation.len(), 2);

        let no_terrain = InputPaths { dem: None, ..paths };
        assert!(no_terrain.load(Polarization::VV).is_err());
    }
}
