//! sarflood: Sentinel-1 change-detection flood mapping
//!
//! This library derives a flood extent from a pre-event and a during-event
//! backscatter mosaic, refines it against permanent water, connectivity and
//! terrain, and reports flooded area and affected cropland in hectares.

pub mod types;
pub mod io;
pub mod core;

// Re-export main types and functions for easier access
pub use types::{
    BoundingBox, CoordinateSystem, GeoTransform, GridSpec, Polarization, SarError, SarResult, Units,
};

pub use core::{
    AreaStatistics, EdgeOtsuOptions, EdgeOtsuThresholder, FloodClassifier, FloodMappingConfig,
    FloodMappingPipeline, FloodStatistics, Raster, Region, SpeckleFilter,
};
pub use io::{GeoTiffReader, InputPaths};
