//! Core flood mapping modules

pub mod raster;
pub mod kernel;
pub mod morphology;
pub mod region;
pub mod histogram;
pub mod reduce;
pub mod composite;
pub mod edge_detection;
pub mod speckle_filter;
pub mod edge_otsu;
pub mod flood_classifier;
pub mod area_statistics;
pub mod terrain;
pub mod pipeline;

// Re-export main types
pub use raster::{db_to_power, power_to_db, Raster};
pub use kernel::{Kernel, KernelShape, Reducer};
pub use region::{PixelWindow, Region};
pub use histogram::{Histogram, HistogramSpec, OtsuResult};
pub use reduce::{CancellationToken, ReduceRegionOptions, RegionReducer};
pub use composite::{accumulate_collection, mean_collection};
pub use edge_detection::CannyEdgeDetector;
pub use speckle_filter::{SpeckleFilter, SpeckleFilterParams};
pub use edge_otsu::{EdgeOtsuOptions, EdgeOtsuParams, EdgeOtsuThresholder, ThresholdResult};
pub use flood_classifier::{AncillaryLayers, ClassificationResult, ClassifierParams, FloodClassifier, FloodMasks};
pub use area_statistics::{AreaStatistics, FloodStatistics, StatisticsParams};
pub use terrain::TerrainProcessor;
pub use pipeline::{EventSummary, EventWindow, FloodInputs, FloodMappingConfig, FloodMappingPipeline, FloodMappingResult, TerrainInput};
