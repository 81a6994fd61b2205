//! End-to-end flood mapping run: despeckle, classify, aggregate.

use crate::core::area_statistics::{AreaStatistics, FloodStatistics, StatisticsParams};
use crate::core::composite::accumulate_collection;
use crate::core::edge_otsu::{EdgeOtsuOptions, EdgeOtsuThresholder};
use crate::core::flood_classifier::{AncillaryLayers, ClassificationResult, ClassifierParams, FloodClassifier};
use crate::core::raster::Raster;
use crate::core::reduce::{CancellationToken, ReduceRegionOptions, RegionReducer};
use crate::core::region::Region;
use crate::core::speckle_filter::SpeckleFilter;
use crate::core::terrain::TerrainProcessor;
use crate::types::{Polarization, SarError, SarResult};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;

/// Inclusive date range of an acquisition window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl EventWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn describe(&self) -> String {
        format!("{} to {}", self.start.format("%Y-%m-%d"), self.end.format("%Y-%m-%d"))
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}

fn default_polarization() -> Polarization {
    Polarization::VV
}

/// Run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FloodMappingConfig {
    pub pre_event: EventWindow,
    pub during_event: EventWindow,
    #[serde(default = "default_polarization")]
    pub polarization: Polarization,
    #[serde(default)]
    pub edge_otsu: EdgeOtsuOptions,
    #[serde(default)]
    pub classifier: ClassifierParams,
    #[serde(default)]
    pub statistics: StatisticsParams,
    /// Region of interest; the whole grid when absent
    #[serde(default)]
    pub region: Option<Region>,
    /// Wall-clock limit for the region reductions
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl FloodMappingConfig {
    pub fn new(pre_event: EventWindow, during_event: EventWindow) -> Self {
        Self {
            pre_event,
            during_event,
            polarization: default_polarization(),
            edge_otsu: EdgeOtsuOptions::default(),
            classifier: ClassifierParams::default(),
            statistics: StatisticsParams::default(),
            region: None,
            timeout_secs: None,
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> SarResult<Self> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        let config: Self = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> SarResult<()> {
        for (name, w) in [("pre-event", &self.pre_event), ("during-event", &self.during_event)] {
            if w.start > w.end {
                return Err(SarError::InvalidParameter(format!(
                    "{} window starts after it ends ({})",
                    name,
                    w.describe()
                )));
            }
        }
        if self.pre_event.end >= self.during_event.start {
            return Err(SarError::InvalidParameter(format!(
                "pre-event window ({}) must end before the during-event window ({}) starts",
                self.pre_event.describe(),
                self.during_event.describe()
            )));
        }
        if !(self.statistics.scale >= 0.0) || self.statistics.tile_size == 0 {
            return Err(SarError::InvalidParameter(format!(
                "invalid statistics parameters: {:?}",
                self.statistics
            )));
        }
        self.edge_otsu.apply_defaults().validate()
    }
}

/// Terrain layer supplied either as slope or as elevation
#[derive(Debug, Clone)]
pub enum TerrainInput {
    /// Slope in degrees
    Slope(Raster),
    /// Elevation in metres; voids are filled before deriving slope
    Elevation(Raster),
}

/// Rasters consumed by a run, all on one grid
#[derive(Debug, Clone)]
pub struct FloodInputs {
    /// Pre-event mosaic (dB)
    pub pre_event: Raster,
    /// During-event mosaic (dB)
    pub during_event: Raster,
    pub water_occurrence: Raster,
    pub terrain: TerrainInput,
    pub landcover: Raster,
    pub landcover_confidence: Raster,
    /// Optional daily precipitation over the during-event window
    pub precipitation: Vec<Raster>,
}

/// Headline figures of an event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSummary {
    pub pre_event: String,
    pub during_event: String,
    pub polarization: Polarization,
    pub threshold: f64,
    pub statistics: FloodStatistics,
    /// Region mean of the accumulated precipitation
    pub rainfall_mean: Option<f64>,
    /// `flood status between ...` headline
    pub headline: String,
}

#[derive(Debug, Clone)]
pub struct FloodMappingResult {
    pub pre_filtered: Raster,
    pub during_filtered: Raster,
    pub classification: ClassificationResult,
    pub statistics: FloodStatistics,
    pub rainfall: Option<Raster>,
    pub summary: EventSummary,
}

pub struct FloodMappingPipeline {
    config: FloodMappingConfig,
    speckle: SpeckleFilter,
}

impl FloodMappingPipeline {
    pub fn new(config: FloodMappingConfig) -> SarResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            speckle: SpeckleFilter::new()?,
        })
    }

    pub fn config(&self) -> &FloodMappingConfig {
        &self.config
    }

    fn cancellation(&self) -> CancellationToken {
        match self.config.timeout_secs {
            Some(secs) => CancellationToken::with_timeout(Duration::from_secs(secs)),
            None => CancellationToken::new(),
        }
    }

    fn slope(&self, terrain: &TerrainInput) -> SarResult<Raster> {
        match terrain {
            TerrainInput::Slope(slope) => Ok(slope.clone()),
            TerrainInput::Elevation(dem) => {
                let filled = TerrainProcessor::fill_voids(dem, 10)?;
                let (slope, _aspect) = TerrainProcessor::slope_aspect(&filled)?;
                Ok(slope)
            }
        }
    }

    pub fn run(&self, inputs: &FloodInputs) -> SarResult<FloodMappingResult> {
        let c = &self.config;
        log::info!(
            "Flood mapping {} (pre-event {}, during-event {})",
            c.polarization,
            c.pre_event.describe(),
            c.during_event.describe()
        );

        let reference = &inputs.pre_event;
        reference.ensure_same_grid(&inputs.during_event)?;
        for layer in [&inputs.water_occurrence, &inputs.landcover, &inputs.landcover_confidence] {
            reference.ensure_same_grid(layer)?;
        }
        match &inputs.terrain {
            TerrainInput::Slope(r) | TerrainInput::Elevation(r) => reference.ensure_same_grid(r)?,
        }
        let expected_band = c.polarization.to_string();
        for sar in [&inputs.pre_event, &inputs.during_event] {
            if sar.band() != expected_band {
                log::warn!("SAR band '{}' does not match polarization {}", sar.band(), expected_band);
            }
        }

        let region = match &c.region {
            Some(r) => r.clone(),
            None => Region::from_grid(reference.grid())?,
        };
        let cancel = self.cancellation();

        let (pre_filtered, during_filtered) = self.speckle.apply_filter_pair(&inputs.pre_event, &inputs.during_event)?;

        let ancillary = AncillaryLayers {
            water_occurrence: inputs.water_occurrence.clone(),
            slope: self.slope(&inputs.terrain)?,
            landcover: inputs.landcover.clone(),
            landcover_confidence: inputs.landcover_confidence.clone(),
        };
        let thresholder = EdgeOtsuThresholder::from_options(&c.edge_otsu)?.with_cancellation(cancel.clone());
        let classifier = FloodClassifier::new(c.classifier.clone(), thresholder);
        let classification = classifier.classify(&pre_filtered, &during_filtered, &ancillary, &region)?;

        let statistics = AreaStatistics::new(&region, c.statistics.clone())
            .with_cancellation(cancel.clone())
            .compute(&classification.masks)?;

        let (rainfall, rainfall_mean) = if inputs.precipitation.is_empty() {
            (None, None)
        } else {
            let total = accumulate_collection(&inputs.precipitation, "rainfall")?;
            let reducer = RegionReducer::new(
                &region,
                ReduceRegionOptions {
                    scale: c.statistics.scale,
                    max_pixels: c.statistics.max_pixels,
                    tile_size: c.statistics.tile_size,
                    cancel,
                },
            );
            let count = reducer.count(&total)?;
            let mean = if count > 0.0 { Some(reducer.sum(&total)? / count) } else { None };
            (Some(total), mean)
        };

        let summary = EventSummary {
            pre_event: c.pre_event.describe(),
            during_event: c.during_event.describe(),
            polarization: c.polarization,
            threshold: classification.threshold.threshold,
            statistics,
            rainfall_mean,
            headline: format!("Flood status between {}", c.during_event.describe()),
        };

        Ok(FloodMappingResult {
            pre_filtered,
            during_filtered,
            classification,
            statistics,
            rainfall,
            summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_config_from_json_with_defaults() {
        let json = r#"{
            "pre_event": {"start": "2022-05-01", "end": "2022-06-30"},
            "during_event": {"start": "2022-08-01", "end": "2022-08-31"},
            "edge_otsu": {"initialThreshold": -3}
        }"#;
        let config: FloodMappingConfig = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.polarization, Polarization::VV);
        assert_eq!(config.classifier.cropland_class, 40.0);
        assert_eq!(config.statistics.scale, 250.0);
        assert_eq!(config.edge_otsu.apply_defaults().initial_threshold, -3.0);
        assert_eq!(config.during_event.days(), 31);
        assert_eq!(config.during_event.describe(), "2022-08-01 to 2022-08-31");
    }

    #[test]
    fn test_overlapping_windows_rejected() {
        let config = FloodMappingConfig::new(
            EventWindow::new(date("2022-05-01"), date("2022-08-10")),
            EventWindow::new(date("2022-08-01"), date("2022-08-31")),
        );
        assert!(config.validate().is_err());

        let reversed = FloodMappingConfig::new(
            EventWindow::new(date("2022-06-30"), date("2022-05-01")),
            EventWindow::new(date("2022-08-01"), date("2022-08-31")),
        );
        assert!(FloodMappingPipeline::new(reversed).is_err());
    }

    #[test]
    fn test_config_file_round_trip() {
        let mut config = FloodMappingConfig::new(
            EventWindow::new(date("2022-05-01"), date("2022-06-30")),
            EventWindow::new(date("2022-08-01"), date("2022-08-31")),
        );
        config.polarization = Polarization::VH;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();
        let loaded = FloodMappingConfig::from_file(&path).unwrap();
        assert_eq!(loaded.polarization, Polarization::VH);
        assert_eq!(loaded.pre_event, config.pre_event);
    }
}
