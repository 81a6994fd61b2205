use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Real-valued intensity sample
pub type SarReal = f32;

/// 2D real-valued raster array (rows x cols)
pub type SarRealImage = Array2<SarReal>;

/// Coordinate system of a raster grid
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum CoordinateSystem {
    /// Geographic coordinates (longitude, latitude in degrees)
    Geographic,
    /// Projected coordinates in metres (e.g., UTM)
    Projected { epsg: u32 },
}

/// Polarization modes for Sentinel-1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Polarization {
    VV,
    VH,
    HV,
    HH,
}

impl std::fmt::Display for Polarization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Polarization::VV => write!(f, "VV"),
            Polarization::VH => write!(f, "VH"),
            Polarization::HV => write!(f, "HV"),
            Polarization::HH => write!(f, "HH"),
        }
    }
}

impl FromStr for Polarization {
    type Err = SarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "VV" => Ok(Polarization::VV),
            "VH" => Ok(Polarization::VH),
            "HV" => Ok(Polarization::HV),
            "HH" => Ok(Polarization::HH),
            _ => Err(SarError::InvalidParameter(format!("Invalid polarization: {}", s))),
        }
    }
}

/// Radiometric units of a raster band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Units {
    /// Logarithmic backscatter (dB)
    Decibel,
    /// Natural (linear power) backscatter
    Power,
    /// Masks, class codes, degrees, percentages...
    Unitless,
}

/// Geospatial bounding box in map coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

/// Geospatial transformation parameters (GDAL ordering)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform without rotation
    pub fn north_up(top_left_x: f64, top_left_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            top_left_x,
            pixel_width,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height,
        }
    }

    /// Map coordinates of the centre of pixel (row, col)
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        let c = col as f64 + 0.5;
        let r = row as f64 + 0.5;
        (
            self.top_left_x + c * self.pixel_width + r * self.rotation_x,
            self.top_left_y + c * self.rotation_y + r * self.pixel_height,
        )
    }

    /// North-up with a finite, non-zero pixel size
    pub fn validate(&self) -> SarResult<()> {
        if self.rotation_x != 0.0 || self.rotation_y != 0.0 {
            return Err(SarError::InvalidFormat(format!(
                "rotated transform (rotation {}, {}) is not supported",
                self.rotation_x, self.rotation_y
            )));
        }
        let usable = |v: f64| v.is_finite() && v != 0.0;
        if !usable(self.pixel_width) || !usable(self.pixel_height) {
            return Err(SarError::InvalidFormat(format!(
                "pixel size {} x {} is not usable",
                self.pixel_width, self.pixel_height
            )));
        }
        Ok(())
    }

    /// Fractional (row, col) of a map coordinate; only valid for north-up transforms
    pub fn geo_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (y - self.top_left_y) / self.pixel_height,
            (x - self.top_left_x) / self.pixel_width,
        )
    }
}

/// Shape and georeferencing shared by every raster taking part in a pixel-wise operation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub rows: usize,
    pub cols: usize,
    pub transform: GeoTransform,
    pub coordinate_system: CoordinateSystem,
}

impl GridSpec {
    pub fn new(rows: usize, cols: usize, transform: GeoTransform, coordinate_system: CoordinateSystem) -> Self {
        Self { rows, cols, transform, coordinate_system }
    }

    pub fn dim(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn pixel_count(&self) -> usize {
        self.rows * self.cols
    }

    /// Map-coordinate extent of the grid
    pub fn bounding_box(&self) -> BoundingBox {
        let t = &self.transform;
        let x0 = t.top_left_x;
        let x1 = t.top_left_x + self.cols as f64 * t.pixel_width;
        let y0 = t.top_left_y;
        let y1 = t.top_left_y + self.rows as f64 * t.pixel_height;
        BoundingBox {
            min_x: x0.min(x1),
            max_x: x0.max(x1),
            min_y: y0.min(y1),
            max_y: y0.max(y1),
        }
    }

    pub fn describe(&self) -> String {
        format!(
            "{}x{} grid at ({:.6}, {:.6}) step ({:.6}, {:.6}) {:?}",
            self.rows,
            self.cols,
            self.transform.top_left_x,
            self.transform.top_left_y,
            self.transform.pixel_width,
            self.transform.pixel_height,
            self.coordinate_system
        )
    }
}

/// Error types for flood mapping
#[derive(Debug, thiserror::Error)]
pub enum SarError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Band not found: {0}")]
    MissingBand(String),

    #[error("Grid mismatch: expected {expected}, found {found}")]
    GridMismatch { expected: String, found: String },

    #[error("Degenerate histogram: {0}")]
    DegenerateHistogram(String),

    #[error("Aggregation needs {required} pixels but the limit is {limit}")]
    AggregationBudgetExceeded { required: u64, limit: u64 },

    #[error("Undefined percentage: {0}")]
    UndefinedPercentage(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Processing error: {0}")]
    Processing(String),
}

/// Result type for flood mapping operations
pub type SarResult<T> = Result<T, SarError>;
