//! Region of interest polygons and their footprint on a raster grid.

use crate::types::{BoundingBox, GridSpec, SarError, SarResult};
use geo::{BoundingRect, Contains, Coord, LineString, Point, Polygon};
use serde::{Deserialize, Serialize};

/// Serialised form of a region: rings of `[x, y]` vertices in map coordinates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionSpec {
    pub exterior: Vec<[f64; 2]>,
    #[serde(default)]
    pub holes: Vec<Vec<[f64; 2]>>,
}

/// Polygon region of interest; pixels belong to it when their centre is inside
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RegionSpec", into = "RegionSpec")]
pub struct Region {
    polygon: Polygon<f64>,
    bbox: BoundingBox,
}

/// Half-open pixel window `[row_start, row_end) x [col_start, col_end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelWindow {
    pub row_start: usize,
    pub row_end: usize,
    pub col_start: usize,
    pub col_end: usize,
}

impl PixelWindow {
    pub fn rows(&self) -> usize {
        self.row_end - self.row_start
    }

    pub fn cols(&self) -> usize {
        self.col_end - self.col_start
    }

    pub fn is_empty(&self) -> bool {
        self.rows() == 0 || self.cols() == 0
    }
}

fn ring(points: &[[f64; 2]]) -> LineString<f64> {
    LineString::from(points.iter().map(|p| Coord { x: p[0], y: p[1] }).collect::<Vec<_>>())
}

impl Region {
    pub fn new(polygon: Polygon<f64>) -> SarResult<Self> {
        let rect = polygon
            .bounding_rect()
            .ok_or_else(|| SarError::InvalidParameter("region polygon has no vertices".to_string()))?;
        if polygon.exterior().0.len() < 3 {
            return Err(SarError::InvalidParameter(format!(
                "region exterior needs at least 3 vertices, got {}",
                polygon.exterior().0.len()
            )));
        }
        let bbox = BoundingBox {
            min_x: rect.min().x,
            max_x: rect.max().x,
            min_y: rect.min().y,
            max_y: rect.max().y,
        };
        Ok(Self { polygon, bbox })
    }

    /// Axis-aligned rectangle region
    pub fn rectangle(bbox: BoundingBox) -> SarResult<Self> {
        Self::new(Polygon::new(
            LineString::from(vec![
                (bbox.min_x, bbox.min_y),
                (bbox.max_x, bbox.min_y),
                (bbox.max_x, bbox.max_y),
                (bbox.min_x, bbox.max_y),
                (bbox.min_x, bbox.min_y),
            ]),
            vec![],
        ))
    }

    /// Region covering the whole extent of a grid
    pub fn from_grid(grid: &GridSpec) -> SarResult<Self> {
        Self::rectangle(grid.bounding_box())
    }

    pub fn polygon(&self) -> &Polygon<f64> {
        &self.polygon
    }

    pub fn bounding_box(&self) -> BoundingBox {
        self.bbox
    }

    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        if x < self.bbox.min_x || x > self.bbox.max_x || y < self.bbox.min_y || y > self.bbox.max_y {
            return false;
        }
        self.polygon.contains(&Point::new(x, y))
    }

    /// Whether the centre of pixel (row, col) lies inside the region
    pub fn contains_pixel(&self, grid: &GridSpec, row: usize, col: usize) -> bool {
        let (x, y) = grid.transform.pixel_center(row, col);
        self.contains_point(x, y)
    }

    /// Pixel window of the grid covering the region's bounding box
    pub fn pixel_window(&self, grid: &GridSpec) -> PixelWindow {
        let t = &grid.transform;
        let (r0, c0) = t.geo_to_pixel(self.bbox.min_x, self.bbox.max_y);
        let (r1, c1) = t.geo_to_pixel(self.bbox.max_x, self.bbox.min_y);

        let clamp = |v: f64, n: usize| -> usize {
            if v.is_nan() || v <= 0.0 {
                0
            } else {
                (v as usize).min(n)
            }
        };

        let row_start = clamp(r0.min(r1).floor(), grid.rows);
        let row_end = clamp(r0.max(r1).ceil(), grid.rows).max(row_start);
        let col_start = clamp(c0.min(c1).floor(), grid.cols);
        let col_end = clamp(c0.max(c1).ceil(), grid.cols).max(col_start);
        PixelWindow { row_start, row_end, col_start, col_end }
    }
}

impl TryFrom<RegionSpec> for Region {
    type Error = SarError;

    fn try_from(spec: RegionSpec) -> SarResult<Self> {
        let holes = spec.holes.iter().map(|h| ring(h)).collect();
        Region::new(Polygon::new(ring(&spec.exterior), holes))
    }
}

impl From<Region> for RegionSpec {
    fn from(region: Region) -> Self {
        let points = |ls: &LineString<f64>| ls.coords().map(|c| [c.x, c.y]).collect::<Vec<_>>();
        RegionSpec {
            exterior: points(region.polygon.exterior()),
            holes: region.polygon.interiors().iter().map(points).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CoordinateSystem, GeoTransform};

    fn grid() -> GridSpec {
        GridSpec::new(
            10,
            10,
            GeoTransform::north_up(0.0, 100.0, 10.0, -10.0),
            CoordinateSystem::Projected { epsg: 32642 },
        )
    }

    #[test]
    fn test_pixel_window_of_sub_rectangle() {
        let region = Region::rectangle(BoundingBox { min_x: 20.0, max_x: 50.0, min_y: 30.0, max_y: 80.0 }).unwrap();
        let w = region.pixel_window(&grid());
        assert_eq!(w, PixelWindow { row_start: 2, row_end: 7, col_start: 2, col_end: 5 });
        assert!(region.contains_pixel(&grid(), 2, 2));
        assert!(!region.contains_pixel(&grid(), 1, 2));
    }

    #[test]
    fn test_window_is_clipped_to_grid() {
        let region = Region::rectangle(BoundingBox { min_x: -50.0, max_x: 500.0, min_y: -10.0, max_y: 400.0 }).unwrap();
        let w = region.pixel_window(&grid());
        assert_eq!(w, PixelWindow { row_start: 0, row_end: 10, col_start: 0, col_end: 10 });

        let outside = Region::rectangle(BoundingBox { min_x: 200.0, max_x: 300.0, min_y: 0.0, max_y: 50.0 }).unwrap();
        assert!(outside.pixel_window(&grid()).is_empty());
    }

    #[test]
    fn test_holes_exclude_pixels() {
        let json = r#"{
            "exterior": [[0, 0], [100, 0], [100, 100], [0, 100], [0, 0]],
            "holes": [[[40, 40], [60, 40], [60, 60], [40, 60], [40, 40]]]
        }"#;
        let region: Region = serde_json::from_str(json).unwrap();
        assert!(!region.contains_pixel(&grid(), 5, 5));
        assert!(region.contains_pixel(&grid(), 0, 0));

        let back: RegionSpec = region.clone().into();
        assert_eq!(back.holes.len(), 1);
    }

    #[test]
    fn test_degenerate_polygon_rejected() {
        let spec = RegionSpec { exterior: vec![], holes: vec![] };
        assert!(Region::try_from(spec).is_err());
    }
}
