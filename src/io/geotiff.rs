use crate::core::raster::Raster;
use crate::types::{CoordinateSystem, GeoTransform, GridSpec, SarError, SarResult, Units};
use ndarray::Array2;
use num_traits::ToPrimitive;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::tags::Tag;
use tiff::ColorType;

pub(crate) const MODEL_PIXEL_SCALE: u16 = 33550;
pub(crate) const MODEL_TIEPOINT: u16 = 33922;
pub(crate) const MODEL_TRANSFORMATION: u16 = 34264;
pub(crate) const GEO_KEY_DIRECTORY: u16 = 34735;
pub(crate) const GDAL_NODATA: u16 = 42113;

const GT_MODEL_TYPE_KEY: u32 = 1024;
const PROJECTED_CS_TYPE_KEY: u32 = 3072;
const MODEL_TYPE_GEOGRAPHIC: u32 = 2;

fn tag(code: u16) -> Tag {
    Tag::from_u16_exhaustive(code)
}

fn samples_to_f32<T: ToPrimitive>(buf: Vec<T>) -> Vec<f32> {
    buf.into_iter().map(|v| v.to_f32().unwrap_or(f32::NAN)).collect()
}

/// Single-band GeoTIFF reader
pub struct GeoTiffReader;

impl GeoTiffReader {
    /// Read the first band of a GeoTIFF file as a raster layer
    pub fn read<P: AsRef<Path>>(path: P, band: &str, units: Units) -> SarResult<Raster> {
        log::info!("Reading '{}' from: {}", band, path.as_ref().display());
        let file = File::open(path.as_ref())?;
        Self::decode(BufReader::new(file), band, units)
    }

    /// Decode a GeoTIFF from any seekable source
    pub fn decode<R: Read + Seek>(reader: R, band: &str, units: Units) -> SarResult<Raster> {
        let mut decoder = Decoder::new(reader)?;
        let (width, height) = decoder.dimensions()?;
        let (rows, cols) = (height as usize, width as usize);

        match decoder.colortype()? {
            ColorType::Gray(_) => {}
            other => {
                return Err(SarError::InvalidFormat(format!(
                    "expected a single-band raster, found {:?}",
                    other
                )))
            }
        }

        let samples = match decoder.read_image()? {
            DecodingResult::U8(buf) => samples_to_f32(buf),
            DecodingResult::U16(buf) => samples_to_f32(buf),
            DecodingResult::U32(buf) => samples_to_f32(buf),
            DecodingResult::U64(buf) => samples_to_f32(buf),
            DecodingResult::I8(buf) => samples_to_f32(buf),
            DecodingResult::I16(buf) => samples_to_f32(buf),
            DecodingResult::I32(buf) => samples_to_f32(buf),
            DecodingResult::I64(buf) => samples_to_f32(buf),
            DecodingResult::F32(buf) => buf,
            DecodingResult::F64(buf) => samples_to_f32(buf),
            #[allow(unreachable_patterns)]
            _ => return Err(SarError::InvalidFormat("unsupported TIFF sample format".to_string())),
        };
        let mut data = Array2::from_shape_vec((rows, cols), samples)
            .map_err(|e| SarError::InvalidFormat(format!("Failed to reshape TIFF samples: {}", e)))?;

        let transform = Self::read_transform(&mut decoder)?;
        transform.validate()?;
        let coordinate_system = Self::read_coordinate_system(&mut decoder);
        let grid = GridSpec::new(rows, cols, transform, coordinate_system);
        log::debug!("GeoTIFF grid: {}", grid.describe());

        if let Some(nodata) = Self::read_nodata(&mut decoder) {
            let mut masked = 0usize;
            data.mapv_inplace(|v| {
                if v == nodata {
                    masked += 1;
                    f32::NAN
                } else {
                    v
                }
            });
            log::debug!("Nodata value {} masks {} samples", nodata, masked);
        }

        Raster::new(band, units, grid, data)
    }

    /// Affine transform from ModelTransformation, or ModelPixelScale plus ModelTiepoint
    fn read_transform<R: Read + Seek>(decoder: &mut Decoder<R>) -> SarResult<GeoTransform> {
        if let Ok(m) = decoder.get_tag_f64_vec(tag(MODEL_TRANSFORMATION)) {
            if m.len() >= 8 {
                return Ok(GeoTransform {
                    top_left_x: m[3],
                    pixel_width: m[0],
                    rotation_x: m[1],
                    top_left_y: m[7],
                    rotation_y: m[4],
                    pixel_height: m[5],
                });
            }
        }

        let scale = decoder.get_tag_f64_vec(tag(MODEL_PIXEL_SCALE));
        let tiepoint = decoder.get_tag_f64_vec(tag(MODEL_TIEPOINT));
        match (scale, tiepoint) {
            (Ok(scale), Ok(tiepoint)) if scale.len() >= 2 && tiepoint.len() >= 6 => {
                // tiepoint: [I, J, K, X, Y, Z]
                let top_left_x = tiepoint[3] - tiepoint[0] * scale[0];
                let top_left_y = tiepoint[4] + tiepoint[1] * scale[1];
                Ok(GeoTransform::north_up(top_left_x, top_left_y, scale[0], -scale[1]))
            }
            _ => Err(SarError::InvalidFormat(
                "TIFF has no ModelTransformation or ModelPixelScale/ModelTiepoint tags".to_string(),
            )),
        }
    }

    /// Model type and EPSG code from the GeoKey directory; projected when unknown
    fn read_coordinate_system<R: Read + Seek>(decoder: &mut Decoder<R>) -> CoordinateSystem {
        let keys = match decoder.get_tag_u32_vec(tag(GEO_KEY_DIRECTORY)) {
            Ok(keys) if keys.len() >= 4 => keys,
            _ => {
                log::warn!("No GeoKey directory; assuming a projected grid in metres");
                return CoordinateSystem::Projected { epsg: 0 };
            }
        };

        let mut model_type = None;
        let mut epsg = 0;
        // Header of four shorts, then (key, location, count, value) entries
        for entry in keys[4..].chunks_exact(4) {
            // Location 0 means the value is stored inline
            if entry[1] != 0 {
                continue;
            }
            match entry[0] {
                GT_MODEL_TYPE_KEY => model_type = Some(entry[3]),
                PROJECTED_CS_TYPE_KEY => epsg = entry[3],
                _ => {}
            }
        }

        match model_type {
            Some(MODEL_TYPE_GEOGRAPHIC) => CoordinateSystem::Geographic,
            _ => CoordinateSystem::Projected { epsg },
        }
    }

    fn read_nodata<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<f32> {
        let text = decoder.get_tag_ascii_string(tag(GDAL_NODATA)).ok()?;
        let text = text.trim_matches(char::from(0)).trim();
        match text.parse::<f32>() {
            Ok(v) => Some(v),
            Err(_) => {
                log::warn!("Ignoring unparsable nodata value '{}'", text);
                None
            }
        }
    }
}
