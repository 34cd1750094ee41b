//! Raster payload encoding and decoding.
//!
//! The data layer owns format *selection*, not raster parsing: GeoTIFF
//! and NetCDF codecs are supplied by the array-processing collaborator
//! and registered here. A native flat-binary grid codec ships in-crate
//! so the layer works stand-alone (intermediate products, tests).

use bytes::{Buf, BufMut, Bytes, BytesMut};
use hydro_common::{DataError, DataResult, GeoArray, GeoTransform};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Payload encodings a resolved path can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataFormat {
    /// Native flat-binary grid (see [`GridCodec`])
    Grid,
    GeoTiff,
    NetCdf,
}

impl DataFormat {
    /// Guess the format from a path's extension.
    pub fn from_path(path: &str) -> Option<Self> {
        let ext = path.rsplit('.').next()?;
        match ext.to_ascii_lowercase().as_str() {
            "bin" | "grid" => Some(DataFormat::Grid),
            "tif" | "tiff" => Some(DataFormat::GeoTiff),
            "nc" => Some(DataFormat::NetCdf),
            _ => None,
        }
    }
}

impl std::fmt::Display for DataFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DataFormat::Grid => "grid",
            DataFormat::GeoTiff => "geotiff",
            DataFormat::NetCdf => "netcdf",
        };
        write!(f, "{}", s)
    }
}

/// Byte-level raster codec.
///
/// Implementations must round-trip: `decode(encode(a)) == a` for any
/// georeferenced array, within the encoding's precision.
pub trait RasterCodec: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> DataResult<GeoArray>;
    fn encode(&self, array: &GeoArray) -> DataResult<Bytes>;
}

/// Native flat-binary grid format.
///
/// Layout (little-endian): magic `HGR1`, u32 width, u32 height, u8 flags
/// (bit 0 transform, bit 1 nodata, bit 2 crs), optional 4xf64 transform,
/// optional f32 nodata, optional u16-length-prefixed CRS string, then
/// width*height f32 values row-major.
pub struct GridCodec;

const GRID_MAGIC: &[u8; 4] = b"HGR1";
const FLAG_TRANSFORM: u8 = 0b0000_0001;
const FLAG_NODATA: u8 = 0b0000_0010;
const FLAG_CRS: u8 = 0b0000_0100;

impl RasterCodec for GridCodec {
    fn decode(&self, bytes: &[u8]) -> DataResult<GeoArray> {
        let mut buf = bytes;
        if buf.remaining() < 13 {
            return Err(DataError::Format("grid payload truncated".into()));
        }
        let mut magic = [0u8; 4];
        buf.copy_to_slice(&mut magic);
        if &magic != GRID_MAGIC {
            return Err(DataError::Format("bad grid magic".into()));
        }
        let width = buf.get_u32_le() as usize;
        let height = buf.get_u32_le() as usize;
        let flags = buf.get_u8();

        let transform = if flags & FLAG_TRANSFORM != 0 {
            if buf.remaining() < 32 {
                return Err(DataError::Format("grid transform truncated".into()));
            }
            Some(GeoTransform::new(
                buf.get_f64_le(),
                buf.get_f64_le(),
                buf.get_f64_le(),
                buf.get_f64_le(),
            ))
        } else {
            None
        };

        let nodata = if flags & FLAG_NODATA != 0 {
            if buf.remaining() < 4 {
                return Err(DataError::Format("grid nodata truncated".into()));
            }
            Some(buf.get_f32_le())
        } else {
            None
        };

        let crs = if flags & FLAG_CRS != 0 {
            if buf.remaining() < 2 {
                return Err(DataError::Format("grid crs truncated".into()));
            }
            let len = buf.get_u16_le() as usize;
            if buf.remaining() < len {
                return Err(DataError::Format("grid crs truncated".into()));
            }
            let mut raw = vec![0u8; len];
            buf.copy_to_slice(&mut raw);
            Some(
                String::from_utf8(raw)
                    .map_err(|_| DataError::Format("grid crs is not UTF-8".into()))?,
            )
        } else {
            None
        };

        let count = width
            .checked_mul(height)
            .ok_or_else(|| DataError::Format("grid dimensions overflow".into()))?;
        if buf.remaining() != count * 4 {
            return Err(DataError::Format(format!(
                "grid value section is {} bytes, expected {}",
                buf.remaining(),
                count * 4
            )));
        }
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            values.push(buf.get_f32_le());
        }

        let mut array = GeoArray::new(width, height, values)
            .ok_or_else(|| DataError::Format("grid dimensions inconsistent".into()))?;
        array.transform = transform;
        array.nodata = nodata;
        array.crs = crs;
        Ok(array)
    }

    fn encode(&self, array: &GeoArray) -> DataResult<Bytes> {
        if array.values.len() != array.width * array.height {
            return Err(DataError::Format(
                "array value count does not match dimensions".into(),
            ));
        }
        let mut buf = BytesMut::with_capacity(64 + array.values.len() * 4);
        buf.put_slice(GRID_MAGIC);
        buf.put_u32_le(array.width as u32);
        buf.put_u32_le(array.height as u32);

        let mut flags = 0u8;
        if array.transform.is_some() {
            flags |= FLAG_TRANSFORM;
        }
        if array.nodata.is_some() {
            flags |= FLAG_NODATA;
        }
        if array.crs.is_some() {
            flags |= FLAG_CRS;
        }
        buf.put_u8(flags);

        if let Some(t) = array.transform {
            buf.put_f64_le(t.x_origin);
            buf.put_f64_le(t.y_origin);
            buf.put_f64_le(t.dx);
            buf.put_f64_le(t.dy);
        }
        if let Some(nd) = array.nodata {
            buf.put_f32_le(nd);
        }
        if let Some(crs) = &array.crs {
            if crs.len() > u16::MAX as usize {
                return Err(DataError::Format("CRS string too long".into()));
            }
            buf.put_u16_le(crs.len() as u16);
            buf.put_slice(crs.as_bytes());
        }
        for v in &array.values {
            buf.put_f32_le(*v);
        }
        Ok(buf.freeze())
    }
}

/// Dispatch table from declared format to codec.
pub struct CodecRegistry {
    codecs: HashMap<DataFormat, Arc<dyn RasterCodec>>,
}

impl CodecRegistry {
    /// Registry with the native grid codec pre-registered.
    pub fn new() -> Self {
        let mut codecs: HashMap<DataFormat, Arc<dyn RasterCodec>> = HashMap::new();
        codecs.insert(DataFormat::Grid, Arc::new(GridCodec));
        Self { codecs }
    }

    /// Register (or replace) the codec for a format.
    pub fn register(&mut self, format: DataFormat, codec: Arc<dyn RasterCodec>) {
        self.codecs.insert(format, codec);
    }

    pub fn get(&self, format: DataFormat) -> DataResult<Arc<dyn RasterCodec>> {
        self.codecs.get(&format).cloned().ok_or_else(|| {
            DataError::Format(format!("no codec registered for format '{}'", format))
        })
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::new()
    }
}
