//! Georeferenced array types for raster data.

use serde::{Deserialize, Serialize};

/// Affine georeferencing for a regular raster grid.
///
/// Maps column/row indices to projected or geographic coordinates.
/// `x_origin`/`y_origin` locate the outer corner of the top-left cell;
/// `dy` is negative for north-up rasters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    /// X coordinate of the top-left corner
    pub x_origin: f64,
    /// Y coordinate of the top-left corner
    pub y_origin: f64,
    /// Cell width in CRS units
    pub dx: f64,
    /// Cell height in CRS units (negative for north-up data)
    pub dy: f64,
}

impl GeoTransform {
    pub fn new(x_origin: f64, y_origin: f64, dx: f64, dy: f64) -> Self {
        Self {
            x_origin,
            y_origin,
            dx,
            dy,
        }
    }

    /// Coordinates of the center of cell (col, row).
    pub fn cell_center(&self, col: usize, row: usize) -> (f64, f64) {
        (
            self.x_origin + (col as f64 + 0.5) * self.dx,
            self.y_origin + (row as f64 + 0.5) * self.dy,
        )
    }
}

/// A decoded raster payload with its spatial metadata.
///
/// Values are stored row-major, north-up. Downstream numeric processing
/// (index computation, aggregation) happens outside this crate; here the
/// array is only decoded, cached and re-encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoArray {
    /// Number of columns
    pub width: usize,
    /// Number of rows
    pub height: usize,
    /// Cell values, row-major, length == width * height
    pub values: Vec<f32>,
    /// Affine transform; None when the source carried no georeferencing
    pub transform: Option<GeoTransform>,
    /// Coordinate reference system (WKT or "EPSG:nnnn"); None when unknown
    pub crs: Option<String>,
    /// Marker for missing data
    pub nodata: Option<f32>,
}

impl GeoArray {
    /// Create a new array from row-major values.
    ///
    /// Returns None when the value count does not match the dimensions.
    pub fn new(width: usize, height: usize, values: Vec<f32>) -> Option<Self> {
        if values.len() != width * height {
            return None;
        }
        Some(Self {
            width,
            height,
            values,
            transform: None,
            crs: None,
            nodata: None,
        })
    }

    /// Create an array filled with a constant value.
    pub fn filled(width: usize, height: usize, value: f32) -> Self {
        Self {
            width,
            height,
            values: vec![value; width * height],
            transform: None,
            crs: None,
            nodata: None,
        }
    }

    pub fn with_transform(mut self, transform: GeoTransform) -> Self {
        self.transform = Some(transform);
        self
    }

    pub fn with_crs(mut self, crs: impl Into<String>) -> Self {
        self.crs = Some(crs.into());
        self
    }

    pub fn with_nodata(mut self, nodata: f32) -> Self {
        self.nodata = Some(nodata);
        self
    }

    /// Value at (col, row), or None when out of bounds.
    pub fn value_at(&self, col: usize, row: usize) -> Option<f32> {
        if col >= self.width || row >= self.height {
            return None;
        }
        Some(self.values[row * self.width + col])
    }

    /// True when the cell holds the nodata marker.
    pub fn is_nodata(&self, value: f32) -> bool {
        match self.nodata {
            Some(nd) => value == nd || (value.is_nan() && nd.is_nan()),
            None => false,
        }
    }

    /// True when the array carries both a transform and a CRS.
    ///
    /// Arrays without complete georeferencing must not be written back:
    /// a raster file that cannot be located on the ground is unusable to
    /// downstream consumers.
    pub fn is_georeferenced(&self) -> bool {
        self.transform.is_some() && self.crs.is_some()
    }

    /// Total number of cells.
    pub fn len(&self) -> usize {
        self.width * self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}
