//! Common types shared across the hydro data tools.
//!
//! Provides:
//! - The error taxonomy used by every storage backend and accessor
//! - Georeferenced array types produced and consumed by the data layer

pub mod error;
pub mod geo;

pub use error::{DataError, DataResult};
pub use geo::{GeoArray, GeoTransform};
