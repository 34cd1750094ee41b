//! Data source abstraction for the hydro data tools.
//!
//! Resolves a logical dataset reference (variable, timestamp, tile) into
//! bytes on one of several storage backends, decodes them into a
//! georeferenced array and writes derived products back through the same
//! abstraction. Provides unified interfaces for:
//! - Path template expansion and reverse matching
//! - Backend connectors (local filesystem, SFTP, S3-compatible object storage)
//! - Cache-through dataset access with tolerance-window fallback
//! - Write-back with cache invalidation

pub mod accessor;
pub mod backend;
pub mod cache;
pub mod codec;
pub mod config;
pub mod reference;
pub mod retry;
pub mod store;
pub mod template;
pub mod writeback;

pub use accessor::DatasetAccessor;
pub use backend::{BackendKind, BackendPool, DataBackend};
pub use cache::{CacheEntry, LocalCache};
pub use codec::{CodecRegistry, DataFormat, GridCodec, RasterCodec};
pub use config::{BackendProfile, StoreConfig};
pub use reference::DataReference;
pub use retry::RetryPolicy;
pub use store::DataStore;
pub use template::{PathTemplate, ResolvedPath, TieBreak};
pub use writeback::WriteBackCoordinator;
