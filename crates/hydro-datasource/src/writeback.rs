//! Write-back of derived products through the abstraction layer.

use hydro_common::{DataError, DataResult, GeoArray};
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::backend::BackendPool;
use crate::cache::LocalCache;
use crate::codec::CodecRegistry;
use crate::reference::DataReference;
use crate::template::PathTemplate;

/// Persists arrays to their authoritative storage location.
///
/// Write-back resolves exactly one destination, never a fallback
/// search, and invalidates any matching cache entry on success, so a
/// subsequent read cannot return pre-write data.
pub struct WriteBackCoordinator {
    pool: Arc<BackendPool>,
    codecs: Arc<CodecRegistry>,
    cache: Option<Arc<LocalCache>>,
}

impl WriteBackCoordinator {
    pub fn new(pool: Arc<BackendPool>, codecs: Arc<CodecRegistry>) -> Self {
        Self {
            pool,
            codecs,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<LocalCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Serialize `array` and store it at the resolved destination.
    ///
    /// Fails with `AlreadyExists` when `overwrite` is false and the
    /// destination holds data, and with a format error when the array
    /// lacks a transform or CRS; a raster without georeferencing is
    /// unusable downstream.
    #[instrument(skip(self, template, array), fields(reference = %reference))]
    pub async fn put(
        &self,
        reference: &DataReference,
        template: &PathTemplate,
        array: &GeoArray,
        overwrite: bool,
    ) -> DataResult<()> {
        if !array.is_georeferenced() {
            return Err(DataError::Format(format!(
                "array for {} is missing spatial metadata (transform and CRS required)",
                reference
            )));
        }

        let destination = template.resolve(reference)?;
        let bytes = self.codecs.get(destination.format)?.encode(array)?;

        let connector = self.pool.connector(destination.backend)?;
        connector
            .store(&destination.address, bytes, overwrite)
            .await?;
        debug!(address = %destination.address, "Write-back complete");

        // Stale cache after a successful write is a correctness bug.
        if let Some(cache) = &self.cache {
            cache.invalidate(reference).await?;
        }
        Ok(())
    }

    /// Remove the data at a reference's resolved address, dropping any
    /// cache entry with it.
    pub async fn delete(
        &self,
        reference: &DataReference,
        template: &PathTemplate,
    ) -> DataResult<()> {
        let destination = template.resolve(reference)?;
        let connector = self.pool.connector(destination.backend)?;
        connector.delete(&destination.address).await?;

        if let Some(cache) = &self.cache {
            cache.invalidate(reference).await?;
        }
        Ok(())
    }
}
