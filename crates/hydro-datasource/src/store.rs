//! Facade wiring the accessor, coordinator and caches together.

use chrono::Duration;
use hydro_common::{DataError, DataResult, GeoArray};
use std::num::NonZeroUsize;
use std::sync::Arc;

use crate::accessor::DatasetAccessor;
use crate::backend::BackendPool;
use crate::cache::LocalCache;
use crate::codec::CodecRegistry;
use crate::config::StoreConfig;
use crate::reference::DataReference;
use crate::template::PathTemplate;
use crate::writeback::WriteBackCoordinator;

/// The surface calling tools use.
///
/// Owns the connector pool and caches explicitly; dropping the store
/// tears everything down. Cheap to share behind an `Arc` across
/// concurrent workers processing independent references.
pub struct DataStore {
    accessor: DatasetAccessor,
    writer: WriteBackCoordinator,
}

impl DataStore {
    /// Assemble a store from parts. For full control over codecs and
    /// caches use [`DatasetAccessor`]/[`WriteBackCoordinator`] directly.
    pub fn new(pool: BackendPool, codecs: CodecRegistry) -> Self {
        let pool = Arc::new(pool);
        let codecs = Arc::new(codecs);
        Self {
            accessor: DatasetAccessor::new(Arc::clone(&pool), Arc::clone(&codecs)),
            writer: WriteBackCoordinator::new(pool, codecs),
        }
    }

    /// Assemble a store from configuration profiles.
    pub fn from_config(config: &StoreConfig) -> DataResult<Self> {
        let mut pool = BackendPool::new();
        for profile in &config.backends {
            pool.register(profile.connect()?);
        }
        if pool.is_empty() {
            return Err(DataError::Internal(
                "store config declares no backends".into(),
            ));
        }

        let pool = Arc::new(pool);
        let codecs = Arc::new(CodecRegistry::new());
        let mut accessor = DatasetAccessor::new(Arc::clone(&pool), Arc::clone(&codecs))
            .with_tie_break(config.tie_break);
        let mut writer = WriteBackCoordinator::new(pool, codecs);

        if let Some(dir) = &config.cache_dir {
            let cache = Arc::new(LocalCache::new(dir)?);
            accessor = accessor.with_cache(Arc::clone(&cache));
            writer = writer.with_cache(cache);
        }
        if let Some(capacity) = config.decoded_cache_entries.and_then(NonZeroUsize::new) {
            accessor = accessor.with_decoded_cache(capacity);
        }

        Ok(Self { accessor, writer })
    }

    /// Read and decode the dataset at a reference.
    pub async fn get(
        &self,
        reference: &DataReference,
        template: &PathTemplate,
        tolerance: Option<Duration>,
    ) -> DataResult<GeoArray> {
        self.accessor.get(reference, template, tolerance).await
    }

    /// Persist an array as the authoritative data for a reference.
    pub async fn put(
        &self,
        reference: &DataReference,
        template: &PathTemplate,
        array: &GeoArray,
        overwrite: bool,
    ) -> DataResult<()> {
        self.writer.put(reference, template, array, overwrite).await?;
        // The coordinator cleared the disk mirror; this also drops any
        // decoded in-memory copy.
        self.accessor.invalidate(reference).await
    }

    /// Whether data exists at the exact resolved address.
    pub async fn exists(
        &self,
        reference: &DataReference,
        template: &PathTemplate,
    ) -> DataResult<bool> {
        self.accessor.exists(reference, template).await
    }

    /// Cache-invalidation hook for callers that rewrite data outside
    /// the write-back path.
    pub async fn invalidate(&self, reference: &DataReference) -> DataResult<()> {
        self.accessor.invalidate(reference).await
    }

    pub fn accessor(&self) -> &DatasetAccessor {
        &self.accessor
    }

    pub fn writer(&self) -> &WriteBackCoordinator {
        &self.writer
    }
}
