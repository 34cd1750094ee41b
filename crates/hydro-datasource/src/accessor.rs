//! Cache-through read path for logical references.

use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use hydro_common::{DataError, DataResult, GeoArray};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::backend::BackendPool;
use crate::cache::LocalCache;
use crate::codec::CodecRegistry;
use crate::reference::DataReference;
use crate::template::{PathTemplate, ResolvedPath, TieBreak};

/// Resolves, fetches and decodes datasets.
///
/// Read algorithm: local cache first, then resolved candidates in
/// order. Only `NotFound` advances to the next candidate; transport
/// and permission failures abort the search, and a decode failure on a
/// fetched payload is fatal rather than masked by an older fallback.
/// Transient-transport retry happens inside the connectors, never here.
pub struct DatasetAccessor {
    pool: Arc<BackendPool>,
    codecs: Arc<CodecRegistry>,
    cache: Option<Arc<LocalCache>>,
    decoded: Option<Mutex<LruCache<String, GeoArray>>>,
    tie_break: TieBreak,
}

impl DatasetAccessor {
    pub fn new(pool: Arc<BackendPool>, codecs: Arc<CodecRegistry>) -> Self {
        Self {
            pool,
            codecs,
            cache: None,
            decoded: None,
            tie_break: TieBreak::default(),
        }
    }

    /// Enable the on-disk mirror.
    pub fn with_cache(mut self, cache: Arc<LocalCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Keep up to `capacity` decoded arrays in memory.
    pub fn with_decoded_cache(mut self, capacity: NonZeroUsize) -> Self {
        self.decoded = Some(Mutex::new(LruCache::new(capacity)));
        self
    }

    pub fn with_tie_break(mut self, tie_break: TieBreak) -> Self {
        self.tie_break = tie_break;
        self
    }

    /// Fetch and decode the dataset at `reference`.
    ///
    /// With a tolerance, the nearest available timestamp within the
    /// window is accepted when the exact one is missing.
    #[instrument(skip(self, template), fields(reference = %reference))]
    pub async fn get(
        &self,
        reference: &DataReference,
        template: &PathTemplate,
        tolerance: Option<Duration>,
    ) -> DataResult<GeoArray> {
        let key = reference.cache_key();

        if let Some(decoded) = &self.decoded {
            if let Some(array) = decoded.lock().await.get(&key) {
                debug!("Decoded cache hit");
                return Ok(array.clone());
            }
        }

        if let Some(cache) = &self.cache {
            if let Some((entry, bytes)) = cache.lookup(reference).await? {
                let array = self.codecs.get(entry.format)?.decode(&bytes)?;
                self.remember(&key, &array).await;
                return Ok(array);
            }
        }

        let candidates = template.candidates(reference, tolerance, self.tie_break)?;
        let (candidate, bytes) = self.fetch_first(reference, &candidates).await?;

        // A corrupt authoritative file must not be masked by an older
        // fallback, so decode failures surface immediately.
        let array = self.codecs.get(candidate.format)?.decode(&bytes)?;

        if let Some(cache) = &self.cache {
            // Cache population is best-effort; a full disk must not fail
            // an otherwise successful read.
            if let Err(err) = cache.store(reference, candidate.format, &bytes).await {
                warn!(error = %err, "Failed to populate local cache");
            }
        }
        self.remember(&key, &array).await;

        Ok(array)
    }

    /// Invalidate cached data, then fetch from the authoritative source.
    pub async fn refresh(
        &self,
        reference: &DataReference,
        template: &PathTemplate,
        tolerance: Option<Duration>,
    ) -> DataResult<GeoArray> {
        self.invalidate(reference).await?;
        self.get(reference, template, tolerance).await
    }

    /// Drop any cached data for a reference.
    pub async fn invalidate(&self, reference: &DataReference) -> DataResult<()> {
        if let Some(decoded) = &self.decoded {
            decoded.lock().await.pop(&reference.cache_key());
        }
        if let Some(cache) = &self.cache {
            cache.invalidate(reference).await?;
        }
        Ok(())
    }

    /// Whether data exists at the exact resolved address.
    pub async fn exists(
        &self,
        reference: &DataReference,
        template: &PathTemplate,
    ) -> DataResult<bool> {
        let path = template.resolve(reference)?;
        let connector = self.pool.connector(path.backend)?;
        connector.exists(&path.address).await
    }

    /// Timestamps with data available in `[start, end]`, discovered by
    /// listing the template's static prefix and reverse-matching.
    pub async fn available_times(
        &self,
        template: &PathTemplate,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> DataResult<Vec<DateTime<Utc>>> {
        let connector = self.pool.connector(template.backend())?;
        let addresses = connector.list(template.static_prefix()).await?;

        let mut times: Vec<DateTime<Utc>> = addresses
            .iter()
            .filter_map(|a| template.extract(a))
            .filter_map(|(time, _)| time)
            .filter(|t| *t >= start && *t <= end)
            .collect();
        times.sort();
        times.dedup();
        Ok(times)
    }

    /// Tile identifiers with data for the given reference's timestamp.
    pub async fn available_tiles(
        &self,
        template: &PathTemplate,
        reference: &DataReference,
    ) -> DataResult<Vec<String>> {
        let connector = self.pool.connector(template.backend())?;
        let addresses = connector.list(template.static_prefix()).await?;

        let mut tiles: Vec<String> = addresses
            .iter()
            .filter_map(|a| template.extract(a))
            .filter(|(time, _)| match (reference.time, time) {
                (Some(wanted), Some(found)) => wanted == *found,
                (None, _) => true,
                (Some(_), None) => false,
            })
            .filter_map(|(_, mut tags)| tags.remove("tile"))
            .collect();
        tiles.sort();
        tiles.dedup();
        Ok(tiles)
    }

    /// Try candidates in order; `NotFound` falls through, anything else
    /// aborts. An explicit fold rather than nested error handling.
    async fn fetch_first<'a>(
        &self,
        reference: &DataReference,
        candidates: &'a [ResolvedPath],
    ) -> DataResult<(&'a ResolvedPath, Bytes)> {
        let mut attempted = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            let connector = self.pool.connector(candidate.backend)?;
            match connector.fetch(&candidate.address).await {
                Ok(bytes) => {
                    debug!(address = %candidate.address, "Candidate hit");
                    return Ok((candidate, bytes));
                }
                Err(err) if err.is_not_found() => {
                    attempted.push(candidate.address.clone());
                    continue;
                }
                Err(err) => return Err(err),
            }
        }

        Err(DataError::NotFound {
            address: format!("{} (tried: {})", reference, attempted.join(", ")),
        })
    }

    async fn remember(&self, key: &str, array: &GeoArray) {
        if let Some(decoded) = &self.decoded {
            decoded.lock().await.put(key.to_string(), array.clone());
        }
    }
}
