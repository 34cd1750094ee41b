//! On-disk mirror of fetched payloads.
//!
//! Avoids repeated remote fetches when the same reference is touched by
//! several processing steps. Keyed by the reference's stable string
//! encoding; each entry is a data file plus a JSON sidecar, both
//! committed atomically (write-temp-then-rename) so a crash or a
//! cancelled fetch never leaves an entry claiming completeness.
//!
//! No built-in eviction: the cache is a latency optimization, not a
//! bounded structure. Sequential time-series runs rarely grow it
//! unboundedly within one invocation; callers needing bounded disk
//! usage run an external sweep. Single-process ownership is assumed.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use hydro_common::{DataError, DataResult};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

use crate::codec::DataFormat;
use crate::reference::DataReference;

/// A committed cache entry.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Stable encoding of the cached reference
    pub key: String,
    /// Path of the mirrored payload on the local filesystem
    pub path: PathBuf,
    /// Declared payload format
    pub format: DataFormat,
    /// When the payload was last fetched from its source
    pub last_verified: DateTime<Utc>,
}

/// Sidecar record, one JSON file per entry.
#[derive(Debug, Serialize, Deserialize)]
struct SidecarRecord {
    reference: String,
    format: DataFormat,
    last_verified: DateTime<Utc>,
}

/// On-disk cache rooted at a directory owned by this process.
pub struct LocalCache {
    root: PathBuf,
}

impl LocalCache {
    /// Open (creating if needed) a cache directory.
    pub fn new(root: impl Into<PathBuf>) -> DataResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .map_err(|e| DataError::Cache(format!("cannot create cache dir: {}", e)))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn data_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.bin", key))
    }

    fn sidecar_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.json", key))
    }

    /// Look up a committed entry and its payload.
    ///
    /// An entry whose sidecar exists but whose payload is missing is
    /// treated as absent and swept.
    pub async fn lookup(
        &self,
        reference: &DataReference,
    ) -> DataResult<Option<(CacheEntry, Bytes)>> {
        let key = reference.cache_key();
        let sidecar_path = self.sidecar_path(&key);

        let raw = match tokio::fs::read(&sidecar_path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(DataError::Cache(e.to_string())),
        };
        let record: SidecarRecord = serde_json::from_slice(&raw)
            .map_err(|e| DataError::Cache(format!("corrupt sidecar for '{}': {}", key, e)))?;

        let data_path = self.data_path(&key);
        let data = match tokio::fs::read(&data_path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let _ = tokio::fs::remove_file(&sidecar_path).await;
                return Ok(None);
            }
            Err(e) => return Err(DataError::Cache(e.to_string())),
        };

        debug!(key = %key, size = data.len(), "Cache hit");
        Ok(Some((
            CacheEntry {
                key,
                path: data_path,
                format: record.format,
                last_verified: record.last_verified,
            },
            Bytes::from(data),
        )))
    }

    /// Commit a payload for a reference.
    ///
    /// The payload lands first, the sidecar second; both via temp file
    /// plus rename. The entry only becomes visible once the sidecar
    /// rename completes.
    #[instrument(skip(self, data), fields(key = %reference.cache_key(), size = data.len()))]
    pub async fn store(
        &self,
        reference: &DataReference,
        format: DataFormat,
        data: &Bytes,
    ) -> DataResult<CacheEntry> {
        let key = reference.cache_key();
        let data_path = self.data_path(&key);

        write_atomic(&self.root, &data_path, data.clone()).await?;

        let record = SidecarRecord {
            reference: key.clone(),
            format,
            last_verified: Utc::now(),
        };
        let sidecar = serde_json::to_vec_pretty(&record)
            .map_err(|e| DataError::Cache(e.to_string()))?;
        write_atomic(&self.root, &self.sidecar_path(&key), Bytes::from(sidecar)).await?;

        debug!("Cache entry committed");
        Ok(CacheEntry {
            key,
            path: data_path,
            format: record.format,
            last_verified: record.last_verified,
        })
    }

    /// Drop the entry for a reference, if any.
    ///
    /// The sidecar goes first so a crash mid-invalidation can only leave
    /// an orphan payload, never a live entry pointing at stale data.
    pub async fn invalidate(&self, reference: &DataReference) -> DataResult<()> {
        let key = reference.cache_key();
        for path in [self.sidecar_path(&key), self.data_path(&key)] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(DataError::Cache(e.to_string())),
            }
        }
        debug!(key = %key, "Cache entry invalidated");
        Ok(())
    }
}

/// Write through a uniquely named temp file in the cache root, then
/// rename into place. Concurrent writers for the same destination each
/// get their own temp file, so the committed file is always one whole
/// payload (last rename wins).
async fn write_atomic(root: &Path, path: &Path, data: Bytes) -> DataResult<()> {
    let root = root.to_path_buf();
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let mut tmp = tempfile::NamedTempFile::new_in(&root)
            .map_err(|e| DataError::Cache(e.to_string()))?;
        tmp.write_all(&data)
            .map_err(|e| DataError::Cache(e.to_string()))?;
        tmp.persist(&path)
            .map_err(|e| DataError::Cache(e.to_string()))?;
        Ok(())
    })
    .await
    .map_err(|e| DataError::Cache(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn reference() -> DataReference {
        DataReference::new("precip").tile("adda")
    }

    #[tokio::test]
    async fn lookup_misses_then_hits_after_store() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalCache::new(dir.path()).unwrap();
        let r = reference();

        assert!(cache.lookup(&r).await.unwrap().is_none());

        let payload = Bytes::from_static(b"raster-bytes");
        cache.store(&r, DataFormat::Grid, &payload).await.unwrap();

        let (entry, data) = cache.lookup(&r).await.unwrap().unwrap();
        assert_eq!(data, payload);
        assert_eq!(entry.format, DataFormat::Grid);
        assert_eq!(entry.key, r.cache_key());
    }

    #[tokio::test]
    async fn invalidate_removes_the_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalCache::new(dir.path()).unwrap();
        let r = reference();
        cache
            .store(&r, DataFormat::Grid, &Bytes::from_static(b"x"))
            .await
            .unwrap();
        cache.invalidate(&r).await.unwrap();
        assert!(cache.lookup(&r).await.unwrap().is_none());
        // Invalidating twice is fine.
        cache.invalidate(&r).await.unwrap();
    }

    #[tokio::test]
    async fn orphan_sidecar_is_swept_on_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalCache::new(dir.path()).unwrap();
        let r = reference();
        cache
            .store(&r, DataFormat::Grid, &Bytes::from_static(b"x"))
            .await
            .unwrap();
        tokio::fs::remove_file(dir.path().join(format!("{}.bin", r.cache_key())))
            .await
            .unwrap();
        assert!(cache.lookup(&r).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn no_temp_files_survive_a_commit() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalCache::new(dir.path()).unwrap();
        let r = reference();
        cache
            .store(&r, DataFormat::Grid, &Bytes::from_static(b"x"))
            .await
            .unwrap();
        let mut names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        let key = r.cache_key();
        assert_eq!(names, vec![format!("{}.bin", key), format!("{}.json", key)]);
    }

    #[tokio::test]
    async fn concurrent_fills_commit_one_whole_payload() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(LocalCache::new(dir.path()).unwrap());
        let r = reference();

        // Two racing fills for the same reference; the committed payload
        // must be one of the two in full, never interleaved bytes.
        let a = Bytes::from(vec![0xAAu8; 4096]);
        let b = Bytes::from(vec![0xBBu8; 4096]);
        let (ra, rb) = tokio::join!(
            {
                let cache = Arc::clone(&cache);
                let r = r.clone();
                let a = a.clone();
                async move { cache.store(&r, DataFormat::Grid, &a).await }
            },
            {
                let cache = Arc::clone(&cache);
                let r = r.clone();
                let b = b.clone();
                async move { cache.store(&r, DataFormat::Grid, &b).await }
            }
        );
        ra.unwrap();
        rb.unwrap();

        let (_, data) = cache.lookup(&r).await.unwrap().unwrap();
        assert!(data == a || data == b);
    }
}
