//! End-to-end tests for the get/put/exists/invalidate surface.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;

use hydro_common::{DataError, DataResult, GeoArray, GeoTransform};
use hydro_datasource::backend::MemoryBackend;
use hydro_datasource::{
    BackendKind, BackendPool, CodecRegistry, DataBackend, DataFormat, DataReference, DataStore,
    DatasetAccessor, GridCodec, LocalCache, PathTemplate, RasterCodec, TieBreak,
    WriteBackCoordinator,
};

fn ymd(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
}

fn sample_array(marker: f32) -> GeoArray {
    let mut array = GeoArray::filled(4, 3, marker)
        .with_transform(GeoTransform::new(7.0, 46.0, 0.25, -0.25))
        .with_crs("EPSG:4326")
        .with_nodata(-9999.0);
    array.values[0] = marker + 0.5;
    array
}

fn encoded(marker: f32) -> Bytes {
    GridCodec.encode(&sample_array(marker)).unwrap()
}

fn memory_template(pattern: &str) -> PathTemplate {
    PathTemplate::new(pattern, BackendKind::Memory, DataFormat::Grid).unwrap()
}

fn store_with(backend: Arc<MemoryBackend>) -> DataStore {
    let mut pool = BackendPool::new();
    pool.register(backend);
    DataStore::new(pool, CodecRegistry::new())
}

/// Wraps a backend and injects a transport failure for chosen addresses.
struct FlakyBackend {
    inner: MemoryBackend,
    broken: Vec<String>,
}

#[async_trait]
impl DataBackend for FlakyBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    async fn fetch(&self, address: &str) -> DataResult<Bytes> {
        if self.broken.iter().any(|b| b.as_str() == address) {
            return Err(DataError::transport(address, "connection reset"));
        }
        self.inner.fetch(address).await
    }

    async fn store(&self, address: &str, data: Bytes, overwrite: bool) -> DataResult<()> {
        self.inner.store(address, data, overwrite).await
    }

    async fn list(&self, prefix: &str) -> DataResult<Vec<String>> {
        self.inner.list(prefix).await
    }

    async fn exists(&self, address: &str) -> DataResult<bool> {
        self.inner.exists(address).await
    }

    async fn delete(&self, address: &str) -> DataResult<()> {
        self.inner.delete(address).await
    }
}

// ============================================================================
// Round trip and existence
// ============================================================================

#[tokio::test]
async fn put_then_get_round_trips_values_and_metadata() {
    let store = store_with(Arc::new(MemoryBackend::new()));
    let template = memory_template("out/{var}/{yyyy}/{mm}/{dd}.bin");
    let reference = DataReference::new("sspi").at(ymd(2023, 5, 10));
    let array = sample_array(3.0);

    store.put(&reference, &template, &array, false).await.unwrap();
    let back = store.get(&reference, &template, None).await.unwrap();
    assert_eq!(back, array);
    assert!(store.exists(&reference, &template).await.unwrap());
}

#[tokio::test]
async fn get_missing_reports_not_found_with_attempted_addresses() {
    let store = store_with(Arc::new(MemoryBackend::new()));
    let template = memory_template("out/{var}/{yyyy}/{mm}/{dd}.bin");
    let reference = DataReference::new("sspi").at(ymd(2023, 5, 10));

    let err = store.get(&reference, &template, None).await.unwrap_err();
    match err {
        DataError::NotFound { address } => {
            assert!(address.contains("out/sspi/2023/05/10.bin"), "{}", address);
        }
        other => panic!("expected NotFound, got {other}"),
    }
    assert!(!store.exists(&reference, &template).await.unwrap());
}

#[tokio::test]
async fn put_without_overwrite_propagates_already_exists() {
    let store = store_with(Arc::new(MemoryBackend::new()));
    let template = memory_template("out/{var}.bin");
    let reference = DataReference::new("sspi");
    let array = sample_array(1.0);

    store.put(&reference, &template, &array, false).await.unwrap();
    let err = store
        .put(&reference, &template, &array, false)
        .await
        .unwrap_err();
    assert!(matches!(err, DataError::AlreadyExists { .. }));

    store.put(&reference, &template, &array, true).await.unwrap();
}

#[tokio::test]
async fn put_rejects_arrays_without_georeferencing() {
    let store = store_with(Arc::new(MemoryBackend::new()));
    let template = memory_template("out/{var}.bin");
    let reference = DataReference::new("sspi");
    let bare = GeoArray::filled(2, 2, 1.0);

    let err = store.put(&reference, &template, &bare, true).await.unwrap_err();
    assert!(matches!(err, DataError::Format(_)));
}

// ============================================================================
// Tolerance-window fallback
// ============================================================================

#[tokio::test]
async fn tolerance_get_falls_back_to_nearest_older_file() {
    let backend = Arc::new(MemoryBackend::new());
    backend
        .insert("data/precip/2023/05/09.bin", encoded(9.0))
        .await;
    let store = store_with(Arc::clone(&backend));
    let template = memory_template("data/{var}/{yyyy}/{mm}/{dd}.bin");
    let reference = DataReference::new("precip").at(ymd(2023, 5, 10));

    // Exact 05-10 is absent; 05-09 is within the 2-day window.
    let array = store
        .get(&reference, &template, Some(Duration::days(2)))
        .await
        .unwrap();
    assert_eq!(array.value_at(0, 0), Some(9.5));

    // Outside the window it is a plain miss.
    let reference_far = DataReference::new("precip").at(ymd(2023, 5, 20));
    let err = store
        .get(&reference_far, &template, Some(Duration::days(2)))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn tolerance_prefers_older_on_equal_distance_by_default() {
    let backend = Arc::new(MemoryBackend::new());
    backend
        .insert("data/precip/2023/05/09.bin", encoded(9.0))
        .await;
    backend
        .insert("data/precip/2023/05/11.bin", encoded(11.0))
        .await;
    let store = store_with(backend);
    let template = memory_template("data/{var}/{yyyy}/{mm}/{dd}.bin");
    let reference = DataReference::new("precip").at(ymd(2023, 5, 10));

    let array = store
        .get(&reference, &template, Some(Duration::days(2)))
        .await
        .unwrap();
    assert_eq!(array.value_at(0, 0), Some(9.5));
}

#[tokio::test]
async fn transport_error_on_nearer_candidate_is_never_masked() {
    let inner = MemoryBackend::new();
    inner
        .insert("data/precip/2023/05/09.bin", encoded(9.0))
        .await;
    let flaky = FlakyBackend {
        inner,
        broken: vec!["data/precip/2023/05/10.bin".to_string()],
    };
    let mut pool = BackendPool::new();
    pool.register(Arc::new(flaky));
    let store = DataStore::new(pool, CodecRegistry::new());

    let template = memory_template("data/{var}/{yyyy}/{mm}/{dd}.bin");
    let reference = DataReference::new("precip").at(ymd(2023, 5, 10));

    // 05-09 holds data, but the failure on the nearer 05-10 must surface.
    let err = store
        .get(&reference, &template, Some(Duration::days(2)))
        .await
        .unwrap_err();
    assert!(err.is_transient(), "expected transport error, got {err}");
}

#[tokio::test]
async fn corrupt_authoritative_file_is_not_masked_by_fallback() {
    let backend = Arc::new(MemoryBackend::new());
    backend
        .insert(
            "data/precip/2023/05/10.bin",
            Bytes::from_static(b"not a grid"),
        )
        .await;
    backend
        .insert("data/precip/2023/05/09.bin", encoded(9.0))
        .await;
    let store = store_with(backend);
    let template = memory_template("data/{var}/{yyyy}/{mm}/{dd}.bin");
    let reference = DataReference::new("precip").at(ymd(2023, 5, 10));

    let err = store
        .get(&reference, &template, Some(Duration::days(2)))
        .await
        .unwrap_err();
    assert!(matches!(err, DataError::Format(_)), "got {err}");
}

// ============================================================================
// Cache behavior
// ============================================================================

#[tokio::test]
async fn cache_serves_repeat_reads_without_backend() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(MemoryBackend::new());
    backend.insert("data/spi/2023/05/10.bin", encoded(5.0)).await;

    let mut pool = BackendPool::new();
    pool.register(Arc::clone(&backend) as Arc<dyn DataBackend>);
    let cache = Arc::new(LocalCache::new(dir.path()).unwrap());
    let accessor = DatasetAccessor::new(Arc::new(pool), Arc::new(CodecRegistry::new()))
        .with_cache(cache);

    let template = memory_template("data/{var}/{yyyy}/{mm}/{dd}.bin");
    let reference = DataReference::new("spi").at(ymd(2023, 5, 10));

    let first = accessor.get(&reference, &template, None).await.unwrap();
    // Remove from the backend; the mirror must still serve it.
    backend.delete("data/spi/2023/05/10.bin").await.unwrap();
    let second = accessor.get(&reference, &template, None).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn write_back_invalidates_cached_reads() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(MemoryBackend::new());
    let mut pool = BackendPool::new();
    pool.register(Arc::clone(&backend) as Arc<dyn DataBackend>);
    let pool = Arc::new(pool);
    let codecs = Arc::new(CodecRegistry::new());
    let cache = Arc::new(LocalCache::new(dir.path()).unwrap());
    let accessor = DatasetAccessor::new(Arc::clone(&pool), Arc::clone(&codecs))
        .with_cache(Arc::clone(&cache));
    let writer = WriteBackCoordinator::new(pool, codecs).with_cache(cache);

    let template = memory_template("out/{var}/{yyyy}/{mm}/{dd}.bin");
    let reference = DataReference::new("spi").at(ymd(2023, 5, 10));

    writer
        .put(&reference, &template, &sample_array(1.0), true)
        .await
        .unwrap();
    let before = accessor.get(&reference, &template, None).await.unwrap();
    assert_eq!(before.value_at(0, 0), Some(1.5));

    // Rewrite through the coordinator; the cached copy must not survive.
    writer
        .put(&reference, &template, &sample_array(2.0), true)
        .await
        .unwrap();
    let after = accessor.get(&reference, &template, None).await.unwrap();
    assert_eq!(after.value_at(0, 0), Some(2.5));
}

#[tokio::test]
async fn explicit_invalidate_forces_a_refetch() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(MemoryBackend::new());
    backend.insert("data/spi/2023/05/10.bin", encoded(1.0)).await;

    let mut pool = BackendPool::new();
    pool.register(Arc::clone(&backend) as Arc<dyn DataBackend>);
    let cache = Arc::new(LocalCache::new(dir.path()).unwrap());
    let accessor = DatasetAccessor::new(Arc::new(pool), Arc::new(CodecRegistry::new()))
        .with_cache(cache);

    let template = memory_template("data/{var}/{yyyy}/{mm}/{dd}.bin");
    let reference = DataReference::new("spi").at(ymd(2023, 5, 10));

    accessor.get(&reference, &template, None).await.unwrap();
    // Rewrite behind the cache's back, then invalidate explicitly.
    backend.insert("data/spi/2023/05/10.bin", encoded(7.0)).await;
    let stale = accessor.get(&reference, &template, None).await.unwrap();
    assert_eq!(stale.value_at(0, 0), Some(1.5));

    accessor.invalidate(&reference).await.unwrap();
    let fresh = accessor.get(&reference, &template, None).await.unwrap();
    assert_eq!(fresh.value_at(0, 0), Some(7.5));
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test]
async fn ten_tiles_fetched_concurrently_stay_distinct() {
    let backend = Arc::new(MemoryBackend::new());
    for i in 0..10 {
        backend
            .insert(
                format!("tiles/t{:02}/2023/05/10.bin", i),
                encoded(i as f32 * 10.0),
            )
            .await;
    }
    let store = Arc::new(store_with(backend));
    let template = Arc::new(memory_template("tiles/{tile}/{yyyy}/{mm}/{dd}.bin"));

    let mut handles = Vec::new();
    for i in 0..10 {
        let store = Arc::clone(&store);
        let template = Arc::clone(&template);
        handles.push(tokio::spawn(async move {
            let reference = DataReference::new("precip")
                .at(ymd(2023, 5, 10))
                .tile(format!("t{:02}", i));
            let array = store.get(&reference, &template, None).await.unwrap();
            (i, array)
        }));
    }
    for handle in handles {
        let (i, array) = handle.await.unwrap();
        assert_eq!(array.value_at(0, 0), Some(i as f32 * 10.0 + 0.5));
        assert_eq!(array.value_at(1, 0), Some(i as f32 * 10.0));
    }
}

// ============================================================================
// Discovery
// ============================================================================

#[tokio::test]
async fn available_times_scans_and_reverse_matches() {
    let backend = Arc::new(MemoryBackend::new());
    for day in [3, 4, 7] {
        backend
            .insert(
                format!("data/precip/2023/05/{:02}.bin", day),
                encoded(day as f32),
            )
            .await;
    }
    backend.insert("data/precip/notes.txt", Bytes::new()).await;
    let store = store_with(backend);
    let template = memory_template("data/{var}/{yyyy}/{mm}/{dd}.bin");

    let times = store
        .accessor()
        .available_times(&template, ymd(2023, 5, 1), ymd(2023, 5, 5))
        .await
        .unwrap();
    assert_eq!(times, vec![ymd(2023, 5, 3), ymd(2023, 5, 4)]);
}

#[tokio::test]
async fn available_tiles_filters_by_timestamp() {
    let backend = Arc::new(MemoryBackend::new());
    for tile in ["adda", "oglio"] {
        backend
            .insert(format!("tiles/{}/2023/05/10.bin", tile), encoded(1.0))
            .await;
    }
    backend
        .insert("tiles/ticino/2023/05/11.bin", encoded(1.0))
        .await;
    let store = store_with(backend);
    let template = memory_template("tiles/{tile}/{yyyy}/{mm}/{dd}.bin");

    let reference = DataReference::new("precip").at(ymd(2023, 5, 10));
    let tiles = store
        .accessor()
        .available_tiles(&template, &reference)
        .await
        .unwrap();
    assert_eq!(tiles, vec!["adda", "oglio"]);
}

// ============================================================================
// Tie-break configuration
// ============================================================================

#[tokio::test]
async fn prefer_newer_tie_break_picks_the_newer_candidate() {
    let backend = Arc::new(MemoryBackend::new());
    backend
        .insert("data/precip/2023/05/09.bin", encoded(9.0))
        .await;
    backend
        .insert("data/precip/2023/05/11.bin", encoded(11.0))
        .await;

    let mut pool = BackendPool::new();
    pool.register(Arc::clone(&backend) as Arc<dyn DataBackend>);
    let accessor = DatasetAccessor::new(Arc::new(pool), Arc::new(CodecRegistry::new()))
        .with_tie_break(TieBreak::PreferNewer);

    let template = memory_template("data/{var}/{yyyy}/{mm}/{dd}.bin");
    let reference = DataReference::new("precip").at(ymd(2023, 5, 10));
    let array = accessor
        .get(&reference, &template, Some(Duration::days(2)))
        .await
        .unwrap();
    assert_eq!(array.value_at(0, 0), Some(11.5));
}
