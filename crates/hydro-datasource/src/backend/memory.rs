//! In-process backend holding payloads in a map.
//!
//! Used for scratch datasets that never touch disk, and as the
//! injectable fake connector in tests.

use async_trait::async_trait;
use bytes::Bytes;
use hydro_common::{DataError, DataResult};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{BackendKind, DataBackend};

pub struct MemoryBackend {
    objects: Arc<RwLock<BTreeMap<String, Bytes>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            objects: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// Seed an address directly, bypassing the overwrite policy.
    pub async fn insert(&self, address: impl Into<String>, data: Bytes) {
        self.objects.write().await.insert(address.into(), data);
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataBackend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    async fn fetch(&self, address: &str) -> DataResult<Bytes> {
        self.objects
            .read()
            .await
            .get(address)
            .cloned()
            .ok_or_else(|| DataError::not_found(address))
    }

    async fn store(&self, address: &str, data: Bytes, overwrite: bool) -> DataResult<()> {
        let mut objects = self.objects.write().await;
        if !overwrite && objects.contains_key(address) {
            return Err(DataError::AlreadyExists {
                address: address.to_string(),
            });
        }
        objects.insert(address.to_string(), data);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> DataResult<Vec<String>> {
        Ok(self
            .objects
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn exists(&self, address: &str) -> DataResult<bool> {
        Ok(self.objects.read().await.contains_key(address))
    }

    async fn delete(&self, address: &str) -> DataResult<()> {
        match self.objects.write().await.remove(address) {
            Some(_) => Ok(()),
            None => Err(DataError::not_found(address)),
        }
    }
}
