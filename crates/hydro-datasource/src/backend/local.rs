//! Local filesystem connector.

use async_trait::async_trait;
use bytes::Bytes;
use hydro_common::{DataError, DataResult};
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

use super::{BackendKind, DataBackend};

/// Connector treating addresses as filesystem paths.
///
/// With a root configured, relative addresses are resolved against it
/// and listings report root-relative addresses; without one, addresses
/// are used verbatim.
pub struct LocalBackend {
    root: Option<PathBuf>,
}

impl LocalBackend {
    pub fn new() -> Self {
        Self { root: None }
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn full_path(&self, address: &str) -> PathBuf {
        match &self.root {
            Some(root) => root.join(address),
            None => PathBuf::from(address),
        }
    }

}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn map_io(address: &str, err: std::io::Error) -> DataError {
    match err.kind() {
        ErrorKind::NotFound => DataError::not_found(address),
        ErrorKind::PermissionDenied => DataError::permission(address, err.to_string()),
        ErrorKind::AlreadyExists => DataError::AlreadyExists {
            address: address.to_string(),
        },
        _ => DataError::transport(address, err.to_string()),
    }
}

#[async_trait]
impl DataBackend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    #[instrument(skip(self), fields(address = %address))]
    async fn fetch(&self, address: &str) -> DataResult<Bytes> {
        let path = self.full_path(address);
        let data = tokio::fs::read(&path)
            .await
            .map_err(|e| map_io(address, e))?;
        debug!(size = data.len(), "Read local file");
        Ok(Bytes::from(data))
    }

    #[instrument(skip(self, data), fields(address = %address, size = data.len()))]
    async fn store(&self, address: &str, data: Bytes, overwrite: bool) -> DataResult<()> {
        let path = self.full_path(address);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| map_io(address, e))?;
        }

        // create_new avoids a check-then-write race for overwrite=false.
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true);
        if overwrite {
            options.create(true).truncate(true);
        } else {
            options.create_new(true);
        }
        let mut file = options.open(&path).await.map_err(|e| map_io(address, e))?;
        file.write_all(&data).await.map_err(|e| map_io(address, e))?;
        file.flush().await.map_err(|e| map_io(address, e))?;
        debug!("Wrote local file");
        Ok(())
    }

    async fn list(&self, prefix: &str) -> DataResult<Vec<String>> {
        let path = self.full_path(prefix);
        if !path.is_dir() {
            return Ok(Vec::new());
        }

        let root = self.root.clone();
        let addresses = tokio::task::spawn_blocking(move || {
            let mut out = Vec::new();
            for entry in walkdir::WalkDir::new(&path).sort_by_file_name() {
                let entry = match entry {
                    Ok(e) => e,
                    Err(err) => return Err(err.to_string()),
                };
                if entry.file_type().is_file() {
                    let p = entry.path();
                    let relative = match &root {
                        Some(r) => p.strip_prefix(r).unwrap_or(p),
                        None => p,
                    };
                    out.push(relative.to_string_lossy().replace('\\', "/"));
                }
            }
            Ok(out)
        })
        .await
        .map_err(|e| DataError::Internal(e.to_string()))?
        .map_err(|msg| DataError::transport(prefix, msg))?;

        Ok(addresses)
    }

    async fn exists(&self, address: &str) -> DataResult<bool> {
        match tokio::fs::metadata(self.full_path(address)).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(map_io(address, e)),
        }
    }

    #[instrument(skip(self), fields(address = %address))]
    async fn delete(&self, address: &str) -> DataResult<()> {
        tokio::fs::remove_file(self.full_path(address))
            .await
            .map_err(|e| map_io(address, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::with_root(dir.path());
        backend
            .store("a/b/c.bin", Bytes::from_static(b"payload"), false)
            .await
            .unwrap();
        assert_eq!(
            backend.fetch("a/b/c.bin").await.unwrap(),
            Bytes::from_static(b"payload")
        );
    }

    #[tokio::test]
    async fn store_without_overwrite_fails_on_existing() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::with_root(dir.path());
        backend
            .store("x.bin", Bytes::from_static(b"one"), false)
            .await
            .unwrap();
        let err = backend
            .store("x.bin", Bytes::from_static(b"two"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, DataError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn fetch_missing_maps_to_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::with_root(dir.path());
        assert!(backend.fetch("missing.bin").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn exists_does_not_fail_for_absence() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::with_root(dir.path());
        assert!(!backend.exists("nope").await.unwrap());
    }

    #[tokio::test]
    async fn list_walks_recursively_and_reports_relative_addresses() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::with_root(dir.path());
        for addr in ["data/2023/01.bin", "data/2023/02.bin", "meta/info.json"] {
            backend.store(addr, Bytes::new(), false).await.unwrap();
        }
        let listed = backend.list("data").await.unwrap();
        assert_eq!(listed, vec!["data/2023/01.bin", "data/2023/02.bin"]);

        // Missing prefix lists empty, not an error.
        assert!(backend.list("absent").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_removes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::with_root(dir.path());
        backend.store("x.bin", Bytes::new(), false).await.unwrap();
        backend.delete("x.bin").await.unwrap();
        assert!(!backend.exists("x.bin").await.unwrap());
    }
}
