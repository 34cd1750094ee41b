//! Backend connectors: one capability contract, several transports.

use async_trait::async_trait;
use bytes::Bytes;
use hydro_common::{DataError, DataResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub mod local;
pub mod memory;
pub mod object;
pub mod sftp;

pub use local::LocalBackend;
pub use memory::MemoryBackend;
pub use object::{ObjectBackend, ObjectBackendConfig};
pub use sftp::{SftpBackend, SftpConfig};

/// Tag selecting a connector variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Local,
    Sftp,
    ObjectStore,
    Memory,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BackendKind::Local => "local",
            BackendKind::Sftp => "sftp",
            BackendKind::ObjectStore => "object_store",
            BackendKind::Memory => "memory",
        };
        write!(f, "{}", s)
    }
}

/// Common capability contract across all connector variants.
///
/// Error mapping is part of the contract: `fetch` distinguishes
/// `NotFound` from transport and permission failures precisely, because
/// accessors fall through candidates only on `NotFound`. `exists` never
/// fails for a simple absence, only for transport trouble.
///
/// Operations block for the duration of network I/O; latency-sensitive
/// callers run them on worker tasks. Cancellation is dropping the
/// future.
#[async_trait]
pub trait DataBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Read the full payload at an address.
    async fn fetch(&self, address: &str) -> DataResult<Bytes>;

    /// Write a payload, creating intermediate directories/prefixes.
    ///
    /// Fails with `AlreadyExists` when `overwrite` is false and the
    /// address holds data.
    async fn store(&self, address: &str, data: Bytes, overwrite: bool) -> DataResult<()>;

    /// All addresses under a prefix. Finite; ordering is backend-defined.
    async fn list(&self, prefix: &str) -> DataResult<Vec<String>>;

    /// Whether an address holds data.
    async fn exists(&self, address: &str) -> DataResult<bool>;

    /// Remove the payload at an address.
    async fn delete(&self, address: &str) -> DataResult<()>;
}

/// Dispatch table from backend kind to connector.
///
/// Explicitly owned and passed into accessors/coordinators (never
/// ambient state), so tests can inject fake connectors. A single
/// connector instance must not serve concurrent writes to the same
/// address without external serialization.
pub struct BackendPool {
    connectors: HashMap<BackendKind, Arc<dyn DataBackend>>,
}

impl BackendPool {
    pub fn new() -> Self {
        Self {
            connectors: HashMap::new(),
        }
    }

    /// Register a connector under its own kind, replacing any previous one.
    pub fn register(&mut self, connector: Arc<dyn DataBackend>) -> &mut Self {
        self.connectors.insert(connector.kind(), connector);
        self
    }

    pub fn connector(&self, kind: BackendKind) -> DataResult<Arc<dyn DataBackend>> {
        self.connectors.get(&kind).cloned().ok_or_else(|| {
            DataError::Internal(format!("no connector registered for backend '{}'", kind))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }
}

impl Default for BackendPool {
    fn default() -> Self {
        Self::new()
    }
}
