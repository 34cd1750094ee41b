//! Backend profiles and store configuration.
//!
//! Credential *loading* is an external concern; these structs are the
//! interface through which a configuration collaborator hands
//! connection parameters to the data layer.

use hydro_common::{DataError, DataResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use crate::backend::{
    DataBackend, LocalBackend, MemoryBackend, ObjectBackend, ObjectBackendConfig, SftpBackend,
    SftpConfig,
};
use crate::template::TieBreak;

/// Connection parameters for one named backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendProfile {
    /// Local filesystem, optionally rooted at a directory
    Local {
        #[serde(default)]
        root: Option<PathBuf>,
    },
    /// One SFTP host
    Sftp(SftpConfig),
    /// One bucket on an S3-compatible store
    ObjectStore(ObjectBackendConfig),
    /// In-process scratch space
    Memory,
}

impl BackendProfile {
    /// Build the connector for this profile.
    ///
    /// Remote connectors establish their sessions lazily, on first use.
    pub fn connect(&self) -> DataResult<Arc<dyn DataBackend>> {
        Ok(match self {
            BackendProfile::Local { root: Some(root) } => {
                Arc::new(LocalBackend::with_root(root.clone()))
            }
            BackendProfile::Local { root: None } => Arc::new(LocalBackend::new()),
            BackendProfile::Sftp(config) => Arc::new(SftpBackend::new(config.clone())),
            BackendProfile::ObjectStore(config) => Arc::new(ObjectBackend::new(config)?),
            BackendProfile::Memory => Arc::new(MemoryBackend::new()),
        })
    }
}

/// Top-level configuration for a [`crate::DataStore`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Backends to register, at most one per kind
    pub backends: Vec<BackendProfile>,
    /// On-disk mirror directory; None disables the cache
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    /// Decoded arrays kept in memory; None disables the LRU
    #[serde(default)]
    pub decoded_cache_entries: Option<usize>,
    /// Tie-break for equal-distance tolerance candidates
    #[serde(default)]
    pub tie_break: TieBreak,
}

impl StoreConfig {
    pub fn from_yaml(raw: &str) -> DataResult<Self> {
        serde_yaml::from_str(raw)
            .map_err(|e| DataError::Internal(format!("invalid store config: {}", e)))
    }
}
