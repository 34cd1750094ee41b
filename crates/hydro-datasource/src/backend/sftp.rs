//! SFTP connector backed by libssh2.
//!
//! One authenticated session per configured host, established lazily
//! and re-established (with bounded backoff) when the transport drops.
//! libssh2 calls are blocking, so every operation runs under
//! `spawn_blocking`; the session lives behind a mutex because a single
//! SFTP channel is not safe for concurrent in-flight operations.

use async_trait::async_trait;
use bytes::Bytes;
use hydro_common::{DataError, DataResult};
use serde::{Deserialize, Serialize};
use ssh2::{ErrorCode, OpenFlags, OpenType, Session, Sftp};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, instrument};

use super::{BackendKind, DataBackend};
use crate::retry::{self, RetryPolicy};

/// Connection parameters for one SFTP host.
///
/// A password starting with `$` is resolved from the environment, so
/// profiles can reference secrets without embedding them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SftpConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub private_key: Option<PathBuf>,
}

fn default_port() -> u16 {
    22
}

struct SftpConn {
    // Held to keep the transport alive for the lifetime of `sftp`.
    _session: Session,
    sftp: Sftp,
}

impl SftpConn {
    fn connect(config: &SftpConfig) -> DataResult<Self> {
        let endpoint = format!("{}:{}", config.host, config.port);
        let tcp = TcpStream::connect(&endpoint)
            .map_err(|e| DataError::transport(&endpoint, e.to_string()))?;

        let mut session =
            Session::new().map_err(|e| DataError::transport(&endpoint, e.to_string()))?;
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(|e| DataError::transport(&endpoint, e.to_string()))?;

        // Auth failures are fatal, not transient: retrying bad
        // credentials only locks accounts.
        match (&config.password, &config.private_key) {
            (Some(password), _) => {
                let resolved = resolve_secret(password)?;
                session
                    .userauth_password(&config.username, &resolved)
                    .map_err(|e| DataError::permission(&endpoint, e.to_string()))?;
            }
            (None, Some(key)) => {
                session
                    .userauth_pubkey_file(&config.username, None, key, None)
                    .map_err(|e| DataError::permission(&endpoint, e.to_string()))?;
            }
            (None, None) => {
                let mut authed = false;
                for name in ["id_ed25519", "id_rsa"] {
                    let Some(home) = std::env::var_os("HOME") else {
                        break;
                    };
                    let key = PathBuf::from(home).join(".ssh").join(name);
                    if key.exists()
                        && session
                            .userauth_pubkey_file(&config.username, None, &key, None)
                            .is_ok()
                    {
                        authed = true;
                        break;
                    }
                }
                if !authed {
                    return Err(DataError::permission(
                        &endpoint,
                        "no usable credentials (password, key, or default key)",
                    ));
                }
            }
        }

        let sftp = session
            .sftp()
            .map_err(|e| DataError::transport(&endpoint, e.to_string()))?;
        debug!(host = %config.host, "SFTP session established");
        Ok(Self {
            _session: session,
            sftp,
        })
    }
}

fn resolve_secret(value: &str) -> DataResult<String> {
    match value.strip_prefix('$') {
        Some(var) => std::env::var(var)
            .map_err(|_| DataError::Internal(format!("environment variable '{}' not set", var))),
        None => Ok(value.to_string()),
    }
}

// libssh2 SFTP status codes (RFC draft section 7)
const FX_NO_SUCH_FILE: i32 = 2;
const FX_PERMISSION_DENIED: i32 = 3;
const FX_NO_SUCH_PATH: i32 = 10;

fn map_ssh(address: &str, err: ssh2::Error) -> DataError {
    match err.code() {
        ErrorCode::SFTP(FX_NO_SUCH_FILE) | ErrorCode::SFTP(FX_NO_SUCH_PATH) => {
            DataError::not_found(address)
        }
        ErrorCode::SFTP(FX_PERMISSION_DENIED) => DataError::permission(address, err.to_string()),
        _ => DataError::transport(address, err.to_string()),
    }
}

fn is_absent(err: &ssh2::Error) -> bool {
    matches!(
        err.code(),
        ErrorCode::SFTP(FX_NO_SUCH_FILE) | ErrorCode::SFTP(FX_NO_SUCH_PATH)
    )
}

/// Connector for a single SFTP host.
pub struct SftpBackend {
    config: SftpConfig,
    retry: RetryPolicy,
    conn: Arc<Mutex<Option<SftpConn>>>,
}

impl SftpBackend {
    /// Create a connector. No connection is made until the first operation.
    pub fn new(config: SftpConfig) -> Self {
        Self {
            config,
            retry: RetryPolicy::default(),
            conn: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Tear down the session. The next operation reconnects.
    pub fn disconnect(&self) {
        if let Ok(mut guard) = self.conn.lock() {
            *guard = None;
        }
    }

    /// Run a blocking SFTP closure with lazy connect, reconnect-on-drop
    /// and the bounded retry policy.
    async fn with_sftp<T, F>(&self, op_name: &str, address: &str, f: F) -> DataResult<T>
    where
        T: Send + 'static,
        F: Fn(&Sftp) -> DataResult<T> + Clone + Send + 'static,
    {
        retry::with_retry(&self.retry, op_name, address, || {
            let conn = Arc::clone(&self.conn);
            let config = self.config.clone();
            let f = f.clone();
            async move {
                tokio::task::spawn_blocking(move || {
                    let mut guard = conn
                        .lock()
                        .map_err(|_| DataError::Internal("SFTP session lock poisoned".into()))?;
                    if guard.is_none() {
                        *guard = Some(SftpConn::connect(&config)?);
                    }
                    let result = match guard.as_ref() {
                        Some(c) => f(&c.sftp),
                        None => Err(DataError::Internal("SFTP session unavailable".into())),
                    };
                    // Drop the session on transport failure so the next
                    // attempt reconnects instead of reusing a dead channel.
                    if matches!(&result, Err(e) if e.is_transient()) {
                        *guard = None;
                    }
                    result
                })
                .await
                .map_err(|e| DataError::Internal(e.to_string()))?
            }
        })
        .await
    }
}

fn ensure_remote_dirs(sftp: &Sftp, address: &str) -> DataResult<()> {
    let path = Path::new(address);
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    let mut current = PathBuf::new();
    for component in parent.components() {
        current.push(component);
        if sftp.stat(&current).is_ok() {
            continue;
        }
        if let Err(err) = sftp.mkdir(&current, 0o755) {
            // A concurrent writer may have created it in between.
            if sftp.stat(&current).is_err() {
                return Err(map_ssh(&current.to_string_lossy(), err));
            }
        }
    }
    Ok(())
}

fn walk_remote(sftp: &Sftp, root: &Path, out: &mut Vec<String>) -> DataResult<()> {
    let entries = match sftp.readdir(root) {
        Ok(entries) => entries,
        Err(err) if is_absent(&err) => return Ok(()),
        Err(err) => return Err(map_ssh(&root.to_string_lossy(), err)),
    };
    for (path, stat) in entries {
        if stat.is_dir() {
            walk_remote(sftp, &path, out)?;
        } else {
            out.push(path.to_string_lossy().replace('\\', "/"));
        }
    }
    Ok(())
}

#[async_trait]
impl DataBackend for SftpBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Sftp
    }

    #[instrument(skip(self), fields(host = %self.config.host, address = %address))]
    async fn fetch(&self, address: &str) -> DataResult<Bytes> {
        let addr = address.to_string();
        self.with_sftp("fetch", address, move |sftp| {
            let mut file = sftp
                .open(Path::new(&addr))
                .map_err(|e| map_ssh(&addr, e))?;
            let mut data = Vec::new();
            file.read_to_end(&mut data)
                .map_err(|e| DataError::transport(&addr, e.to_string()))?;
            Ok(Bytes::from(data))
        })
        .await
    }

    #[instrument(skip(self, data), fields(host = %self.config.host, address = %address, size = data.len()))]
    async fn store(&self, address: &str, data: Bytes, overwrite: bool) -> DataResult<()> {
        let addr = address.to_string();
        self.with_sftp("store", address, move |sftp| {
            ensure_remote_dirs(sftp, &addr)?;
            if !overwrite && sftp.stat(Path::new(&addr)).is_ok() {
                return Err(DataError::AlreadyExists {
                    address: addr.clone(),
                });
            }
            let mut file = sftp
                .open_mode(
                    Path::new(&addr),
                    OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE,
                    0o644,
                    OpenType::File,
                )
                .map_err(|e| map_ssh(&addr, e))?;
            file.write_all(&data)
                .map_err(|e| DataError::transport(&addr, e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn list(&self, prefix: &str) -> DataResult<Vec<String>> {
        let root = prefix.to_string();
        self.with_sftp("list", prefix, move |sftp| {
            let mut out = Vec::new();
            walk_remote(sftp, Path::new(&root), &mut out)?;
            out.sort();
            Ok(out)
        })
        .await
    }

    async fn exists(&self, address: &str) -> DataResult<bool> {
        let addr = address.to_string();
        self.with_sftp("exists", address, move |sftp| {
            match sftp.stat(Path::new(&addr)) {
                Ok(_) => Ok(true),
                Err(err) if is_absent(&err) => Ok(false),
                Err(err) => Err(map_ssh(&addr, err)),
            }
        })
        .await
    }

    #[instrument(skip(self), fields(host = %self.config.host, address = %address))]
    async fn delete(&self, address: &str) -> DataResult<()> {
        let addr = address.to_string();
        self.with_sftp("delete", address, move |sftp| {
            sftp.unlink(Path::new(&addr)).map_err(|e| map_ssh(&addr, e))
        })
        .await
    }
}
