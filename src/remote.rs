//! Remote store capability interface.
//!
//! The pipeline only talks to the capture archive through [`RemoteStore`].
//! Concrete transports (SFTP, a mounted share, ...) implement it and are
//! produced by a [`RemoteConnector`], so the pipeline can drop a connection
//! before a long classification phase and open a fresh one afterwards.
//!
//! ```text
//! RemoteConnector::connect() ──▶ Box<dyn RemoteStore>
//!                                   list / stat / get / put / rename / mkdir / close
//! ```
//!
//! Remote paths are `/`-separated and relative to the adapter's root.

use std::path::Path;
use std::time::SystemTime;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::RemoteConfig;
use crate::error::RemoteError;
use crate::remote_fs::FsConnector;

/// Metadata returned by [`RemoteStore::stat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteStat {
    /// Modification time at the adapter's full precision.
    pub modified: SystemTime,
    pub is_dir: bool,
}

/// An open connection to the remote file tree.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Names of the entries directly under `path`, in the adapter's listing order.
    async fn list(&self, path: &str) -> Result<Vec<String>, RemoteError>;

    async fn stat(&self, path: &str) -> Result<RemoteStat, RemoteError>;

    /// Download `remote_path` to `local_path`, replacing any existing local file.
    async fn get(&self, remote_path: &str, local_path: &Path) -> Result<(), RemoteError>;

    /// Upload `local_path` to `remote_path` with overwrite semantics.
    async fn put(&self, local_path: &Path, remote_path: &str) -> Result<(), RemoteError>;

    /// Rename within the remote tree. An existing target is replaced.
    async fn rename(&self, old_path: &str, new_path: &str) -> Result<(), RemoteError>;

    /// Create a directory. Fails with [`RemoteError::AlreadyExists`] if present.
    async fn mkdir(&self, path: &str) -> Result<(), RemoteError>;

    /// Release the connection. Further calls fail with [`RemoteError::Connection`].
    async fn close(&mut self) -> Result<(), RemoteError>;
}

/// Factory for fresh [`RemoteStore`] connections.
#[async_trait]
pub trait RemoteConnector: Send + Sync {
    /// Human-readable target, used in logs.
    fn describe(&self) -> String;

    async fn connect(&self) -> Result<Box<dyn RemoteStore>, RemoteError>;
}

/// Build the connector for the configured `remote.kind`.
pub fn create_connector(config: &RemoteConfig) -> Result<Box<dyn RemoteConnector>> {
    match config.kind.as_str() {
        "filesystem" => Ok(Box::new(FsConnector::new(&config.root))),
        other => bail!("Unknown remote kind: {}", other),
    }
}

/// A lazily (re)connected remote store with an explicit lifetime.
pub struct RemoteSession<'a> {
    connector: &'a dyn RemoteConnector,
    store: Option<Box<dyn RemoteStore>>,
}

impl<'a> RemoteSession<'a> {
    pub fn new(connector: &'a dyn RemoteConnector) -> Self {
        Self {
            connector,
            store: None,
        }
    }

    /// The live connection, connecting first if needed.
    pub async fn store(&mut self) -> Result<&dyn RemoteStore, RemoteError> {
        if self.store.is_none() {
            debug!(target = %self.connector.describe(), "connecting to remote store");
            let store = self.connector.connect().await?;
            self.store = Some(store);
        }
        self.store
            .as_deref()
            .ok_or_else(|| RemoteError::Connection("remote session not connected".to_string()))
    }

    /// Close the current connection, if any. Close failures are logged only:
    /// the next [`store`](Self::store) call opens a new connection regardless.
    pub async fn close(&mut self) {
        if let Some(mut store) = self.store.take() {
            debug!(target = %self.connector.describe(), "closing remote store connection");
            if let Err(e) = store.close().await {
                warn!(error = %e, "error while closing remote store connection");
            }
        }
    }
}
