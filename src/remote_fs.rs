//! Filesystem-backed remote store.
//!
//! Serves a remote tree that is reachable as a local directory (a mounted
//! network share, a synced folder, or a scratch directory in tests).
//!
//! # Configuration
//!
//! ```toml
//! [remote]
//! kind = "filesystem"
//! root = "/mnt/adrive"
//! ```
//!
//! Listings are returned sorted by name so that runs are reproducible.

use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::UNIX_EPOCH;

use async_trait::async_trait;

use crate::error::RemoteError;
use crate::remote::{RemoteConnector, RemoteStat, RemoteStore};

/// Produces [`FsRemote`] connections rooted at a fixed directory.
pub struct FsConnector {
    root: PathBuf,
}

impl FsConnector {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl RemoteConnector for FsConnector {
    fn describe(&self) -> String {
        format!("file://{}", self.root.display())
    }

    async fn connect(&self) -> Result<Box<dyn RemoteStore>, RemoteError> {
        let meta = tokio::fs::metadata(&self.root).await.map_err(|e| {
            RemoteError::Connection(format!("remote root {}: {}", self.root.display(), e))
        })?;
        if !meta.is_dir() {
            return Err(RemoteError::Connection(format!(
                "remote root {} is not a directory",
                self.root.display()
            )));
        }
        Ok(Box::new(FsRemote {
            root: self.root.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

/// One open "connection" to a filesystem-backed remote tree.
pub struct FsRemote {
    root: PathBuf,
    closed: AtomicBool,
}

impl FsRemote {
    fn resolve(&self, path: &str) -> Result<PathBuf, RemoteError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RemoteError::Connection(format!(
                "connection to {} is closed",
                self.root.display()
            )));
        }
        let rel = Path::new(path.trim_start_matches('/'));
        if rel
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
        {
            return Err(RemoteError::Io {
                path: path.to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "path escapes the remote root",
                ),
            });
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl RemoteStore for FsRemote {
    async fn list(&self, path: &str) -> Result<Vec<String>, RemoteError> {
        let dir = self.resolve(path)?;
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| RemoteError::from_io(path, e))?;

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| RemoteError::from_io(path, e))?
        {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        names.sort();
        Ok(names)
    }

    async fn stat(&self, path: &str) -> Result<RemoteStat, RemoteError> {
        let target = self.resolve(path)?;
        let meta = tokio::fs::metadata(&target)
            .await
            .map_err(|e| RemoteError::from_io(path, e))?;
        Ok(RemoteStat {
            modified: meta.modified().unwrap_or(UNIX_EPOCH),
            is_dir: meta.is_dir(),
        })
    }

    async fn get(&self, remote_path: &str, local_path: &Path) -> Result<(), RemoteError> {
        let source = self.resolve(remote_path)?;
        tokio::fs::copy(&source, local_path)
            .await
            .map_err(|e| RemoteError::from_io(remote_path, e))?;
        Ok(())
    }

    async fn put(&self, local_path: &Path, remote_path: &str) -> Result<(), RemoteError> {
        let target = self.resolve(remote_path)?;
        tokio::fs::copy(local_path, &target)
            .await
            .map_err(|e| RemoteError::from_io(remote_path, e))?;
        Ok(())
    }

    async fn rename(&self, old_path: &str, new_path: &str) -> Result<(), RemoteError> {
        let from = self.resolve(old_path)?;
        let to = self.resolve(new_path)?;
        tokio::fs::rename(&from, &to)
            .await
            .map_err(|e| RemoteError::from_io(old_path, e))
    }

    async fn mkdir(&self, path: &str) -> Result<(), RemoteError> {
        let target = self.resolve(path)?;
        tokio::fs::create_dir(&target)
            .await
            .map_err(|e| RemoteError::from_io(path, e))
    }

    async fn close(&mut self) -> Result<(), RemoteError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn list_is_sorted_and_mkdir_reports_existing() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("cam/20250102")).unwrap();
        std::fs::create_dir_all(tmp.path().join("cam/20250101")).unwrap();

        let connector = FsConnector::new(tmp.path());
        let store = connector.connect().await.unwrap();

        assert_eq!(store.list("cam").await.unwrap(), vec!["20250101", "20250102"]);
        assert!(matches!(
            store.mkdir("cam/20250101").await,
            Err(RemoteError::AlreadyExists(_))
        ));
        assert!(matches!(
            store.list("cam/missing").await,
            Err(RemoteError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn closed_connection_rejects_calls() {
        let tmp = TempDir::new().unwrap();
        let connector = FsConnector::new(tmp.path());
        let mut store = connector.connect().await.unwrap();
        store.close().await.unwrap();
        assert!(matches!(
            store.list("").await,
            Err(RemoteError::Connection(_))
        ));
    }

    #[tokio::test]
    async fn parent_components_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let store = FsConnector::new(tmp.path()).connect().await.unwrap();
        assert!(store.stat("../etc").await.is_err());
    }

    #[tokio::test]
    async fn missing_root_is_a_connection_error() {
        let tmp = TempDir::new().unwrap();
        let connector = FsConnector::new(tmp.path().join("nope"));
        assert!(matches!(
            connector.connect().await,
            Err(RemoteError::Connection(_))
        ));
    }
}
