//! Local scratch areas for batches.
//!
//! Every `(source, batch)` pair gets three directories under the stage root:
//!
//! ```text
//! {stage.root}/{source}/{batch}/raw         downloaded captures
//! {stage.root}/{source}/{batch}/matched     copies routed as matches + verdict log
//! {stage.root}/{source}/{batch}/unmatched   copies routed as non-matches
//! ```
//!
//! [`StageManager::prepare`] wipes and recreates all three, so re-running a
//! batch never sees leftovers from an earlier attempt.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::SourceConfig;
use crate::error::{PipelineError, RemoteError};
use crate::layout::Layout;
use crate::models::{remote_join, RunCounters};
use crate::remote::RemoteStore;

/// The three subareas of one batch's stage.
#[derive(Debug, Clone)]
pub struct StageHandle {
    pub source: String,
    pub batch: String,
    pub raw: PathBuf,
    pub matched: PathBuf,
    pub unmatched: PathBuf,
}

impl StageHandle {
    fn subareas(&self) -> [&Path; 3] {
        [
            self.raw.as_path(),
            self.matched.as_path(),
            self.unmatched.as_path(),
        ]
    }
}

pub struct StageManager {
    root: PathBuf,
}

impl StageManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn handle(&self, source: &str, batch: &str) -> StageHandle {
        let base = self.root.join(source).join(batch);
        StageHandle {
            source: source.to_string(),
            batch: batch.to_string(),
            raw: base.join("raw"),
            matched: base.join("matched"),
            unmatched: base.join("unmatched"),
        }
    }

    /// Empty and recreate the stage for `(source, batch)`.
    ///
    /// A subarea that cannot be removed (a file held open elsewhere, say) is
    /// logged and recreation is still attempted; only a failure to create the
    /// directory is returned.
    pub async fn prepare(&self, source: &str, batch: &str) -> Result<StageHandle, PipelineError> {
        let handle = self.handle(source, batch);
        for dir in handle.subareas() {
            if tokio::fs::try_exists(dir).await.unwrap_or(false) {
                if let Err(e) = tokio::fs::remove_dir_all(dir).await {
                    let err = PipelineError::Stage {
                        path: dir.to_path_buf(),
                        source: e,
                    };
                    warn!(error = %err, "could not clear stage subarea");
                }
            }
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| PipelineError::Stage {
                    path: dir.to_path_buf(),
                    source: e,
                })?;
        }
        debug!(source, batch, "stage prepared");
        Ok(handle)
    }

    /// Download every raw file of the batch into `handle.raw` and record the
    /// raw count. Any single download failure fails the whole batch.
    pub async fn populate(
        &self,
        handle: &StageHandle,
        store: &dyn RemoteStore,
        layout: &Layout,
        source: &SourceConfig,
        counters: &mut RunCounters,
    ) -> Result<u64, PipelineError> {
        let raw_dir = layout.raw_dir(source, &handle.batch);
        let mut names: Vec<String> = store
            .list(&raw_dir)
            .await?
            .into_iter()
            .filter(|n| layout.is_raw_file(n))
            .collect();
        names.sort();

        let count = names.len() as u64;
        counters.record_raw(&handle.source, &handle.batch, count);

        for name in &names {
            let remote = remote_join(&[&raw_dir, name]);
            let local = handle.raw.join(name);
            store.get(&remote, &local).await.map_err(|e| match e {
                RemoteError::Connection(msg) => PipelineError::Connection(msg),
                other => PipelineError::Download {
                    remote: remote.clone(),
                    reason: other.to_string(),
                },
            })?;
        }

        info!(source = %handle.source, batch = %handle.batch, files = count, "batch staged");
        Ok(count)
    }
}

/// Regular files directly inside `dir`, sorted by name.
pub async fn list_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LayoutConfig;
    use crate::remote::RemoteConnector;
    use crate::remote_fs::FsConnector;
    use tempfile::TempDir;

    #[tokio::test]
    async fn prepare_twice_yields_empty_subareas() {
        let tmp = TempDir::new().unwrap();
        let stages = StageManager::new(tmp.path());

        let handle = stages.prepare("CAM1", "20250101").await.unwrap();
        std::fs::write(handle.raw.join("x.jpg"), b"x").unwrap();
        std::fs::write(handle.matched.join("y.jpg"), b"y").unwrap();
        std::fs::create_dir_all(handle.unmatched.join("nested")).unwrap();

        let handle = stages.prepare("CAM1", "20250101").await.unwrap();
        for dir in handle.subareas() {
            assert!(dir.is_dir());
            assert_eq!(std::fs::read_dir(dir).unwrap().count(), 0, "{:?}", dir);
        }
    }

    #[tokio::test]
    async fn stages_are_partitioned_by_source_and_batch() {
        let tmp = TempDir::new().unwrap();
        let stages = StageManager::new(tmp.path());
        let a = stages.prepare("CAM1", "20250101").await.unwrap();
        let b = stages.prepare("CAM2", "20250101").await.unwrap();
        std::fs::write(a.raw.join("keep.jpg"), b"x").unwrap();
        stages.prepare("CAM2", "20250101").await.unwrap();
        assert!(a.raw.join("keep.jpg").exists());
        assert_ne!(a.raw, b.raw);
    }

    #[tokio::test]
    async fn populate_downloads_and_counts() {
        let tmp = TempDir::new().unwrap();
        let remote_root = tmp.path().join("remote");
        let raw = remote_root.join("CAM1/20250101/images");
        std::fs::create_dir_all(&raw).unwrap();
        std::fs::write(raw.join("20250101_0001.jpg"), b"one").unwrap();
        std::fs::write(raw.join("20250101_0002.jpg"), b"two").unwrap();

        let store = FsConnector::new(&remote_root).connect().await.unwrap();
        let layout = Layout::new(&LayoutConfig::default()).unwrap();
        let source = SourceConfig {
            id: "CAM1".into(),
            root: "CAM1".into(),
        };
        let stages = StageManager::new(tmp.path().join("stage"));
        let handle = stages.prepare("CAM1", "20250101").await.unwrap();
        let mut counters = RunCounters::new();

        let n = stages
            .populate(&handle, store.as_ref(), &layout, &source, &mut counters)
            .await
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(counters.get("CAM1", "20250101").unwrap().raw, 2);
        assert_eq!(list_files(&handle.raw).await.unwrap().len(), 2);
        assert_eq!(
            std::fs::read(handle.raw.join("20250101_0002.jpg")).unwrap(),
            b"two"
        );
    }

    #[tokio::test]
    async fn missing_raw_dir_fails_the_batch() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("remote")).unwrap();
        let store = FsConnector::new(tmp.path().join("remote"))
            .connect()
            .await
            .unwrap();
        let layout = Layout::new(&LayoutConfig::default()).unwrap();
        let source = SourceConfig {
            id: "CAM1".into(),
            root: "CAM1".into(),
        };
        let stages = StageManager::new(tmp.path().join("stage"));
        let handle = stages.prepare("CAM1", "20250101").await.unwrap();
        let result = stages
            .populate(&handle, store.as_ref(), &layout, &source, &mut RunCounters::new())
            .await;
        assert!(matches!(result, Err(PipelineError::NotFound(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_removal_still_leaves_empty_subareas() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let stages = StageManager::new(tmp.path());
        let handle = stages.prepare("CAM1", "20250101").await.unwrap();
        std::fs::write(handle.raw.join("old.jpg"), b"x").unwrap();
        std::fs::write(handle.matched.join("old.jpg"), b"y").unwrap();

        // The subareas' contents can go, but the subareas themselves cannot.
        let batch_dir = tmp.path().join("CAM1/20250101");
        std::fs::set_permissions(&batch_dir, std::fs::Permissions::from_mode(0o555)).unwrap();

        let result = stages.prepare("CAM1", "20250101").await;

        std::fs::set_permissions(&batch_dir, std::fs::Permissions::from_mode(0o755)).unwrap();
        let handle = result.unwrap();
        for dir in handle.subareas() {
            assert!(dir.is_dir());
            assert_eq!(std::fs::read_dir(dir).unwrap().count(), 0, "{:?}", dir);
        }
    }
}
