//! Publishing a batch's matched subset back to the remote store.
//!
//! Everything in the stage's `matched` subarea is uploaded to the batch's
//! filtered directory, the verdict log included, so the reasoning behind each
//! match travels with the images. Uploads overwrite, which makes publishing the
//! same batch twice harmless. The published count reported to users excludes
//! the verdict log.

use tracing::{debug, info, warn};

use crate::config::SourceConfig;
use crate::error::{PipelineError, RemoteError};
use crate::layout::Layout;
use crate::models::{remote_join, RunCounters};
use crate::progress::{ProgressEvent, ProgressReporter, RunPhase};
use crate::remote::RemoteStore;
use crate::runner::verdict_log_name;
use crate::stage::{list_files, StageHandle};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishOutcome {
    /// Matched images in the stage, verdict log excluded.
    pub images: u64,
    /// Files uploaded successfully, verdict log included.
    pub uploaded: u64,
    pub failed: u64,
}

impl PublishOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }
}

/// Create the batch's filtered directory unless it is already there.
async fn ensure_dir(store: &dyn RemoteStore, path: &str) -> Result<(), PipelineError> {
    match store.stat(path).await {
        Ok(stat) if stat.is_dir => return Ok(()),
        Ok(_) => {
            return Err(PipelineError::Publish {
                file: path.to_string(),
                reason: "destination exists and is not a directory".to_string(),
            })
        }
        Err(RemoteError::NotFound(_)) => {}
        Err(e) => return Err(e.into()),
    }

    match store.mkdir(path).await {
        Ok(()) => {
            debug!(path, "created filtered directory");
            Ok(())
        }
        Err(RemoteError::AlreadyExists(_)) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Upload `handle.matched` to the batch's filtered directory and record the
/// matched image count.
///
/// A failed upload is logged and counted; the remaining files are still
/// attempted. A lost connection ends the batch.
pub async fn publish_batch(
    store: &dyn RemoteStore,
    layout: &Layout,
    source: &SourceConfig,
    handle: &StageHandle,
    counters: &mut RunCounters,
    progress: &dyn ProgressReporter,
) -> Result<PublishOutcome, PipelineError> {
    let dest = layout.filtered_dir(source, &handle.batch);
    ensure_dir(store, &dest).await?;

    let files = list_files(&handle.matched).await.map_err(|e| PipelineError::Stage {
        path: handle.matched.clone(),
        source: e,
    })?;
    let log_name = verdict_log_name(&handle.batch);
    let total = files.len() as u64;
    let mut outcome = PublishOutcome::default();

    for (i, path) in files.iter().enumerate() {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if name != log_name {
            outcome.images += 1;
        }

        let remote = remote_join(&[&dest, &name]);
        match store.put(path, &remote).await {
            Ok(()) => outcome.uploaded += 1,
            Err(RemoteError::Connection(msg)) => return Err(PipelineError::Connection(msg)),
            Err(e) => {
                outcome.failed += 1;
                let err = PipelineError::Publish {
                    file: name,
                    reason: e.to_string(),
                };
                warn!(source = %handle.source, batch = %handle.batch, error = %err, "upload failed");
            }
        }

        progress.report(ProgressEvent::files(
            &handle.source,
            &handle.batch,
            RunPhase::Publishing,
            i as u64 + 1,
            total,
        ));
    }

    counters.record_matched(&handle.source, &handle.batch, outcome.images);
    info!(
        source = %handle.source,
        batch = %handle.batch,
        images = outcome.images,
        failed = outcome.failed,
        dest = %dest,
        "batch published"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LayoutConfig;
    use crate::progress::NoProgress;
    use crate::remote::RemoteConnector;
    use crate::remote_fs::FsConnector;
    use crate::stage::StageManager;
    use tempfile::TempDir;

    fn source() -> SourceConfig {
        SourceConfig {
            id: "CAM1".into(),
            root: "CAM1".into(),
        }
    }

    #[tokio::test]
    async fn publishes_images_and_log_but_counts_images() {
        let tmp = TempDir::new().unwrap();
        let remote_root = tmp.path().join("remote");
        std::fs::create_dir_all(remote_root.join("CAM1/20250101/images")).unwrap();
        let store = FsConnector::new(&remote_root).connect().await.unwrap();
        let layout = Layout::new(&LayoutConfig::default()).unwrap();

        let handle = StageManager::new(tmp.path().join("stage"))
            .prepare("CAM1", "20250101")
            .await
            .unwrap();
        std::fs::write(handle.matched.join("20250101_0001.jpg"), b"a").unwrap();
        std::fs::write(handle.matched.join("20250101_0004.jpg"), b"b").unwrap();
        std::fs::write(handle.matched.join("verdicts_20250101.txt"), b"log").unwrap();

        let mut counters = RunCounters::new();
        let outcome = publish_batch(
            store.as_ref(),
            &layout,
            &source(),
            &handle,
            &mut counters,
            &NoProgress,
        )
        .await
        .unwrap();

        assert_eq!(outcome.images, 2);
        assert_eq!(outcome.uploaded, 3);
        assert!(outcome.is_complete());
        assert_eq!(counters.get("CAM1", "20250101").unwrap().matched, 2);

        let filtered = remote_root.join("CAM1/20250101/FILTERED IMAGES");
        assert!(filtered.join("20250101_0004.jpg").exists());
        assert!(filtered.join("verdicts_20250101.txt").exists());
    }

    #[tokio::test]
    async fn republishing_overwrites() {
        let tmp = TempDir::new().unwrap();
        let remote_root = tmp.path().join("remote");
        let filtered = remote_root.join("CAM1/20250101/FILTERED IMAGES");
        std::fs::create_dir_all(&filtered).unwrap();
        std::fs::write(filtered.join("20250101_0001.jpg"), b"stale").unwrap();

        let store = FsConnector::new(&remote_root).connect().await.unwrap();
        let layout = Layout::new(&LayoutConfig::default()).unwrap();
        let handle = StageManager::new(tmp.path().join("stage"))
            .prepare("CAM1", "20250101")
            .await
            .unwrap();
        std::fs::write(handle.matched.join("20250101_0001.jpg"), b"fresh").unwrap();

        let outcome = publish_batch(
            store.as_ref(),
            &layout,
            &source(),
            &handle,
            &mut RunCounters::new(),
            &NoProgress,
        )
        .await
        .unwrap();
        assert_eq!(outcome.images, 1);
        assert_eq!(
            std::fs::read(filtered.join("20250101_0001.jpg")).unwrap(),
            b"fresh"
        );
    }
}
