//! Durable per-source progress records.
//!
//! The checkpoint document is a flat JSON object kept on the remote store:
//!
//! ```json
//! {
//!     "last_run_date": "02/01/2025",
//!     "last_run_time": "21:04:11",
//!     "CAM1": "20250101",
//!     "CAM1-OVR": [],
//!     "CAM2": "20241231",
//!     "CAM2-OVR": ["20241215", "20241216"]
//! }
//! ```
//!
//! Each source owns two keys: its watermark (`{source}`) and its override
//! queue (`{source}-OVR`). The remote copy is authoritative; the local file
//! is a working copy rewritten on every commit. The document is loaded once
//! per run and committed once per successfully processed source. Keys the
//! pipeline does not know about are preserved.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::config::CheckpointConfig;
use crate::error::{PipelineError, RemoteError};
use crate::remote::RemoteStore;

const LAST_RUN_DATE: &str = "last_run_date";
const LAST_RUN_TIME: &str = "last_run_time";

/// The checkpoint state of one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointRecord {
    /// Highest batch key known to be fully processed.
    pub last_processed_batch: String,
    /// Batch keys to force-process on the next run, in operator order.
    pub override_queue: Vec<String>,
    pub last_run_date: Option<String>,
    pub last_run_time: Option<String>,
}

impl CheckpointRecord {
    /// Move the watermark to `batch` if it is ahead of the current one.
    /// The watermark never moves backwards.
    pub fn advance_to(&mut self, batch: &str) {
        if batch > self.last_processed_batch.as_str() {
            self.last_processed_batch = batch.to_string();
        }
    }

    pub fn stamp(&mut self, date: String, time: String) {
        self.last_run_date = Some(date);
        self.last_run_time = Some(time);
    }

    pub fn clear_override(&mut self) {
        self.override_queue.clear();
    }
}

fn override_key(source: &str) -> String {
    format!("{}-OVR", source)
}

/// In-memory view of the checkpoint document plus where to persist it.
pub struct CheckpointStore {
    remote_path: String,
    local_path: PathBuf,
    doc: Map<String, Value>,
}

impl CheckpointStore {
    /// Fetch the authoritative document from the remote store into the local
    /// working file and parse it.
    pub async fn load(
        store: &dyn RemoteStore,
        config: &CheckpointConfig,
    ) -> Result<Self, PipelineError> {
        if let Some(parent) = non_empty_parent(&config.local_path) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PipelineError::Stage {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }

        store
            .get(&config.remote_path, &config.local_path)
            .await
            .map_err(|e| match e {
                RemoteError::NotFound(p) => {
                    PipelineError::NotFound(format!("checkpoint document {}", p))
                }
                other => other.into(),
            })?;

        let content = tokio::fs::read_to_string(&config.local_path)
            .await
            .map_err(|e| {
                PipelineError::Checkpoint(format!("{}: {}", config.local_path.display(), e))
            })?;
        let doc = parse_document(&content)?;
        debug!(path = %config.remote_path, keys = doc.len(), "checkpoint loaded");

        Ok(Self {
            remote_path: config.remote_path.clone(),
            local_path: config.local_path.clone(),
            doc,
        })
    }

    /// Build a store from an already-parsed document.
    pub fn from_document(config: &CheckpointConfig, content: &str) -> Result<Self, PipelineError> {
        Ok(Self {
            remote_path: config.remote_path.clone(),
            local_path: config.local_path.clone(),
            doc: parse_document(content)?,
        })
    }

    /// The record for `source`. Fails with `NotFound` if the source has never
    /// been provisioned in the document.
    pub fn load_record(&self, source: &str) -> Result<CheckpointRecord, PipelineError> {
        let watermark = match self.doc.get(source) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => {
                return Err(PipelineError::Checkpoint(format!(
                    "watermark for '{}' must be a string, found {}",
                    source, other
                )))
            }
            None => {
                return Err(PipelineError::NotFound(format!(
                    "checkpoint record for source '{}'",
                    source
                )))
            }
        };

        Ok(CheckpointRecord {
            last_processed_batch: watermark,
            override_queue: self.override_batches(source)?,
            last_run_date: self.top_level_string(LAST_RUN_DATE),
            last_run_time: self.top_level_string(LAST_RUN_TIME),
        })
    }

    pub fn has_override(&self, source: &str) -> bool {
        self.override_batches(source)
            .map(|q| !q.is_empty())
            .unwrap_or(false)
    }

    /// The queued override batches for `source`, verbatim. The queue is only
    /// cleared by committing a record whose queue has been emptied.
    pub fn take_override_batches(&self, source: &str) -> Result<Vec<String>, PipelineError> {
        self.override_batches(source)
    }

    /// A run is an override run when any configured source has queued batches.
    pub fn any_override<'s>(&self, mut sources: impl Iterator<Item = &'s str>) -> bool {
        sources.any(|s| self.has_override(s))
    }

    /// Persist `record` as the full state of `source`.
    ///
    /// The new document is written to the local working file (temp file then
    /// rename) and uploaded to a temporary remote name that is renamed over the
    /// authoritative path. The in-memory document only changes once both
    /// writes have succeeded.
    pub async fn commit(
        &mut self,
        store: &dyn RemoteStore,
        source: &str,
        record: &CheckpointRecord,
    ) -> Result<(), PipelineError> {
        let mut next = self.doc.clone();
        next.insert(
            source.to_string(),
            Value::String(record.last_processed_batch.clone()),
        );
        next.insert(
            override_key(source),
            Value::Array(
                record
                    .override_queue
                    .iter()
                    .cloned()
                    .map(Value::String)
                    .collect(),
            ),
        );
        if let Some(date) = &record.last_run_date {
            next.insert(LAST_RUN_DATE.to_string(), Value::String(date.clone()));
        }
        if let Some(time) = &record.last_run_time {
            next.insert(LAST_RUN_TIME.to_string(), Value::String(time.clone()));
        }

        let body = serde_json::to_string_pretty(&Value::Object(next.clone()))
            .map_err(|e| PipelineError::CheckpointCommit(e.to_string()))?;

        write_local_atomically(&self.local_path, &body)
            .await
            .map_err(|e| PipelineError::CheckpointCommit(format!("local working copy: {}", e)))?;

        let staging = format!("{}.tmp", self.remote_path);
        store
            .put(&self.local_path, &staging)
            .await
            .map_err(|e| PipelineError::CheckpointCommit(format!("upload: {}", e)))?;
        store
            .rename(&staging, &self.remote_path)
            .await
            .map_err(|e| PipelineError::CheckpointCommit(format!("rename: {}", e)))?;

        self.doc = next;
        info!(
            source,
            watermark = %record.last_processed_batch,
            pending_overrides = record.override_queue.len(),
            "checkpoint committed"
        );
        Ok(())
    }

    fn override_batches(&self, source: &str) -> Result<Vec<String>, PipelineError> {
        match self.doc.get(&override_key(source)) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| match v {
                    Value::String(s) => Ok(s.clone()),
                    other => Err(PipelineError::Checkpoint(format!(
                        "override batch for '{}' must be a string, found {}",
                        source, other
                    ))),
                })
                .collect(),
            Some(other) => Err(PipelineError::Checkpoint(format!(
                "override queue for '{}' must be a list, found {}",
                source, other
            ))),
        }
    }

    fn top_level_string(&self, key: &str) -> Option<String> {
        self.doc
            .get(key)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }
}

fn parse_document(content: &str) -> Result<Map<String, Value>, PipelineError> {
    match serde_json::from_str::<Value>(content) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(PipelineError::Checkpoint(
            "top-level value must be an object".to_string(),
        )),
        Err(e) => Err(PipelineError::Checkpoint(e.to_string())),
    }
}

fn non_empty_parent(path: &Path) -> Option<&Path> {
    path.parent().filter(|p| !p.as_os_str().is_empty())
}

async fn write_local_atomically(path: &Path, body: &str) -> std::io::Result<()> {
    if let Some(parent) = non_empty_parent(path) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, body).await?;
    tokio::fs::rename(&tmp, path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::RemoteConnector;
    use crate::remote_fs::FsConnector;
    use tempfile::TempDir;

    const DOC: &str = r#"{
        "last_run_date": "01/01/2025",
        "last_run_time": "10:00:00",
        "CAM1": "20250101",
        "CAM1-OVR": [],
        "CAM2": "20250105",
        "CAM2-OVR": ["20250103", "20250102"],
        "comment": "kept"
    }"#;

    fn setup() -> (TempDir, CheckpointConfig) {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("remote/Logs")).unwrap();
        std::fs::write(tmp.path().join("remote/Logs/ctrl_data.json"), DOC).unwrap();
        let config = CheckpointConfig {
            remote_path: "Logs/ctrl_data.json".to_string(),
            local_path: tmp.path().join("work/ctrl_data.json"),
            sort_override_batches: false,
        };
        (tmp, config)
    }

    #[tokio::test]
    async fn load_reads_records_and_overrides() {
        let (tmp, config) = setup();
        let store = FsConnector::new(tmp.path().join("remote"))
            .connect()
            .await
            .unwrap();
        let checkpoints = CheckpointStore::load(store.as_ref(), &config).await.unwrap();

        let cam1 = checkpoints.load_record("CAM1").unwrap();
        assert_eq!(cam1.last_processed_batch, "20250101");
        assert!(cam1.override_queue.is_empty());
        assert_eq!(cam1.last_run_date.as_deref(), Some("01/01/2025"));

        assert!(!checkpoints.has_override("CAM1"));
        assert!(checkpoints.has_override("CAM2"));
        assert_eq!(
            checkpoints.take_override_batches("CAM2").unwrap(),
            vec!["20250103", "20250102"]
        );
        assert!(checkpoints.any_override(["CAM1", "CAM2"].into_iter()));
        assert!(matches!(
            checkpoints.load_record("CAM3"),
            Err(PipelineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn missing_document_is_not_found() {
        let (tmp, mut config) = setup();
        config.remote_path = "Logs/absent.json".to_string();
        let store = FsConnector::new(tmp.path().join("remote"))
            .connect()
            .await
            .unwrap();
        let result = CheckpointStore::load(store.as_ref(), &config).await;
        assert!(matches!(result, Err(PipelineError::NotFound(_))));
    }

    #[tokio::test]
    async fn commit_persists_and_preserves_other_keys() {
        let (tmp, config) = setup();
        let store = FsConnector::new(tmp.path().join("remote"))
            .connect()
            .await
            .unwrap();
        let mut checkpoints = CheckpointStore::load(store.as_ref(), &config).await.unwrap();

        let mut cam2 = checkpoints.load_record("CAM2").unwrap();
        cam2.clear_override();
        checkpoints
            .commit(store.as_ref(), "CAM2", &cam2)
            .await
            .unwrap();

        let mut cam1 = checkpoints.load_record("CAM1").unwrap();
        cam1.advance_to("20250104");
        cam1.stamp("05/01/2025".into(), "21:00:00".into());
        checkpoints
            .commit(store.as_ref(), "CAM1", &cam1)
            .await
            .unwrap();

        let reloaded = CheckpointStore::load(store.as_ref(), &config).await.unwrap();
        assert_eq!(reloaded.load_record("CAM1").unwrap().last_processed_batch, "20250104");
        assert_eq!(reloaded.load_record("CAM2").unwrap().last_processed_batch, "20250105");
        assert!(!reloaded.has_override("CAM2"));
        assert_eq!(
            reloaded.load_record("CAM1").unwrap().last_run_date.as_deref(),
            Some("05/01/2025")
        );
        assert_eq!(reloaded.doc.get("comment"), Some(&Value::String("kept".into())));
        assert!(!tmp.path().join("remote/Logs/ctrl_data.json.tmp").exists());
    }

    #[test]
    fn watermark_never_moves_backwards() {
        let mut record = CheckpointRecord {
            last_processed_batch: "20250110".into(),
            override_queue: vec![],
            last_run_date: None,
            last_run_time: None,
        };
        record.advance_to("20250101");
        assert_eq!(record.last_processed_batch, "20250110");
        record.advance_to("20250111");
        assert_eq!(record.last_processed_batch, "20250111");
    }

    #[test]
    fn malformed_override_queue_is_rejected() {
        let config = CheckpointConfig::default();
        let checkpoints =
            CheckpointStore::from_document(&config, r#"{"CAM1": "x", "CAM1-OVR": "y"}"#).unwrap();
        assert!(matches!(
            checkpoints.load_record("CAM1"),
            Err(PipelineError::Checkpoint(_))
        ));
        assert!(CheckpointStore::from_document(&config, "[1, 2]").is_err());
    }
}
