//! Error taxonomy for the ingestion pipeline.
//!
//! Adapters report failures through their own enums ([`RemoteError`],
//! [`ClassifierError`]); the pipeline folds them into [`PipelineError`],
//! whose variant decides how far a failure propagates:
//!
//! | Variant | Scope |
//! |---------|-------|
//! | `Connection` | aborts the current source |
//! | `NotFound` | aborts the current source |
//! | `Stage` | logged, processing continues |
//! | `Download` | aborts the current batch |
//! | `Classification` | counted per file, never aborts the batch |
//! | `Publish` | logged per file |
//! | `Checkpoint` / `CheckpointCommit` | aborts the current source, no success claimed |

use std::path::PathBuf;

use thiserror::Error;

/// Failures raised by a [`RemoteStore`](crate::remote::RemoteStore) adapter.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("remote path not found: {0}")]
    NotFound(String),

    #[error("remote path already exists: {0}")]
    AlreadyExists(String),

    #[error("remote I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl RemoteError {
    /// Map a `std::io::Error` raised while touching `path` onto the adapter taxonomy.
    pub fn from_io(path: impl Into<String>, err: std::io::Error) -> Self {
        let path = path.into();
        match err.kind() {
            std::io::ErrorKind::NotFound => RemoteError::NotFound(path),
            std::io::ErrorKind::AlreadyExists => RemoteError::AlreadyExists(path),
            std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::NotConnected
            | std::io::ErrorKind::BrokenPipe => RemoteError::Connection(format!("{}: {}", path, err)),
            _ => RemoteError::Io { path, source: err },
        }
    }
}

/// Failures raised by a [`Classifier`](crate::classify::Classifier) adapter.
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("classifier transport error: {0}")]
    Transport(String),

    #[error("classifier rejected the request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("classifier quota exhausted ({status}): {body}")]
    Quota { status: u16, body: String },

    #[error("unparseable classifier response: {0}")]
    Parse(String),

    #[error("classifier call timed out after {0}s")]
    Timeout(u64),
}

impl From<reqwest::Error> for ClassifierError {
    fn from(err: reqwest::Error) -> Self {
        ClassifierError::Transport(err.to_string())
    }
}

/// Pipeline-level failures.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("stage error at {}: {source}", path.display())]
    Stage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("download of {remote} failed: {reason}")]
    Download { remote: String, reason: String },

    #[error("classification of {file} failed: {reason}")]
    Classification { file: String, reason: String },

    #[error("publish of {file} failed: {reason}")]
    Publish { file: String, reason: String },

    #[error("checkpoint document is invalid: {0}")]
    Checkpoint(String),

    #[error("checkpoint commit failed: {0}")]
    CheckpointCommit(String),

    #[error("remote store error: {0}")]
    Remote(RemoteError),
}

impl From<RemoteError> for PipelineError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Connection(msg) => PipelineError::Connection(msg),
            RemoteError::NotFound(path) => PipelineError::NotFound(path),
            other => PipelineError::Remote(other),
        }
    }
}

impl PipelineError {
    /// Whether this failure ends all remaining work for the current source.
    pub fn is_source_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::Connection(_)
                | PipelineError::NotFound(_)
                | PipelineError::Checkpoint(_)
                | PipelineError::CheckpointCommit(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_not_found_maps_to_not_found() {
        let err = RemoteError::from_io(
            "cam1/20250101",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(matches!(err, RemoteError::NotFound(ref p) if p == "cam1/20250101"));
    }

    #[test]
    fn connection_errors_are_source_fatal() {
        let err: PipelineError = RemoteError::Connection("reset".into()).into();
        assert!(err.is_source_fatal());

        let err: PipelineError = RemoteError::AlreadyExists("x".into()).into();
        assert!(!err.is_source_fatal());
    }
}
