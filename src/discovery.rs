//! Batch discovery: which batches a source processes this run.
//!
//! Batch keys are date-like directory names (`YYYYMMDD`) whose string order is
//! their chronological order. A normal run takes every key strictly after the
//! watermark, minus the newest one: the capture device may still be uploading
//! into the most recent batch when the run fires from another time zone, so
//! that batch is deferred by one run.
//!
//! Only directories under a source root are batch keys. A stray file next to
//! the batch directories would otherwise sort last and take the place of the
//! newest batch in the lag rule.
//!
//! An override run uses the operator's queue in the order given, with no lag
//! applied. A key queued twice is processed once.

use std::collections::HashSet;

use tracing::debug;

use crate::checkpoint::CheckpointRecord;
use crate::error::PipelineError;
use crate::models::remote_join;
use crate::remote::RemoteStore;

/// How a source's batch set was chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchPlan {
    /// Watermark-based discovery; the watermark advances on commit.
    Normal(Vec<String>),
    /// Operator-requested batches; the queue is cleared on commit and the
    /// watermark is left alone.
    Override(Vec<String>),
}

impl BatchPlan {
    pub fn batches(&self) -> &[String] {
        match self {
            BatchPlan::Normal(b) | BatchPlan::Override(b) => b,
        }
    }

    pub fn is_override(&self) -> bool {
        matches!(self, BatchPlan::Override(_))
    }

    pub fn is_empty(&self) -> bool {
        self.batches().is_empty()
    }
}

/// Batch keys present under a source root: its subdirectories, in listing order.
pub async fn list_batch_keys(
    store: &dyn RemoteStore,
    source_root: &str,
) -> Result<Vec<String>, PipelineError> {
    let mut keys = Vec::new();
    for name in store.list(source_root).await? {
        if store.stat(&remote_join(&[source_root, &name])).await?.is_dir {
            keys.push(name);
        } else {
            debug!(root = source_root, entry = %name, "ignoring non-directory entry");
        }
    }
    Ok(keys)
}

/// Batches eligible for a normal run: keys strictly greater than `watermark`,
/// ascending, with the single most recent key withheld.
pub fn discover(watermark: &str, listing: &[String]) -> Vec<String> {
    let mut sorted: Vec<&String> = listing.iter().collect();
    sorted.sort();

    let mut pending: Vec<String> = sorted
        .into_iter()
        .filter(|key| key.as_str() > watermark)
        .cloned()
        .collect();
    pending.sort();
    pending.dedup();

    // The newest batch may still be receiving files.
    pending.pop();
    pending
}

/// Choose the batch set for one source.
///
/// In override mode `listing` is ignored and the record's override queue is
/// used in first-occurrence order (optionally sorted), without duplicates.
pub fn plan_batches(
    record: &CheckpointRecord,
    listing: &[String],
    override_run: bool,
    sort_override: bool,
) -> BatchPlan {
    if override_run {
        let mut seen = HashSet::new();
        let mut batches: Vec<String> = record
            .override_queue
            .iter()
            .filter(|key| seen.insert(key.as_str()))
            .cloned()
            .collect();
        if sort_override {
            batches.sort();
        }
        return BatchPlan::Override(batches);
    }
    BatchPlan::Normal(discover(&record.last_processed_batch, listing))
}
