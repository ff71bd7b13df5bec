//! In-place sequencing of a batch's raw files.
//!
//! Capture devices name files by timestamp or counter. The sequencer renames
//! them on the remote store to `{batch}_{index:04}.{ext}`, with 1-based
//! indices assigned in ascending modification-time order (stable on ties, so
//! the listing order breaks them).
//!
//! A file whose name already contains [`SEQUENCE_SEPARATOR`] is treated as
//! sequenced by an earlier run and left alone. This is deliberately coarse:
//! any underscore counts, so a device file that happens to contain one is
//! never renamed. Tightening it to the exact canonical pattern would change
//! which remote files get renamed.

use std::collections::HashSet;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::config::SourceConfig;
use crate::error::PipelineError;
use crate::layout::Layout;
use crate::models::{remote_join, RawFileEntry, SEQUENCE_SEPARATOR};
use crate::remote::RemoteStore;

/// What the sequencer did to one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequenceOutcome {
    pub renamed: usize,
    pub already_sequenced: usize,
    /// Files left alone because their canonical name is already taken.
    pub collisions: usize,
}

/// A single planned rename within a batch's raw directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenameStep {
    Rename { from: String, to: String },
    AlreadySequenced { name: String },
    Collision { name: String, target: String },
}

/// Canonical sequenced file name.
pub fn canonical_name(batch: &str, index: usize, extension: &str) -> String {
    format!("{}{}{:04}.{}", batch, SEQUENCE_SEPARATOR, index, extension)
}

fn extension_of<'a>(name: &'a str, default_extension: &'a str) -> std::borrow::Cow<'a, str> {
    Path::new(name)
        .extension()
        .map(|e| e.to_string_lossy())
        .unwrap_or(std::borrow::Cow::Borrowed(default_extension))
}

/// Compute the renames for `entries` (in listing order) without touching the
/// remote store.
pub fn plan_renames(batch: &str, entries: &[RawFileEntry], default_extension: &str) -> Vec<RenameStep> {
    let mut ordered: Vec<&RawFileEntry> = entries.iter().collect();
    // sort_by_key is stable: equal timestamps keep listing order.
    ordered.sort_by_key(|e| e.modified);

    let existing: HashSet<&str> = entries.iter().map(|e| e.name.as_str()).collect();

    ordered
        .into_iter()
        .enumerate()
        .map(|(i, entry)| {
            if entry.name.contains(SEQUENCE_SEPARATOR) {
                return RenameStep::AlreadySequenced {
                    name: entry.name.clone(),
                };
            }
            let target = canonical_name(batch, i + 1, &extension_of(&entry.name, default_extension));
            if existing.contains(target.as_str()) {
                RenameStep::Collision {
                    name: entry.name.clone(),
                    target,
                }
            } else {
                RenameStep::Rename {
                    from: entry.name.clone(),
                    to: target,
                }
            }
        })
        .collect()
}

/// Sequence one batch in place on the remote store.
pub async fn sequence_batch(
    store: &dyn RemoteStore,
    layout: &Layout,
    source: &SourceConfig,
    batch: &str,
) -> Result<SequenceOutcome, PipelineError> {
    let raw_dir = layout.raw_dir(source, batch);
    let names: Vec<String> = store
        .list(&raw_dir)
        .await?
        .into_iter()
        .filter(|n| layout.is_raw_file(n))
        .collect();

    if names.is_empty() {
        info!(source = %source.id, batch, "no raw files to sequence");
        return Ok(SequenceOutcome::default());
    }

    let mut entries = Vec::with_capacity(names.len());
    for name in names {
        let stat = store.stat(&remote_join(&[&raw_dir, &name])).await?;
        if stat.is_dir {
            continue;
        }
        entries.push(RawFileEntry {
            name,
            modified: stat.modified,
        });
    }

    let mut outcome = SequenceOutcome::default();
    for step in plan_renames(batch, &entries, layout.default_extension()) {
        match step {
            RenameStep::Rename { from, to } => {
                debug!(source = %source.id, batch, %from, %to, "renaming raw file");
                store
                    .rename(&remote_join(&[&raw_dir, &from]), &remote_join(&[&raw_dir, &to]))
                    .await?;
                outcome.renamed += 1;
            }
            RenameStep::AlreadySequenced { name } => {
                debug!(source = %source.id, batch, %name, "already sequenced, skipping");
                outcome.already_sequenced += 1;
            }
            RenameStep::Collision { name, target } => {
                warn!(
                    source = %source.id,
                    batch,
                    %name,
                    %target,
                    "canonical name already taken, leaving file unrenamed"
                );
                outcome.collisions += 1;
            }
        }
    }

    info!(
        source = %source.id,
        batch,
        renamed = outcome.renamed,
        skipped = outcome.already_sequenced,
        "batch sequenced"
    );
    Ok(outcome)
}
