//! Remote directory layout of a capture source.
//!
//! ```text
//! {source.root}/
//!   20250101/
//!     images/              raw captures, renamed in place by the sequencer
//!     FILTERED IMAGES/     matched subset published back by the pipeline
//!   20250102/
//!     ...
//! ```

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::config::{LayoutConfig, SourceConfig};
use crate::models::remote_join;

/// Resolves remote paths and filters raw file names for every source.
#[derive(Debug, Clone)]
pub struct Layout {
    raw_subdir: String,
    filtered_subdir: String,
    default_extension: String,
    include: GlobSet,
}

impl Layout {
    pub fn new(config: &LayoutConfig) -> Result<Self> {
        Ok(Self {
            raw_subdir: config.raw_subdir.clone(),
            filtered_subdir: config.filtered_subdir.clone(),
            default_extension: config.default_extension.clone(),
            include: build_globset(&config.include_globs)?,
        })
    }

    pub fn raw_dir(&self, source: &SourceConfig, batch: &str) -> String {
        remote_join(&[&source.root, batch, &self.raw_subdir])
    }

    pub fn filtered_dir(&self, source: &SourceConfig, batch: &str) -> String {
        remote_join(&[&source.root, batch, &self.filtered_subdir])
    }

    /// Whether a raw listing entry takes part in sequencing and staging.
    pub fn is_raw_file(&self, name: &str) -> bool {
        self.include.is_match(name)
    }

    pub fn default_extension(&self) -> &str {
        &self.default_extension
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
