//! Run orchestration.
//!
//! One call to [`Pipeline::run_once`] processes every configured source in
//! order:
//!
//! ```text
//! load checkpoint ─▶ for each source:
//!                      plan ─▶ sequence ─▶ stage ─▶ (disconnect) ─▶ classify
//!                           ─▶ (reconnect) ─▶ publish ─▶ commit checkpoint
//!                  ─▶ RunSummary
//! ```
//!
//! A source's checkpoint is committed only when every planned batch made it
//! through staging and publishing. Classification errors on individual files
//! do not hold back the commit; they are counted and reported. A failure that
//! ends a source is recorded and the next source is still attempted.
//!
//! The remote connection is dropped before classification starts, since a
//! long classification phase would otherwise leave it idle long enough to
//! time out, and reopened for publishing.

use std::collections::BTreeSet;

use anyhow::Result;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::checkpoint::{CheckpointRecord, CheckpointStore};
use crate::classify::{Classifier, VerdictRules};
use crate::config::{Config, SourceConfig};
use crate::discovery::{list_batch_keys, plan_batches, BatchPlan};
use crate::error::PipelineError;
use crate::layout::Layout;
use crate::models::RunCounters;
use crate::pacing::Pacer;
use crate::progress::{ProgressEvent, ProgressReporter, RunPhase};
use crate::publish::publish_batch;
use crate::remote::{RemoteConnector, RemoteSession};
use crate::report::{RunFailure, RunSummary};
use crate::runner::ClassificationRunner;
use crate::sequencer::sequence_batch;
use crate::stage::StageManager;

pub struct Pipeline<'a> {
    config: &'a Config,
    layout: Layout,
    stages: StageManager,
    connector: &'a dyn RemoteConnector,
    progress: &'a dyn ProgressReporter,
    tz: Tz,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: &'a Config,
        connector: &'a dyn RemoteConnector,
        progress: &'a dyn ProgressReporter,
    ) -> Result<Self> {
        Ok(Self {
            config,
            layout: Layout::new(&config.layout)?,
            stages: StageManager::new(&config.stage.root),
            connector,
            progress,
            tz: config.report.tz()?,
        })
    }

    fn now(&self) -> DateTime<Tz> {
        Utc::now().with_timezone(&self.tz)
    }

    fn source_ids(&self) -> impl Iterator<Item = &str> {
        self.config.sources.iter().map(|s| s.id.as_str())
    }

    /// Process every configured source once.
    ///
    /// Only failures that prevent the run from starting (the remote store is
    /// unreachable, the checkpoint document is missing or malformed) are
    /// returned as errors; everything else ends up in the summary.
    pub async fn run_once(&self, classifier: &dyn Classifier) -> Result<RunSummary, PipelineError> {
        let run_id = Uuid::new_v4().to_string();
        let span = info_span!("run", run_id = %run_id);
        self.run_inner(run_id, classifier).instrument(span).await
    }

    async fn run_inner(
        &self,
        run_id: String,
        classifier: &dyn Classifier,
    ) -> Result<RunSummary, PipelineError> {
        let started = self.now();
        let mut session = RemoteSession::new(self.connector);

        let loaded = match session.store().await {
            Ok(store) => CheckpointStore::load(store, &self.config.checkpoint).await,
            Err(e) => Err(e.into()),
        };
        let mut checkpoint = match loaded {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                session.close().await;
                return Err(e);
            }
        };

        let override_run = checkpoint.any_override(self.source_ids());
        info!(
            override_run,
            sources = self.config.sources.len(),
            model = classifier.model_name(),
            "run started"
        );

        let classifier_config = &self.config.classifier;
        let mut runner = ClassificationRunner::new(
            classifier,
            VerdictRules::from_config(classifier_config),
            classifier_config.prompt.clone(),
            classifier_config.timeout(),
            Pacer::per_minute(classifier_config.calls_per_minute),
            self.progress,
        );

        let mut counters = RunCounters::new();
        let mut failures = Vec::new();
        let mut committed = Vec::new();

        for source in &self.config.sources {
            let span = info_span!("source", source = %source.id);
            let result = self
                .process_source(
                    &mut session,
                    &mut checkpoint,
                    &mut runner,
                    source,
                    override_run,
                    &mut counters,
                    &mut failures,
                )
                .instrument(span)
                .await;

            match result {
                Ok(true) => committed.push(source.id.clone()),
                Ok(false) => {}
                Err(e) => {
                    error!(source = %source.id, error = %e, "source abandoned");
                    if matches!(e, PipelineError::Connection(_)) {
                        session.close().await;
                    }
                    failures.push(RunFailure {
                        source: source.id.clone(),
                        batch: None,
                        reason: e.to_string(),
                    });
                }
            }
        }
        session.close().await;

        let finished = self.now();
        info!(
            committed = committed.len(),
            failures = failures.len(),
            elapsed_secs = (finished - started).num_seconds(),
            "run finished"
        );
        Ok(RunSummary {
            run_id,
            override_run,
            started,
            finished,
            counters,
            failures,
            committed,
        })
    }

    /// Returns whether the source's checkpoint was committed.
    #[allow(clippy::too_many_arguments)]
    async fn process_source(
        &self,
        session: &mut RemoteSession<'_>,
        checkpoint: &mut CheckpointStore,
        runner: &mut ClassificationRunner<'_>,
        source: &SourceConfig,
        override_run: bool,
        counters: &mut RunCounters,
        failures: &mut Vec<RunFailure>,
    ) -> Result<bool, PipelineError> {
        self.progress
            .report(ProgressEvent::phase(&source.id, None, RunPhase::Discovering));
        let record = checkpoint.load_record(&source.id)?;
        let plan = self.plan_source(session, &record, source, override_run).await?;

        if plan.is_empty() {
            info!(watermark = %record.last_processed_batch, "no batches to process");
            return Ok(false);
        }
        info!(
            batches = ?plan.batches(),
            override_batches = plan.is_override(),
            "batches planned"
        );

        let mut failed: BTreeSet<String> = BTreeSet::new();

        {
            let store = session.store().await?;
            for batch in plan.batches() {
                self.progress
                    .report(ProgressEvent::phase(&source.id, Some(batch.as_str()), RunPhase::Sequencing));
                if let Err(e) = sequence_batch(store, &self.layout, source, batch).await {
                    batch_failed(e, source, batch, &mut failed, failures)?;
                }
            }
        }

        let mut staged = Vec::new();
        {
            let store = session.store().await?;
            for batch in plan.batches() {
                if failed.contains(batch) {
                    continue;
                }
                self.progress
                    .report(ProgressEvent::phase(&source.id, Some(batch.as_str()), RunPhase::Staging));
                let result = match self.stages.prepare(&source.id, batch).await {
                    Ok(handle) => self
                        .stages
                        .populate(&handle, store, &self.layout, source, counters)
                        .await
                        .map(|_| handle),
                    Err(e) => Err(e),
                };
                match result {
                    Ok(handle) => staged.push(handle),
                    Err(e) => batch_failed(e, source, batch, &mut failed, failures)?,
                }
            }
        }

        session.close().await;

        let mut classified = Vec::new();
        for handle in staged {
            match runner.classify_batch(&handle, counters).await {
                Ok(outcome) => {
                    if outcome.errors > 0 {
                        warn!(
                            batch = %handle.batch,
                            errors = outcome.errors,
                            "some files could not be classified"
                        );
                    }
                    classified.push(handle);
                }
                Err(e) => batch_failed(e, source, &handle.batch, &mut failed, failures)?,
            }
        }

        let store = session.store().await?;
        for handle in &classified {
            match publish_batch(store, &self.layout, source, handle, counters, self.progress).await {
                Ok(outcome) if outcome.is_complete() => {}
                Ok(outcome) => {
                    failures.push(RunFailure {
                        source: source.id.clone(),
                        batch: Some(handle.batch.clone()),
                        reason: format!(
                            "{} of {} uploads failed",
                            outcome.failed,
                            outcome.failed + outcome.uploaded
                        ),
                    });
                    failed.insert(handle.batch.clone());
                }
                Err(e) => batch_failed(e, source, &handle.batch, &mut failed, failures)?,
            }
        }

        if !failed.is_empty() {
            warn!(
                failed_batches = ?failed,
                "checkpoint not committed; the batch set will be retried next run"
            );
            return Ok(false);
        }

        let mut next = record.clone();
        match &plan {
            BatchPlan::Override(_) => next.clear_override(),
            BatchPlan::Normal(batches) => {
                if let Some(newest) = batches.iter().max() {
                    next.advance_to(newest);
                }
                let now = self.now();
                next.stamp(
                    now.format("%d/%m/%Y").to_string(),
                    now.format("%H:%M:%S").to_string(),
                );
            }
        }
        checkpoint.commit(store, &source.id, &next).await?;
        Ok(true)
    }

    async fn plan_source(
        &self,
        session: &mut RemoteSession<'_>,
        record: &CheckpointRecord,
        source: &SourceConfig,
        override_run: bool,
    ) -> Result<BatchPlan, PipelineError> {
        if override_run {
            return Ok(plan_batches(
                record,
                &[],
                true,
                self.config.checkpoint.sort_override_batches,
            ));
        }
        let listing = list_batch_keys(session.store().await?, &source.root).await?;
        Ok(plan_batches(record, &listing, false, false))
    }

    /// Work out what a run would do without changing anything remotely.
    pub async fn plan(&self) -> Result<RunPlan, PipelineError> {
        let mut session = RemoteSession::new(self.connector);
        let result = self.plan_with(&mut session).await;
        session.close().await;
        result
    }

    async fn plan_with(&self, session: &mut RemoteSession<'_>) -> Result<RunPlan, PipelineError> {
        let checkpoint = CheckpointStore::load(session.store().await?, &self.config.checkpoint).await?;
        let override_run = checkpoint.any_override(self.source_ids());

        let mut sources = Vec::with_capacity(self.config.sources.len());
        for source in &self.config.sources {
            let entry = match checkpoint.load_record(&source.id) {
                Ok(record) => match self.plan_source(session, &record, source, override_run).await {
                    Ok(plan) => SourcePlan {
                        source: source.id.clone(),
                        watermark: Some(record.last_processed_batch),
                        batches: plan.batches().to_vec(),
                        error: None,
                    },
                    Err(e) => SourcePlan {
                        source: source.id.clone(),
                        watermark: Some(record.last_processed_batch),
                        batches: Vec::new(),
                        error: Some(e.to_string()),
                    },
                },
                Err(e) => SourcePlan {
                    source: source.id.clone(),
                    watermark: None,
                    batches: Vec::new(),
                    error: Some(e.to_string()),
                },
            };
            sources.push(entry);
        }

        Ok(RunPlan {
            override_run,
            sources,
        })
    }

    /// Checkpoint state of every configured source.
    pub async fn status(&self) -> Result<StatusReport, PipelineError> {
        let mut session = RemoteSession::new(self.connector);
        let loaded = match session.store().await {
            Ok(store) => CheckpointStore::load(store, &self.config.checkpoint).await,
            Err(e) => Err(e.into()),
        };
        session.close().await;
        let checkpoint = loaded?;

        let mut report = StatusReport::default();
        for source in &self.config.sources {
            match checkpoint.load_record(&source.id) {
                Ok(record) => {
                    if report.last_run_date.is_none() {
                        report.last_run_date = record.last_run_date.clone();
                        report.last_run_time = record.last_run_time.clone();
                    }
                    report.sources.push(SourceStatus {
                        source: source.id.clone(),
                        watermark: Some(record.last_processed_batch),
                        override_queue: record.override_queue,
                        error: None,
                    });
                }
                Err(e) => report.sources.push(SourceStatus {
                    source: source.id.clone(),
                    watermark: None,
                    override_queue: Vec::new(),
                    error: Some(e.to_string()),
                }),
            }
        }
        Ok(report)
    }
}

/// Record a batch-level failure, or pass it on if it ends the whole source.
fn batch_failed(
    err: PipelineError,
    source: &SourceConfig,
    batch: &str,
    failed: &mut BTreeSet<String>,
    failures: &mut Vec<RunFailure>,
) -> Result<(), PipelineError> {
    if err.is_source_fatal() {
        return Err(err);
    }
    warn!(source = %source.id, batch, error = %err, "batch failed");
    failures.push(RunFailure {
        source: source.id.clone(),
        batch: Some(batch.to_string()),
        reason: err.to_string(),
    });
    failed.insert(batch.to_string());
    Ok(())
}

// ============ Dry run and status ============

#[derive(Debug, Clone)]
pub struct SourcePlan {
    pub source: String,
    pub watermark: Option<String>,
    pub batches: Vec<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RunPlan {
    pub override_run: bool,
    pub sources: Vec<SourcePlan>,
}

impl RunPlan {
    pub fn render(&self) -> String {
        let mut out = format!(
            "Run mode: {}\n\n",
            if self.override_run { "override" } else { "normal" }
        );
        out.push_str(&format!("{:<16} {:<12} {}\n", "SOURCE", "WATERMARK", "BATCHES"));
        for plan in &self.sources {
            let detail = match &plan.error {
                Some(e) => format!("error: {}", e),
                None if plan.batches.is_empty() => "(none)".to_string(),
                None => plan.batches.join(", "),
            };
            out.push_str(&format!(
                "{:<16} {:<12} {}\n",
                plan.source,
                plan.watermark.as_deref().unwrap_or("-"),
                detail
            ));
        }
        out
    }
}

#[derive(Debug, Clone)]
pub struct SourceStatus {
    pub source: String,
    pub watermark: Option<String>,
    pub override_queue: Vec<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct StatusReport {
    pub last_run_date: Option<String>,
    pub last_run_time: Option<String>,
    pub sources: Vec<SourceStatus>,
}

impl StatusReport {
    pub fn render(&self) -> String {
        let last_run = match (&self.last_run_date, &self.last_run_time) {
            (Some(date), Some(time)) => format!("{} {}", date, time),
            (Some(date), None) => date.clone(),
            _ => "never".to_string(),
        };
        let mut out = format!("Last run: {}\n\n", last_run);
        out.push_str(&format!("{:<16} {:<12} {}\n", "SOURCE", "WATERMARK", "OVERRIDE QUEUE"));
        for status in &self.sources {
            let queue = match &status.error {
                Some(e) => format!("error: {}", e),
                None if status.override_queue.is_empty() => "-".to_string(),
                None => status.override_queue.join(", "),
            };
            out.push_str(&format!(
                "{:<16} {:<12} {}\n",
                status.source,
                status.watermark.as_deref().unwrap_or("-"),
                queue
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_render_shows_mode_and_errors() {
        let plan = RunPlan {
            override_run: true,
            sources: vec![
                SourcePlan {
                    source: "CAM1".into(),
                    watermark: Some("20250101".into()),
                    batches: vec!["20241215".into(), "20241216".into()],
                    error: None,
                },
                SourcePlan {
                    source: "CAM2".into(),
                    watermark: None,
                    batches: Vec::new(),
                    error: Some("not found: checkpoint record for source 'CAM2'".into()),
                },
            ],
        };
        let text = plan.render();
        assert!(text.starts_with("Run mode: override\n"));
        assert!(text.contains("20241215, 20241216"));
        assert!(text.contains("error: not found"));
    }

    #[test]
    fn status_render_defaults() {
        let status = StatusReport {
            last_run_date: None,
            last_run_time: None,
            sources: vec![SourceStatus {
                source: "CAM1".into(),
                watermark: Some("20250101".into()),
                override_queue: Vec::new(),
                error: None,
            }],
        };
        let text = status.render();
        assert!(text.starts_with("Last run: never\n"));
        assert!(text.contains("CAM1"));
        assert!(text.lines().last().unwrap().ends_with('-'));
    }
}
