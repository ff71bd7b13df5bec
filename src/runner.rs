//! Classification of a staged batch.
//!
//! Every file in the batch's `raw` subarea is sent to the classifier once,
//! paced by a [`Pacer`], and copied into `matched` or `unmatched` according
//! to its [`Verdict`]. The raw copy stays where it is.
//!
//! A failing file (unreadable payload, service error, timeout, failed copy)
//! is counted and skipped; it never stops the batch. Once the batch is done
//! the verdict log is written into `matched`, so it is published alongside
//! the images it explains.
//!
//! For a batch with `errors == 0`, `matched + unmatched == raw`; otherwise the
//! shortfall is exactly `errors`.

use std::path::Path;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::classify::{Classifier, ImagePayload, VerdictRules};
use crate::error::{ClassifierError, PipelineError};
use crate::models::{RunCounters, Verdict, VerdictRecord};
use crate::pacing::Pacer;
use crate::progress::{ProgressEvent, ProgressReporter, RunPhase};
use crate::stage::{list_files, StageHandle};

/// Name of the per-batch verdict log inside the `matched` subarea.
pub fn verdict_log_name(batch: &str) -> String {
    format!("verdicts_{}.txt", batch)
}

/// Outcome of classifying one batch.
#[derive(Debug, Clone, Default)]
pub struct BatchClassification {
    /// Files copied into `matched`.
    pub matched: u64,
    /// Files copied into `unmatched`, undetermined ones included.
    pub unmatched: u64,
    /// The subset of `unmatched` whose answer carried neither token.
    pub undetermined: u64,
    pub errors: u64,
    pub records: Vec<VerdictRecord>,
}

pub struct ClassificationRunner<'a> {
    classifier: &'a dyn Classifier,
    rules: VerdictRules,
    prompt: String,
    timeout: Duration,
    pacer: Pacer,
    progress: &'a dyn ProgressReporter,
}

impl<'a> ClassificationRunner<'a> {
    pub fn new(
        classifier: &'a dyn Classifier,
        rules: VerdictRules,
        prompt: impl Into<String>,
        timeout: Duration,
        pacer: Pacer,
        progress: &'a dyn ProgressReporter,
    ) -> Self {
        Self {
            classifier,
            rules,
            prompt: prompt.into(),
            timeout,
            pacer,
            progress,
        }
    }

    /// Classify every raw file of `handle` and record the batch's error count.
    ///
    /// Only a failure to read the `raw` subarea itself is returned as an error.
    pub async fn classify_batch(
        &mut self,
        handle: &StageHandle,
        counters: &mut RunCounters,
    ) -> Result<BatchClassification, PipelineError> {
        let files = list_files(&handle.raw).await.map_err(|e| PipelineError::Stage {
            path: handle.raw.clone(),
            source: e,
        })?;
        let total = files.len() as u64;
        let mut outcome = BatchClassification::default();

        for (i, path) in files.iter().enumerate() {
            self.pacer.acquire().await;

            match self.classify_file(handle, path).await {
                Ok(record) => {
                    debug!(
                        source = %handle.source,
                        batch = %handle.batch,
                        file = %record.file_name,
                        verdict = %record.verdict,
                        "classified"
                    );
                    if record.verdict.is_match() {
                        outcome.matched += 1;
                    } else {
                        outcome.unmatched += 1;
                        if record.verdict == Verdict::Undetermined {
                            outcome.undetermined += 1;
                        }
                    }
                    outcome.records.push(record);
                }
                Err(e) => {
                    outcome.errors += 1;
                    warn!(source = %handle.source, batch = %handle.batch, error = %e, "file skipped");
                }
            }

            self.progress.report(ProgressEvent::files(
                &handle.source,
                &handle.batch,
                RunPhase::Classifying,
                i as u64 + 1,
                total,
            ));
        }

        let log_path = handle.matched.join(verdict_log_name(&handle.batch));
        if let Err(e) = write_verdict_log(&log_path, &outcome.records).await {
            warn!(path = %log_path.display(), error = %e, "could not write verdict log");
        }

        counters.record_errors(&handle.source, &handle.batch, outcome.errors);
        info!(
            source = %handle.source,
            batch = %handle.batch,
            model = self.classifier.model_name(),
            matched = outcome.matched,
            unmatched = outcome.unmatched,
            undetermined = outcome.undetermined,
            errors = outcome.errors,
            "batch classified"
        );
        Ok(outcome)
    }

    async fn classify_file(
        &self,
        handle: &StageHandle,
        path: &Path,
    ) -> Result<VerdictRecord, PipelineError> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let fail = |reason: String| PipelineError::Classification {
            file: file_name.clone(),
            reason,
        };

        let payload = ImagePayload::open(path)
            .await
            .map_err(|e| fail(e.to_string()))?;

        let response = match tokio::time::timeout(
            self.timeout,
            self.classifier.classify(&payload, &self.prompt),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ClassifierError::Timeout(self.timeout.as_secs())),
        }
        .map_err(|e| fail(e.to_string()))?;
        drop(payload);

        let verdict = self.rules.interpret(&response);
        let dest_dir = if verdict.is_match() {
            &handle.matched
        } else {
            &handle.unmatched
        };
        tokio::fs::copy(path, dest_dir.join(&file_name))
            .await
            .map_err(|e| fail(format!("copy to {}: {}", dest_dir.display(), e)))?;

        Ok(VerdictRecord {
            file_name: file_name.clone(),
            verdict,
            response,
        })
    }
}

async fn write_verdict_log(path: &Path, records: &[VerdictRecord]) -> std::io::Result<()> {
    let mut body = String::new();
    for record in records {
        body.push_str(&record.to_line());
        body.push('\n');
    }
    tokio::fs::write(path, body).await
}
