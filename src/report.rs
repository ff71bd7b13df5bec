//! Run report: rendering and delivery.
//!
//! The report is plain text, grouped by source then batch, with counts
//! zero-padded to four digits:
//!
//! ```text
//! SHELDUCK IMAGE FILTER REPORT FOR 02/01/2025
//!
//! Process Run Date    : 02/01/2025
//! Process Start Time  : 21:04:11
//! Process End Time    : 21:19:40
//! Process Run Time    : 0:15:29
//!
//!  BATCHES UNDER CAM1
//!  ~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~
//!     Batch                      : 20250101
//!         Total Raw Images       : 0042
//!         Total Filtered Images  : 0003
//!         Total Classifier Errors: 0000
//! ```
//!
//! Override runs get an `OVERRIDE SPECIAL RUN - ` prefix on the header line.
//! Delivery goes through a [`ReportSink`] and is best effort: at most one
//! attempt, failures logged by the caller.

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::DateTime;
use chrono_tz::Tz;
use tracing::info;

use crate::config::ReportConfig;
use crate::models::{remote_join, RunCounters};
use crate::remote::{RemoteConnector, RemoteSession};

const RULE: &str = "~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~";

/// A source or batch level failure surfaced in the report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunFailure {
    pub source: String,
    /// `None` when the whole source was abandoned.
    pub batch: Option<String>,
    pub reason: String,
}

/// Everything a report is built from.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: String,
    pub override_run: bool,
    pub started: DateTime<Tz>,
    pub finished: DateTime<Tz>,
    pub counters: RunCounters,
    pub failures: Vec<RunFailure>,
    /// Sources whose checkpoint was committed this run.
    pub committed: Vec<String>,
}

/// A rendered report ready for delivery.
#[derive(Debug, Clone)]
pub struct RenderedReport {
    pub subject: String,
    pub body: String,
    pub file_name: String,
    pub override_run: bool,
}

/// `H:MM:SS`, hours unpadded. Negative spans render as zero.
pub fn format_elapsed(seconds: i64) -> String {
    let s = seconds.max(0);
    format!("{}:{:02}:{:02}", s / 3600, (s % 3600) / 60, s % 60)
}

pub fn render_report(title: &str, summary: &RunSummary) -> RenderedReport {
    let run_date = summary.started.format("%d/%m/%Y").to_string();
    let mut body = String::new();

    if summary.override_run {
        body.push_str("OVERRIDE SPECIAL RUN - ");
    }
    body.push_str(&format!("{} FOR {}\n\n", title, run_date));
    body.push_str(&format!("Process Run Date    : {}\n", run_date));
    body.push_str(&format!(
        "Process Start Time  : {}\n",
        summary.started.format("%H:%M:%S")
    ));
    body.push_str(&format!(
        "Process End Time    : {}\n",
        summary.finished.format("%H:%M:%S")
    ));
    let elapsed = (summary.finished - summary.started).num_seconds();
    body.push_str(&format!("Process Run Time    : {}\n", format_elapsed(elapsed)));
    body.push_str(&format!("Process Run ID      : {}\n", summary.run_id));

    if summary.counters.is_empty() {
        let banner = "!NO BATCHES WERE ELIGIBLE TO BE PROCESSED FOR TODAY!";
        let edge = format!("!{}!", "~".repeat(banner.len() - 2));
        body.push_str(&format!("\n{}\n{}\n{}\n", edge, banner, edge));
    } else {
        let mut current: Option<&str> = None;
        for (source, batch, counts) in summary.counters.iter() {
            if current != Some(source) {
                body.push_str(&format!("\n BATCHES UNDER {}\n {}\n", source, RULE));
                current = Some(source);
            }
            body.push_str(&format!("    Batch                      : {}\n", batch));
            body.push_str(&format!("        Total Raw Images       : {:04}\n", counts.raw));
            body.push_str(&format!("        Total Filtered Images  : {:04}\n", counts.matched));
            body.push_str(&format!("        Total Classifier Errors: {:04}\n", counts.errors));
        }
    }

    if !summary.failures.is_empty() {
        body.push_str(&format!("\n FAILURES\n {}\n", RULE));
        for failure in &summary.failures {
            let target = match &failure.batch {
                Some(batch) => format!("{}/{}", failure.source, batch),
                None => failure.source.clone(),
            };
            body.push_str(&format!("    {:<27}: {}\n", target, failure.reason));
        }
    }

    let subject = if summary.override_run {
        format!("{} OVERRIDE - {}", title, run_date)
    } else {
        format!("{} - {}", title, run_date)
    };

    RenderedReport {
        subject,
        body,
        file_name: format!("report_{}.txt", summary.started.format("%Y%m%d")),
        override_run: summary.override_run,
    }
}

/// Destination for a finished report.
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn deliver(&self, report: &RenderedReport) -> Result<()>;
}

/// Writes the report into `report.local_dir` and, when enabled, uploads it to
/// `report.remote_dir` over a fresh remote connection.
pub struct FileReportSink<'a> {
    local_dir: PathBuf,
    remote_dir: String,
    upload: bool,
    connector: &'a dyn RemoteConnector,
}

impl<'a> FileReportSink<'a> {
    pub fn new(config: &ReportConfig, connector: &'a dyn RemoteConnector) -> Self {
        Self {
            local_dir: config.local_dir.clone(),
            remote_dir: config.remote_dir.clone(),
            upload: config.upload,
            connector,
        }
    }
}

#[async_trait]
impl ReportSink for FileReportSink<'_> {
    async fn deliver(&self, report: &RenderedReport) -> Result<()> {
        tokio::fs::create_dir_all(&self.local_dir)
            .await
            .with_context(|| format!("Failed to create {}", self.local_dir.display()))?;
        let local = self.local_dir.join(&report.file_name);
        tokio::fs::write(&local, &report.body)
            .await
            .with_context(|| format!("Failed to write {}", local.display()))?;
        info!(path = %local.display(), "report written");

        if !self.upload {
            return Ok(());
        }

        let remote = remote_join(&[&self.remote_dir, &report.file_name]);
        let mut session = RemoteSession::new(self.connector);
        let result = match session.store().await {
            Ok(store) => store.put(&local, &remote).await,
            Err(e) => Err(e),
        };
        session.close().await;
        result.with_context(|| format!("Failed to upload report to {}", remote))?;
        info!(remote = %remote, "report uploaded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote_fs::FsConnector;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Tz> {
        chrono_tz::Europe::London
            .with_ymd_and_hms(2025, 1, 2, h, m, s)
            .unwrap()
    }

    fn summary(counters: RunCounters, override_run: bool) -> RunSummary {
        RunSummary {
            run_id: "2f1c0d9e".into(),
            override_run,
            started: at(21, 4, 11),
            finished: at(22, 19, 40),
            counters,
            failures: Vec::new(),
            committed: Vec::new(),
        }
    }

    #[test]
    fn elapsed_formatting() {
        assert_eq!(format_elapsed(0), "0:00:00");
        assert_eq!(format_elapsed(929), "0:15:29");
        assert_eq!(format_elapsed(4529), "1:15:29");
        assert_eq!(format_elapsed(-5), "0:00:00");
    }

    #[test]
    fn groups_by_source_with_padded_counts() {
        let mut counters = RunCounters::new();
        counters.record_raw("CAM2", "20250101", 52);
        counters.record_matched("CAM2", "20250101", 22);
        counters.record_raw("CAM1", "20250101", 7);
        counters.record_errors("CAM1", "20250101", 1);

        let report = render_report("SHELDUCK IMAGE FILTER REPORT", &summary(counters, false));
        let body = &report.body;

        assert!(body.starts_with("SHELDUCK IMAGE FILTER REPORT FOR 02/01/2025\n"));
        assert!(body.contains("Process Run Time    : 1:15:29\n"));
        assert!(body.contains("Process Run ID      : 2f1c0d9e\n"));
        assert!(body.contains("        Total Raw Images       : 0052\n"));
        assert!(body.contains("        Total Classifier Errors: 0001\n"));
        let cam1 = body.find("BATCHES UNDER CAM1").unwrap();
        let cam2 = body.find("BATCHES UNDER CAM2").unwrap();
        assert!(cam1 < cam2);
        assert_eq!(report.file_name, "report_20250102.txt");
        assert!(!body.contains("FAILURES"));
    }

    #[test]
    fn override_header_and_empty_banner() {
        let report = render_report("T", &summary(RunCounters::new(), true));
        assert!(report.body.starts_with("OVERRIDE SPECIAL RUN - T FOR 02/01/2025"));
        assert!(report.body.contains("!NO BATCHES WERE ELIGIBLE TO BE PROCESSED FOR TODAY!"));
        assert!(report.subject.contains("OVERRIDE"));
    }

    #[test]
    fn failures_are_listed() {
        let mut s = summary(RunCounters::new(), false);
        s.failures.push(RunFailure {
            source: "CAM2".into(),
            batch: None,
            reason: "connection error: refused".into(),
        });
        s.failures.push(RunFailure {
            source: "CAM1".into(),
            batch: Some("20250101".into()),
            reason: "download failed".into(),
        });
        let body = render_report("T", &s).body;
        assert!(body.contains(" FAILURES\n"));
        assert!(body.contains("CAM2"));
        assert!(body.contains("CAM1/20250101"));
    }

    #[tokio::test]
    async fn file_sink_writes_and_uploads() {
        let tmp = TempDir::new().unwrap();
        let remote_root = tmp.path().join("remote");
        std::fs::create_dir_all(remote_root.join("Logs")).unwrap();
        let connector = FsConnector::new(&remote_root);
        let config = ReportConfig {
            title: "T".into(),
            timezone: "Europe/London".into(),
            local_dir: tmp.path().join("reports"),
            remote_dir: "Logs".into(),
            upload: true,
        };

        let report = render_report("T", &summary(RunCounters::new(), false));
        FileReportSink::new(&config, &connector)
            .deliver(&report)
            .await
            .unwrap();

        let local = std::fs::read_to_string(tmp.path().join("reports/report_20250102.txt")).unwrap();
        assert_eq!(local, report.body);
        assert!(remote_root.join("Logs/report_20250102.txt").exists());
    }

    #[tokio::test]
    async fn upload_failure_is_reported_not_panicked() {
        let tmp = TempDir::new().unwrap();
        let connector = FsConnector::new(tmp.path().join("missing-remote"));
        let config = ReportConfig {
            title: "T".into(),
            timezone: "Europe/London".into(),
            local_dir: tmp.path().join("reports"),
            remote_dir: "Logs".into(),
            upload: true,
        };
        let report = render_report("T", &summary(RunCounters::new(), false));
        let result = FileReportSink::new(&config, &connector).deliver(&report).await;
        assert!(result.is_err());
        assert!(tmp.path().join("reports/report_20250102.txt").exists());
    }
}
