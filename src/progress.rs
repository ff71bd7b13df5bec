//! Run progress reporting.
//!
//! Reports observable progress during `sieve run` so operators can see which
//! source and batch is being worked on and how far classification has got.
//! Progress is emitted on **stderr** so stdout stays reserved for the report.

use std::io::Write;

/// Phase of a source's processing.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RunPhase {
    Discovering,
    Sequencing,
    Staging,
    Classifying,
    Publishing,
}

impl RunPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunPhase::Discovering => "discovering",
            RunPhase::Sequencing => "sequencing",
            RunPhase::Staging => "staging",
            RunPhase::Classifying => "classifying",
            RunPhase::Publishing => "publishing",
        }
    }
}

/// A single progress event.
#[derive(Clone, Debug)]
pub struct ProgressEvent {
    pub source: String,
    pub batch: Option<String>,
    pub phase: RunPhase,
    /// `(n, total)` file counts, when the phase has them.
    pub files: Option<(u64, u64)>,
}

impl ProgressEvent {
    pub fn phase(source: &str, batch: Option<&str>, phase: RunPhase) -> Self {
        Self {
            source: source.to_string(),
            batch: batch.map(|b| b.to_string()),
            phase,
            files: None,
        }
    }

    pub fn files(source: &str, batch: &str, phase: RunPhase, n: u64, total: u64) -> Self {
        Self {
            source: source.to_string(),
            batch: Some(batch.to_string()),
            phase,
            files: Some((n, total)),
        }
    }
}

/// Reports run progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: "CAM1/20250102  classifying  12 / 1,240 files".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let target = match &event.batch {
            Some(batch) => format!("{}/{}", event.source, batch),
            None => event.source.clone(),
        };
        let line = match event.files {
            Some((n, total)) => format!(
                "{}  {}  {} / {} files\n",
                target,
                event.phase.as_str(),
                format_number(n),
                format_number(total)
            ),
            None => format!("{}  {}...\n", target, event.phase.as_str()),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let mut obj = serde_json::json!({
            "event": "progress",
            "source": event.source,
            "phase": event.phase.as_str(),
        });
        if let Some(batch) = &event.batch {
            obj["batch"] = serde_json::json!(batch);
        }
        if let Some((n, total)) = event.files {
            obj["n"] = serde_json::json!(n);
            obj["total"] = serde_json::json!(total);
        }
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Parse a `--progress` value. `auto` picks human output when stderr is
    /// a TTY, otherwise off.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "auto" => Some(Self::default_for_tty()),
            "human" => Some(ProgressMode::Human),
            "json" => Some(ProgressMode::Json),
            "off" => Some(ProgressMode::Off),
            _ => None,
        }
    }

    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
