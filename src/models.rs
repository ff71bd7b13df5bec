//! Core data types shared by the pipeline stages.

use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

/// Separator between the batch key and the sequence index in a canonical
/// raw file name (`{batch}_{index:04}.{ext}`).
pub const SEQUENCE_SEPARATOR: char = '_';

/// A raw file observed in a batch's remote listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFileEntry {
    /// File name within the batch's raw directory.
    pub name: String,
    /// Modification time as reported by the remote store.
    pub modified: SystemTime,
}

/// Classification outcome for one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    Matched,
    Unmatched,
    /// Neither token was present; routed to `unmatched` but logged apart.
    Undetermined,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Matched => "matched",
            Verdict::Unmatched => "unmatched",
            Verdict::Undetermined => "undetermined",
        }
    }

    /// Whether the file is copied into the `matched` stage subarea.
    pub fn is_match(&self) -> bool {
        matches!(self, Verdict::Matched)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of a batch's verdict log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerdictRecord {
    pub file_name: String,
    pub verdict: Verdict,
    pub response: String,
}

impl VerdictRecord {
    /// Render as a single log line; embedded newlines in the service
    /// response are flattened so each record stays on one line.
    pub fn to_line(&self) -> String {
        let response = self
            .response
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        format!("{} | {} | {}", self.file_name, self.verdict, response)
    }
}

/// Per-batch tallies surfaced in the run report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchCounts {
    pub raw: u64,
    pub matched: u64,
    pub errors: u64,
}

/// Run-wide counters keyed by `(source, batch)`.
///
/// Iteration order is sorted by source id then batch key, which is the order
/// the report prints them in.
#[derive(Debug, Clone, Default)]
pub struct RunCounters {
    entries: BTreeMap<(String, String), BatchCounts>,
}

impl RunCounters {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&mut self, source: &str, batch: &str) -> &mut BatchCounts {
        self.entries
            .entry((source.to_string(), batch.to_string()))
            .or_default()
    }

    pub fn record_raw(&mut self, source: &str, batch: &str, count: u64) {
        self.entry(source, batch).raw = count;
    }

    pub fn record_matched(&mut self, source: &str, batch: &str, count: u64) {
        self.entry(source, batch).matched = count;
    }

    pub fn record_errors(&mut self, source: &str, batch: &str, count: u64) {
        self.entry(source, batch).errors = count;
    }

    pub fn get(&self, source: &str, batch: &str) -> Option<BatchCounts> {
        self.entries
            .get(&(source.to_string(), batch.to_string()))
            .copied()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &BatchCounts)> {
        self.entries
            .iter()
            .map(|((source, batch), counts)| (source.as_str(), batch.as_str(), counts))
    }
}

/// Join remote path segments with `/`, ignoring empty segments and
/// redundant separators.
pub fn remote_join(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_line_flattens_newlines() {
        let record = VerdictRecord {
            file_name: "20250102_0001.jpg".into(),
            verdict: Verdict::Undetermined,
            response: "It is hard\nto say.\n".into(),
        };
        assert_eq!(
            record.to_line(),
            "20250102_0001.jpg | undetermined | It is hard to say."
        );
    }

    #[test]
    fn counters_iterate_sorted() {
        let mut counters = RunCounters::new();
        counters.record_raw("CAM2", "20250102", 4);
        counters.record_raw("CAM1", "20250103", 2);
        counters.record_raw("CAM1", "20250102", 7);
        counters.record_errors("CAM1", "20250102", 3);
        counters.record_errors("CAM1", "20250102", 1);

        let keys: Vec<_> = counters.iter().map(|(s, b, _)| (s, b)).collect();
        assert_eq!(
            keys,
            vec![
                ("CAM1", "20250102"),
                ("CAM1", "20250103"),
                ("CAM2", "20250102")
            ]
        );
        // A re-recorded batch replaces its counts rather than adding to them.
        assert_eq!(counters.get("CAM1", "20250102").unwrap().errors, 1);
    }

    #[test]
    fn remote_join_normalises_slashes() {
        assert_eq!(remote_join(&["CAM1/", "/20250101", "images"]), "CAM1/20250101/images");
        assert_eq!(remote_join(&["", "Logs", "ctrl.json"]), "Logs/ctrl.json");
    }
}
