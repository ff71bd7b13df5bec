//! TOML configuration.
//!
//! Every path, prompt, token, and rate used by the pipeline lives here and is
//! handed to components at construction time.
//!
//! ```toml
//! [remote]
//! kind = "filesystem"
//! root = "/mnt/adrive"
//!
//! [[sources]]
//! id = "CAM1"
//! root = "SSAK-245923-BAAEC-CAM1"
//!
//! [stage]
//! root = "./stage"
//!
//! [classifier]
//! provider = "gemini"
//! model = "gemini-1.5-flash"
//! prompt = "Is there a shelduck in this image?"
//! calls_per_minute = 15
//!
//! [report]
//! title = "SHELDUCK IMAGE FILTER REPORT"
//! local_dir = "./reports"
//! ```

use anyhow::{bail, Context, Result};
use chrono_tz::Tz;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub remote: RemoteConfig,
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub layout: LayoutConfig,
    pub stage: StageConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    pub classifier: ClassifierConfig,
    pub report: ReportConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RemoteConfig {
    #[serde(default = "default_remote_kind")]
    pub kind: String,
    pub root: PathBuf,
}

fn default_remote_kind() -> String {
    "filesystem".to_string()
}

/// One capture feed. `id` keys the checkpoint record; `root` is the feed's
/// directory on the remote store.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct SourceConfig {
    pub id: String,
    pub root: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LayoutConfig {
    #[serde(default = "default_raw_subdir")]
    pub raw_subdir: String,
    #[serde(default = "default_filtered_subdir")]
    pub filtered_subdir: String,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default = "default_extension")]
    pub default_extension: String,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            raw_subdir: default_raw_subdir(),
            filtered_subdir: default_filtered_subdir(),
            include_globs: default_include_globs(),
            default_extension: default_extension(),
        }
    }
}

fn default_raw_subdir() -> String {
    "images".to_string()
}
fn default_filtered_subdir() -> String {
    "FILTERED IMAGES".to_string()
}
fn default_include_globs() -> Vec<String> {
    vec!["*".to_string()]
}
fn default_extension() -> String {
    "jpg".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct StageConfig {
    pub root: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CheckpointConfig {
    #[serde(default = "default_checkpoint_remote")]
    pub remote_path: String,
    #[serde(default = "default_checkpoint_local")]
    pub local_path: PathBuf,
    #[serde(default)]
    pub sort_override_batches: bool,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            remote_path: default_checkpoint_remote(),
            local_path: default_checkpoint_local(),
            sort_override_batches: false,
        }
    }
}

fn default_checkpoint_remote() -> String {
    "Logs/ctrl_data.json".to_string()
}
fn default_checkpoint_local() -> PathBuf {
    PathBuf::from("./ctrl_data.json")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClassifierConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub prompt: String,
    #[serde(default = "default_positive_token")]
    pub positive_token: String,
    #[serde(default = "default_negative_token")]
    pub negative_token: String,
    #[serde(default = "default_calls_per_minute")]
    pub calls_per_minute: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub endpoint: Option<String>,
}

fn default_provider() -> String {
    "gemini".to_string()
}
fn default_model() -> String {
    "gemini-1.5-flash".to_string()
}
fn default_positive_token() -> String {
    "Yes".to_string()
}
fn default_negative_token() -> String {
    "No".to_string()
}
fn default_calls_per_minute() -> u32 {
    15
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}

impl ClassifierConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Resolve the API key from the configured environment variable.
    ///
    /// This is the only place the process environment is consulted; the
    /// resulting key is passed to the adapter explicitly.
    pub fn resolve_api_key(&self) -> Result<String> {
        std::env::var(&self.api_key_env)
            .with_context(|| format!("{} environment variable not set", self.api_key_env))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReportConfig {
    #[serde(default = "default_report_title")]
    pub title: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    pub local_dir: PathBuf,
    #[serde(default = "default_report_remote_dir")]
    pub remote_dir: String,
    #[serde(default = "default_upload")]
    pub upload: bool,
}

fn default_report_title() -> String {
    "IMAGE FILTER REPORT".to_string()
}
fn default_timezone() -> String {
    "Europe/London".to_string()
}
fn default_report_remote_dir() -> String {
    "Logs".to_string()
}
fn default_upload() -> bool {
    true
}

impl ReportConfig {
    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| anyhow::anyhow!("invalid report.timezone '{}': {}", self.timezone, e))
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    match config.remote.kind.as_str() {
        "filesystem" => {}
        other => bail!("Unknown remote kind: '{}'. Must be filesystem.", other),
    }

    if config.sources.is_empty() {
        bail!("at least one [[sources]] entry is required");
    }
    let mut seen = HashSet::new();
    for source in &config.sources {
        if source.id.trim().is_empty() {
            bail!("sources.id must not be empty");
        }
        if source.root.trim().is_empty() {
            bail!("sources.root must not be empty (source '{}')", source.id);
        }
        if !seen.insert(source.id.as_str()) {
            bail!("duplicate source id: '{}'", source.id);
        }
    }

    if config.layout.include_globs.is_empty() {
        bail!("layout.include_globs must contain at least one pattern");
    }

    if config.classifier.calls_per_minute == 0 {
        bail!("classifier.calls_per_minute must be > 0");
    }
    if config.classifier.timeout_secs == 0 {
        bail!("classifier.timeout_secs must be > 0");
    }
    if config.classifier.positive_token.is_empty() || config.classifier.negative_token.is_empty()
    {
        bail!("classifier tokens must not be empty");
    }
    if config.classifier.prompt.trim().is_empty() {
        bail!("classifier.prompt must not be empty");
    }

    match config.classifier.provider.as_str() {
        "gemini" => {}
        other => bail!("Unknown classifier provider: '{}'. Must be gemini.", other),
    }

    config.report.tz()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> &'static str {
        r#"
[remote]
root = "/mnt/remote"

[[sources]]
id = "CAM1"
root = "SSAK-CAM1"

[[sources]]
id = "CAM2"
root = "SSAM-CAM2"

[stage]
root = "/tmp/stage"

[classifier]
prompt = "Is there a shelduck in this image?"

[report]
local_dir = "/tmp/reports"
"#
    }

    #[test]
    fn defaults_are_applied() {
        let config: Config = toml::from_str(minimal()).unwrap();
        validate(&config).unwrap();
        assert_eq!(config.remote.kind, "filesystem");
        assert_eq!(config.layout.raw_subdir, "images");
        assert_eq!(config.layout.filtered_subdir, "FILTERED IMAGES");
        assert_eq!(config.checkpoint.remote_path, "Logs/ctrl_data.json");
        assert_eq!(config.classifier.calls_per_minute, 15);
        assert_eq!(config.classifier.negative_token, "No");
        assert_eq!(config.sources[1].id, "CAM2");
        assert_eq!(config.report.tz().unwrap(), chrono_tz::Europe::London);
    }

    #[test]
    fn duplicate_source_ids_rejected() {
        let raw = minimal().replace("id = \"CAM2\"", "id = \"CAM1\"");
        let config: Config = toml::from_str(&raw).unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn zero_rate_rejected() {
        let raw = minimal().replace(
            "prompt = \"Is there a shelduck in this image?\"",
            "prompt = \"p\"\ncalls_per_minute = 0",
        );
        let config: Config = toml::from_str(&raw).unwrap();
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("calls_per_minute"));
    }

    #[test]
    fn unknown_timezone_rejected() {
        let raw = minimal().replace(
            "local_dir = \"/tmp/reports\"",
            "local_dir = \"/tmp/reports\"\ntimezone = \"Mars/Olympus\"",
        );
        let config: Config = toml::from_str(&raw).unwrap();
        assert!(validate(&config).is_err());
    }
}
