//! Classification service abstraction.
//!
//! The pipeline depends on a single call, [`Classifier::classify`], taking an
//! image payload and a prompt and returning the service's free-text answer.
//! Adapters hide whatever protocol the service speaks; the runner never
//! probes for optional capabilities.
//!
//! Answers are turned into a [`Verdict`] by [`VerdictRules`]: the negative
//! token wins, then the positive token, and anything else is undetermined.
//! Matching is case-sensitive substring containment.
//!
//! # Providers
//!
//! | `classifier.provider` | Adapter |
//! |-----------------------|---------|
//! | `gemini` | [`GeminiClassifier`] |

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use base64::Engine;

use crate::config::ClassifierConfig;
use crate::error::ClassifierError;
use crate::models::Verdict;

const GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com";

/// Image bytes plus the MIME type the service should be told about.
#[derive(Debug, Clone)]
pub struct ImagePayload {
    pub bytes: Vec<u8>,
    pub mime_type: &'static str,
}

impl ImagePayload {
    /// Read an image file from the stage. Empty files are rejected.
    pub async fn open(path: &Path) -> std::io::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        if bytes.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("{} is empty", path.display()),
            ));
        }
        Ok(Self {
            bytes,
            mime_type: mime_for(path),
        })
    }
}

fn mime_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "heic" => "image/heic",
        "heif" => "image/heif",
        _ => "image/jpeg",
    }
}

/// A classification service.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Short identifier for logs (e.g. `"gemini-1.5-flash"`).
    fn model_name(&self) -> &str;

    /// Ask the service `prompt` about `image` and return its answer text.
    async fn classify(&self, image: &ImagePayload, prompt: &str) -> Result<String, ClassifierError>;
}

/// Token rules mapping an answer to a [`Verdict`].
#[derive(Debug, Clone)]
pub struct VerdictRules {
    pub positive_token: String,
    pub negative_token: String,
}

impl VerdictRules {
    pub fn from_config(config: &ClassifierConfig) -> Self {
        Self {
            positive_token: config.positive_token.clone(),
            negative_token: config.negative_token.clone(),
        }
    }

    pub fn interpret(&self, response: &str) -> Verdict {
        if response.contains(&self.negative_token) {
            Verdict::Unmatched
        } else if response.contains(&self.positive_token) {
            Verdict::Matched
        } else {
            Verdict::Undetermined
        }
    }
}

/// Build the configured classifier. `api_key` is resolved by the caller.
pub fn create_classifier(config: &ClassifierConfig, api_key: String) -> Result<Box<dyn Classifier>> {
    match config.provider.as_str() {
        "gemini" => Ok(Box::new(GeminiClassifier::new(config, api_key)?)),
        other => bail!("Unknown classifier provider: {}", other),
    }
}

// ============ Gemini ============

/// Classifier backed by the Gemini `generateContent` REST endpoint.
///
/// The image travels inline as base64 next to the prompt. Each call is a
/// single attempt: retrying is left to the next run, where the file is
/// staged and classified again.
pub struct GeminiClassifier {
    model: String,
    endpoint: String,
    api_key: String,
    client: reqwest::Client,
}

impl GeminiClassifier {
    pub fn new(config: &ClassifierConfig, api_key: String) -> Result<Self> {
        if api_key.trim().is_empty() {
            bail!("Gemini API key is empty");
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model: config.model.clone(),
            endpoint: config
                .endpoint
                .clone()
                .unwrap_or_else(|| GEMINI_ENDPOINT.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
            client,
        })
    }

    fn url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.endpoint, self.model
        )
    }
}

fn request_body(image: &ImagePayload, prompt: &str) -> serde_json::Value {
    let data = base64::engine::general_purpose::STANDARD.encode(&image.bytes);
    serde_json::json!({
        "contents": [{
            "parts": [
                { "text": prompt },
                { "inline_data": { "mime_type": image.mime_type, "data": data } }
            ]
        }]
    })
}

/// Concatenate the text parts of the first candidate.
fn parse_gemini_response(json: &serde_json::Value) -> Result<String, ClassifierError> {
    let parts = json
        .get("candidates")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("content"))
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.as_array())
        .ok_or_else(|| {
            let reason = json
                .get("promptFeedback")
                .and_then(|f| f.get("blockReason"))
                .and_then(|r| r.as_str())
                .unwrap_or("no candidates in response");
            ClassifierError::Parse(reason.to_string())
        })?;

    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect();

    if text.is_empty() {
        return Err(ClassifierError::Parse("candidate has no text".to_string()));
    }
    Ok(text)
}

#[async_trait]
impl Classifier for GeminiClassifier {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn classify(&self, image: &ImagePayload, prompt: &str) -> Result<String, ClassifierError> {
        let response = self
            .client
            .post(self.url())
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&request_body(image, prompt))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let json: serde_json::Value = response
                .json()
                .await
                .map_err(|e| ClassifierError::Parse(e.to_string()))?;
            return parse_gemini_response(&json);
        }

        let body = response.text().await.unwrap_or_default();
        if status.as_u16() == 429 {
            Err(ClassifierError::Quota {
                status: status.as_u16(),
                body,
            })
        } else if status.is_server_error() {
            Err(ClassifierError::Transport(format!(
                "Gemini API error {}: {}",
                status, body
            )))
        } else {
            Err(ClassifierError::Rejected {
                status: status.as_u16(),
                body,
            })
        }
    }
}
