use std::collections::hash_map::RandomState;
use std::fmt;
use std::hash::{BuildHasher, Hasher};
use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::model::{Confidence, InvalidConfidence, Label, UnknownLabel};

pub const DEFAULT_CLASSIFIER_URL: &str =
    "https://router.huggingface.co/hf-inference/models/facebook/bart-large-mnli";

#[derive(Clone)]
pub struct ClassifierConfig {
    pub url: String,
    pub access_token: String,
    pub default_timeout: Duration,
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub max_error_body_bytes: usize,
}

impl ClassifierConfig {
    /// Defaults: 30s timeout, no retries.
    pub fn new(url: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            access_token: access_token.into(),
            default_timeout: Duration::from_secs(30),
            max_retries: 0,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_millis(5_000),
            max_error_body_bytes: 8 * 1024,
        }
    }

    /// Read the optional tuning variables; the token is supplied by the caller.
    pub fn from_env(access_token: impl Into<String>) -> Self {
        let url = std::env::var("CLASSIFIER_URL")
            .unwrap_or_else(|_| DEFAULT_CLASSIFIER_URL.to_string());
        let mut config = Self::new(url.trim_end_matches('/'), access_token);

        if let Some(secs) = env_parse::<u64>("CLASSIFIER_TIMEOUT_SECS") {
            config.default_timeout = Duration::from_secs(secs);
        }
        if let Some(retries) = env_parse::<u32>("CLASSIFIER_MAX_RETRIES") {
            config.max_retries = retries;
        }
        if let Some(ms) = env_parse::<u64>("CLASSIFIER_RETRY_INITIAL_MS") {
            config.initial_backoff = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>("CLASSIFIER_RETRY_MAX_MS") {
            config.max_backoff = Duration::from_millis(ms);
        }
        if let Some(bytes) = env_parse::<usize>("CLASSIFIER_MAX_ERROR_BODY_BYTES") {
            config.max_error_body_bytes = bytes;
        }
        config
    }
}

// Keeps the bearer token out of logs.
impl fmt::Debug for ClassifierConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassifierConfig")
            .field("url", &self.url)
            .field("access_token", &"<redacted>")
            .field("default_timeout", &self.default_timeout)
            .field("max_retries", &self.max_retries)
            .field("initial_backoff", &self.initial_backoff)
            .field("max_backoff", &self.max_backoff)
            .field("max_error_body_bytes", &self.max_error_body_bytes)
            .finish()
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse::<T>().ok())
}

#[derive(Debug, thiserror::Error)]
pub enum ClassificationError {
    #[error("classifier request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("invalid classifier response JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("classifier returned error: status={status} message={message}")]
    Upstream {
        status: StatusCode,
        message: String,
        /// Hugging Face's `estimated_time` while a cold model loads.
        retry_after: Option<Duration>,
    },

    #[error("classifier returned non-JSON error: status={status} body={body}")]
    UpstreamBody { status: StatusCode, body: String },

    #[error("classifier returned no labels")]
    EmptyResult,

    #[error("classifier returned {0}")]
    UnknownLabel(#[from] UnknownLabel),

    #[error("classifier returned an invalid score: {0}")]
    InvalidScore(#[from] InvalidConfidence),
}

/// Top-ranked outcome for one `(action, guideline)` pair.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationResult {
    /// Upstream label, verbatim.
    pub label: String,
    pub score: f64,
    /// Echo of the prompt the model classified.
    pub sequence: String,
}

impl ClassificationResult {
    /// Convert into the persisted label and confidence.
    pub fn outcome(&self) -> Result<(Label, Confidence), ClassificationError> {
        let label = self.label.parse::<Label>()?;
        let confidence = Confidence::new(self.score)?;
        Ok((label, confidence))
    }
}

/// Client for a hosted zero-shot classification endpoint.
#[derive(Clone)]
pub struct ZeroShotClient {
    config: ClassifierConfig,
    http: reqwest::Client,
}

impl ZeroShotClient {
    pub fn new(config: ClassifierConfig) -> Result<Self, ClassificationError> {
        let http = reqwest::Client::builder()
            .user_agent("compliance-monitor")
            .build()?;
        Ok(Self { config, http })
    }

    /// Classify `action` against `guideline` over the fixed label set and
    /// return the first (highest ranked) entry of the response.
    pub async fn classify(
        &self,
        action: &str,
        guideline: &str,
    ) -> Result<ClassificationResult, ClassificationError> {
        let request = ZeroShotRequest {
            inputs: format_prompt(action, guideline),
            parameters: ZeroShotParameters {
                candidate_labels: Label::ALL.map(Label::as_str),
            },
        };

        let response: ZeroShotResponse = self
            .request_with_retry(|| async {
                let resp = self
                    .http
                    .post(&self.config.url)
                    .bearer_auth(&self.config.access_token)
                    .timeout(self.config.default_timeout)
                    .json(&request)
                    .send()
                    .await?;
                Self::parse_json_response(resp, self.config.max_error_body_bytes).await
            })
            .await?;

        let result = top_result(response)?;
        debug!(label = %result.label, score = result.score, "classification complete");
        Ok(result)
    }

    async fn parse_json_response<T: for<'de> Deserialize<'de>>(
        resp: reqwest::Response,
        max_error_body_bytes: usize,
    ) -> Result<T, ClassificationError> {
        if resp.status().is_success() {
            let bytes = resp.bytes().await?;
            return Ok(serde_json::from_slice::<T>(&bytes)?);
        }
        Err(Self::to_upstream_error(resp, max_error_body_bytes).await)
    }

    async fn to_upstream_error(
        resp: reqwest::Response,
        max_error_body_bytes: usize,
    ) -> ClassificationError {
        let status = resp.status();
        let body = error_excerpt(resp, max_error_body_bytes).await;
        if let Ok(parsed) = serde_json::from_str::<UpstreamErrorEnvelope>(&body) {
            return ClassificationError::Upstream {
                status,
                message: parsed.error,
                retry_after: parsed
                    .estimated_time
                    .and_then(|secs| Duration::try_from_secs_f64(secs).ok()),
            };
        }
        ClassificationError::UpstreamBody { status, body }
    }

    async fn request_with_retry<T, Fut, F>(&self, mut f: F) -> Result<T, ClassificationError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, ClassificationError>>,
    {
        let mut retry: u32 = 0;
        loop {
            match f().await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    if retry >= self.config.max_retries || !should_retry(&e) {
                        return Err(e);
                    }
                    retry += 1;
                    let delay = retry_delay(&self.config, &e, retry);
                    warn!(
                        retry,
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "classifier request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// The prompt format the model is asked to classify.
pub fn format_prompt(action: &str, guideline: &str) -> String {
    format!("Action: {action}, \n Guideline: {guideline}")
}

fn top_result(response: ZeroShotResponse) -> Result<ClassificationResult, ClassificationError> {
    let ZeroShotResponse {
        labels,
        scores,
        sequence,
    } = response;
    let label = labels.into_iter().next().ok_or(ClassificationError::EmptyResult)?;
    let score = scores.into_iter().next().ok_or(ClassificationError::EmptyResult)?;
    Ok(ClassificationResult {
        label,
        score,
        sequence,
    })
}

fn should_retry(err: &ClassificationError) -> bool {
    match err {
        ClassificationError::Request(e) => e.is_timeout() || e.is_connect(),
        ClassificationError::Upstream { status, .. }
        | ClassificationError::UpstreamBody { status, .. } => {
            *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
        }
        ClassificationError::InvalidJson(_)
        | ClassificationError::EmptyResult
        | ClassificationError::UnknownLabel(_)
        | ClassificationError::InvalidScore(_) => false,
    }
}

/// Delay before retry number `retry` (1-based). A loading estimate from the
/// upstream replaces the exponential schedule. Both are capped at `max_backoff`.
fn retry_delay(config: &ClassifierConfig, err: &ClassificationError, retry: u32) -> Duration {
    if let ClassificationError::Upstream {
        retry_after: Some(estimate),
        ..
    } = err
    {
        return (*estimate).min(config.max_backoff);
    }
    let factor = 2u32.saturating_pow(retry.saturating_sub(1));
    let base = config.initial_backoff.saturating_mul(factor).min(config.max_backoff);
    base + jitter(base / 4)
}

/// Random duration in `[0, spread]`, drawn from std's per-hasher random keys.
fn jitter(spread: Duration) -> Duration {
    let spread_ms = spread.as_millis() as u64;
    if spread_ms == 0 {
        return Duration::ZERO;
    }
    let draw = RandomState::new().build_hasher().finish();
    Duration::from_millis(draw % (spread_ms + 1))
}

/// At most `limit` bytes of an error body, decoded lossily. A cut body ends
/// in `...`.
async fn error_excerpt(resp: reqwest::Response, limit: usize) -> String {
    let bytes = match resp.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "classifier error body unreadable");
            return String::new();
        }
    };
    if bytes.len() <= limit {
        return String::from_utf8_lossy(&bytes).into_owned();
    }
    let mut excerpt = String::from_utf8_lossy(&bytes[..limit]).into_owned();
    excerpt.push_str("...");
    excerpt
}

#[derive(Debug, Serialize)]
struct ZeroShotRequest {
    inputs: String,
    parameters: ZeroShotParameters,
}

#[derive(Debug, Serialize)]
struct ZeroShotParameters {
    candidate_labels: [&'static str; 3],
}

#[derive(Debug, Deserialize)]
struct ZeroShotResponse {
    labels: Vec<String>,
    scores: Vec<f64>,
    sequence: String,
}

/// Hugging Face inference errors look like `{"error": "..."}`, plus
/// `estimated_time` (seconds) while the model is loading.
#[derive(Debug, Deserialize)]
struct UpstreamErrorEnvelope {
    error: String,
    #[serde(default)]
    estimated_time: Option<f64>,
}
