/// Speech-to-text over an OpenAI-compatible `/audio/transcriptions` endpoint.
///
/// Timeouts, connection failures, 429 and 5xx responses are retried with capped
/// exponential backoff plus a little jitter.
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, warn};

const DEFAULT_MODEL: &str = "whisper-1";
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_MAX_RETRIES: u32 = 2;
const ERROR_BODY_LIMIT: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(4),
        }
    }
}

impl RetryPolicy {
    /// Wait before retry number `retry` (0-based): `base * 2^retry`, capped at `max_delay`,
    /// plus up to a quarter of that as jitter.
    pub fn delay(&self, retry: u32) -> Duration {
        let scaled = 2u32
            .checked_pow(retry)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .unwrap_or(self.max_delay);
        let capped = scaled.min(self.max_delay);
        let spread = (capped.as_millis() as u64 / 4).max(1);
        capped + Duration::from_millis(clock_jitter(spread))
    }
}

/// Connection settings for the transcription service.
#[derive(Debug, Clone)]
pub struct TranscribeConfig {
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl TranscribeConfig {
    /// Reads `TRANSCRIBE_BASE_URL`, `TRANSCRIBE_MODEL`, `TRANSCRIBE_TIMEOUT_SECS` and
    /// `TRANSCRIBE_MAX_RETRIES`. `None` when no base URL is set.
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let base_url = lookup("TRANSCRIBE_BASE_URL").filter(|url| !url.trim().is_empty())?;
        let timeout_secs = lookup("TRANSCRIBE_TIMEOUT_SECS")
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        let max_retries = lookup("TRANSCRIBE_MAX_RETRIES")
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(DEFAULT_MAX_RETRIES);

        Some(Self {
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            model: lookup("TRANSCRIBE_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            timeout: Duration::from_secs(timeout_secs),
            retry: RetryPolicy {
                max_retries,
                ..RetryPolicy::default()
            },
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/audio/transcriptions", self.base_url)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TranscribeError {
    #[error("transcription request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("transcription service returned {status}: {detail}")]
    Status { status: StatusCode, detail: String },
}

impl TranscribeError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
        }
    }
}

#[derive(Clone)]
pub struct TranscriptionClient {
    config: TranscribeConfig,
    http: reqwest::Client,
}

impl TranscriptionClient {
    pub fn new(config: TranscribeConfig) -> Result<Self, TranscribeError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("nic-common/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .build()?;
        Ok(Self { config, http })
    }

    /// Transcribe a WAV recording. `language` is an ISO-639-1 hint ("en", "hi").
    pub async fn transcribe_wav(
        &self,
        wav: Vec<u8>,
        language: &str,
    ) -> Result<String, TranscribeError> {
        let policy = self.config.retry;
        let mut retry = 0;
        loop {
            match self.upload(wav.clone(), language).await {
                Ok(text) => return Ok(text),
                Err(e) if retry < policy.max_retries && e.is_transient() => {
                    let delay = policy.delay(retry);
                    warn!(
                        retry = retry + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transcription failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn upload(&self, wav: Vec<u8>, language: &str) -> Result<String, TranscribeError> {
        let audio = Part::bytes(wav)
            .file_name("recording.wav")
            .mime_str("audio/wav")?;
        let form = Form::new()
            .part("file", audio)
            .text("model", self.config.model.clone())
            .text("language", language.to_string())
            .text("response_format", "json");

        let response = self
            .http
            .post(self.config.endpoint())
            .multipart(form)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let detail = error_detail(response).await;
            return Err(TranscribeError::Status { status, detail });
        }

        let Transcription { text } = response.json().await?;
        debug!(chars = text.len(), "transcription received");
        Ok(text.trim().to_string())
    }
}

#[derive(Deserialize)]
struct Transcription {
    text: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorMessage,
}

#[derive(Deserialize)]
struct ErrorMessage {
    message: Option<String>,
}

/// The `error.message` of a JSON error body, else the first few KB of the raw body.
async fn error_detail(response: reqwest::Response) -> String {
    let bytes = match response.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => return format!("unreadable error body ({e})"),
    };
    let body = &bytes[..bytes.len().min(ERROR_BODY_LIMIT)];
    match serde_json::from_slice::<ErrorBody>(body) {
        Ok(ErrorBody {
            error: ErrorMessage { message: Some(m) },
        }) => m,
        _ => String::from_utf8_lossy(body).into_owned(),
    }
}

/// Cheap jitter in `0..=max` from the clock's sub-second nanos.
fn clock_jitter(max: u64) -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::from(d.subsec_nanos()))
        .unwrap_or(0);
    nanos % (max + 1)
}
