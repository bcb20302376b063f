//! Client for the external completion service.
//!
//! Wraps a single text-completion call with quota enforcement, transport
//! retry, fallback-prompt handling, and response normalization. All
//! type-sniffing of provider response shapes happens in
//! `normalize_response_text`; the rest of the engine only ever sees
//! normalized text.

use super::models::{CompletionResponse, Model, Usage};
use graft_adapters::config::Config;
use graft_adapters::util::{debug_log, truncate_str};
use graft_core::protocol::BoxFuture;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Transport retry configuration
pub(crate) const MAX_TRANSPORT_RETRIES: u32 = 3;
pub(crate) const INITIAL_BACKOFF_MS: u64 = 2_000;
pub(crate) const BACKOFF_MULTIPLIER: u64 = 2;

/// Generation latency is high; allow minutes, not seconds.
const REQUEST_TIMEOUT_SECS: u64 = 300;

/// Prompts beyond this size are flagged, not rejected.
const LONG_PROMPT_WARN_CHARS: usize = 48_000;

/// Maximum length for provider content quoted in error messages
const MAX_ERROR_CONTENT_LEN: usize = 200;

/// Candidate keys tried, in order, when the provider returns a structured
/// object instead of plain text.
const TEXT_CANDIDATE_KEYS: [&str; 5] = ["text", "content", "output", "completion", "response"];

/// Failure taxonomy for completion calls. Configuration and quota
/// failures are deterministic and never retried; transport failures are
/// retried with bounded backoff before surfacing here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerateError {
    Config(String),
    QuotaExceeded { quota: u32 },
    /// The call succeeded but returned nothing usable. Distinct from a
    /// transport error.
    EmptyResponse,
    Transport(String),
    Api { status: u16, message: String },
}

impl std::fmt::Display for GenerateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GenerateError::Config(msg) => write!(f, "configuration error: {}", msg),
            GenerateError::QuotaExceeded { quota } => write!(
                f,
                "monthly quota exceeded ({} calls); no further completion calls this period",
                quota
            ),
            GenerateError::EmptyResponse => {
                write!(f, "completion service returned an empty response")
            }
            GenerateError::Transport(msg) => write!(f, "transport error: {}", msg),
            GenerateError::Api { status, message } => {
                write!(f, "API error {}: {}", status, message)
            }
        }
    }
}

impl std::error::Error for GenerateError {}

/// A single completion request, including the optional fallback prompt
/// tried when the primary attempt fails.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub prompt: String,
    pub model: Model,
    pub max_tokens: u32,
    pub temperature: f32,
    pub prompt_fallback: Option<String>,
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: Model::default(),
            max_tokens: 2_000,
            temperature: 0.1,
            prompt_fallback: None,
        }
    }

    pub fn with_fallback(mut self, prompt: impl Into<String>) -> Self {
        self.prompt_fallback = Some(prompt.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Object-safe seam over the completion service so stages and the
/// orchestrator are testable without a network.
pub trait CompletionModel: Send + Sync {
    fn generate<'a>(
        &'a self,
        request: GenerateRequest,
    ) -> BoxFuture<'a, Result<CompletionResponse, GenerateError>>;

    fn remaining_quota(&self) -> u32;
}

/// Sanitize provider response content quoted in error messages to avoid
/// leaking credentials echoed back by misbehaving endpoints.
fn sanitize_api_response(content: &str) -> String {
    const SECRET_PATTERNS: &[&str] = &["api_key", "apikey", "secret", "password", "bearer", "sk-"];

    let truncated = truncate_str(content, MAX_ERROR_CONTENT_LEN);
    let lower = truncated.to_lowercase();
    for pattern in SECRET_PATTERNS {
        if lower.contains(pattern) {
            return "(response details redacted - may contain sensitive data)".to_string();
        }
    }
    truncated
}

pub(crate) fn backoff_secs(retry_count: u32) -> u64 {
    let factor = BACKOFF_MULTIPLIER.pow(retry_count.saturating_sub(1));
    let ms = INITIAL_BACKOFF_MS.saturating_mul(factor);
    let secs = ms / 1000;
    if secs == 0 {
        1
    } else {
        secs
    }
}

pub(crate) fn is_retryable_network_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

/// Extract a retry-after hint from a rate-limit response body, if present.
fn parse_retry_after(text: &str) -> Option<u64> {
    let text_lower = text.to_lowercase();
    let pos = text_lower.find("retry")?;
    for word in text_lower[pos..].split_whitespace().skip(1).take(5) {
        if let Ok(secs) = word.trim_matches(|c: char| !c.is_numeric()).parse::<u64>() {
            if secs > 0 && secs < 300 {
                return Some(secs);
            }
        }
    }
    None
}

/// Collapse the provider's response shapes into plain text.
///
/// Accepts a bare string, a completion object (`choices[0].text` or
/// `choices[0].message.content`), any object carrying one of the
/// candidate text keys, or anything else (stringified). Returns None only
/// for null, which callers treat as a hard empty-response failure.
pub(crate) fn normalize_response_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => {
            if let Some(choice) = map.get("choices").and_then(|c| c.get(0)) {
                if let Some(text) = choice.get("text").and_then(Value::as_str) {
                    return Some(text.to_string());
                }
                if let Some(text) = choice
                    .get("message")
                    .and_then(|m| m.get("content"))
                    .and_then(Value::as_str)
                {
                    return Some(text.to_string());
                }
            }
            for key in TEXT_CANDIDATE_KEYS {
                if let Some(text) = map.get(key).and_then(Value::as_str) {
                    return Some(text.to_string());
                }
            }
            Some(value.to_string())
        }
        other => Some(other.to_string()),
    }
}

/// Client for the completion studio. One instance per pipeline run; the
/// quota counter is shared by every stage routed through it.
pub struct ModelClient {
    http: reqwest::Client,
    studio_url: String,
    api_key: String,
    monthly_quota: u32,
    calls_made: AtomicU32,
}

impl ModelClient {
    pub fn from_config(config: &Config) -> Result<Self, GenerateError> {
        let api_key = config
            .get_api_key()
            .ok_or_else(|| GenerateError::Config("completion API key not set".to_string()))?;
        let studio_url = config
            .get_studio_url()
            .ok_or_else(|| GenerateError::Config("studio URL not set".to_string()))?;
        Self::new(studio_url, api_key, config.get_monthly_quota())
    }

    pub fn new(
        studio_url: impl Into<String>,
        api_key: impl Into<String>,
        monthly_quota: u32,
    ) -> Result<Self, GenerateError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| GenerateError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            studio_url: studio_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            monthly_quota,
            calls_made: AtomicU32::new(0),
        })
    }

    /// Calls made so far in this period. Never decreases.
    pub fn calls_made(&self) -> u32 {
        self.calls_made.load(Ordering::Relaxed)
    }

    /// Remaining calls before the quota gate closes. Pure arithmetic.
    pub fn get_remaining_quota(&self) -> u32 {
        self.monthly_quota.saturating_sub(self.calls_made())
    }

    fn check_quota(&self) -> Result<(), GenerateError> {
        if self.calls_made() >= self.monthly_quota {
            return Err(GenerateError::QuotaExceeded {
                quota: self.monthly_quota,
            });
        }
        Ok(())
    }

    /// One attempt through the full path: quota gate, transport with
    /// retry, normalization, and the empty-response check. The counter is
    /// incremented only when the attempt produces usable text.
    async fn attempt(
        &self,
        prompt: &str,
        model: Model,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<CompletionResponse, GenerateError> {
        // Deterministic precondition, checked before any network call.
        self.check_quota()?;

        if prompt.chars().count() > LONG_PROMPT_WARN_CHARS {
            debug_log(&format!(
                "prompt is unusually long ({} chars); consider trimming inputs",
                prompt.chars().count()
            ));
        }

        let payload = json!({
            "model": model.id(),
            "prompt": prompt,
            "max_tokens": max_tokens,
            "temperature": temperature,
            "stream": false,
        });

        let body = self.send_with_retry(&payload).await?;
        let text = normalize_response_text(&body).ok_or(GenerateError::EmptyResponse)?;
        if text.trim().is_empty() {
            return Err(GenerateError::EmptyResponse);
        }

        self.calls_made.fetch_add(1, Ordering::Relaxed);

        let usage = body
            .get("usage")
            .and_then(|u| serde_json::from_value::<Usage>(u.clone()).ok())
            .filter(|u| u.total_tokens > 0)
            .unwrap_or_else(|| Usage::approximate_from_text(&text));
        let finish_reason = body
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("finish_reason"))
            .and_then(Value::as_str)
            .unwrap_or("stop")
            .to_string();

        Ok(CompletionResponse {
            text,
            model: model.id().to_string(),
            usage,
            finish_reason,
        })
    }

    /// Generate a completion, falling back to `prompt_fallback` when the
    /// primary attempt fails. The fallback re-checks quota and its own
    /// failure propagates; on success exactly one call is counted.
    pub async fn generate(
        &self,
        request: GenerateRequest,
    ) -> Result<CompletionResponse, GenerateError> {
        let GenerateRequest {
            prompt,
            model,
            max_tokens,
            temperature,
            prompt_fallback,
        } = request;

        match self.attempt(&prompt, model, max_tokens, temperature).await {
            Ok(response) => Ok(response),
            Err(primary_err) => match prompt_fallback {
                Some(fallback) => {
                    debug_log(&format!(
                        "primary prompt failed ({}); trying fallback prompt",
                        primary_err
                    ));
                    self.attempt(&fallback, model, max_tokens, temperature).await
                }
                None => Err(primary_err),
            },
        }
    }

    /// POST the payload with bounded exponential backoff on transient
    /// failures only (timeouts, connection errors, 429, 5xx). Other
    /// failures surface immediately.
    async fn send_with_retry(&self, payload: &Value) -> Result<Value, GenerateError> {
        let url = format!("{}/api/v1/generate", self.studio_url);
        let mut retry_count = 0u32;
        let mut last_error = String::new();

        while retry_count <= MAX_TRANSPORT_RETRIES {
            let response = match self
                .http
                .post(&url)
                .header("Content-Type", "application/json")
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(payload)
                .send()
                .await
            {
                Ok(response) => response,
                Err(err) => {
                    last_error = err.to_string();
                    if is_retryable_network_error(&err) && retry_count < MAX_TRANSPORT_RETRIES {
                        retry_count += 1;
                        tokio::time::sleep(Duration::from_secs(backoff_secs(retry_count))).await;
                        continue;
                    }
                    return Err(GenerateError::Transport(last_error));
                }
            };

            let status = response.status();
            let text = match response.text().await {
                Ok(text) => text,
                Err(err) => {
                    last_error = err.to_string();
                    if is_retryable_network_error(&err) && retry_count < MAX_TRANSPORT_RETRIES {
                        retry_count += 1;
                        tokio::time::sleep(Duration::from_secs(backoff_secs(retry_count))).await;
                        continue;
                    }
                    return Err(GenerateError::Transport(last_error));
                }
            };

            if status.is_success() {
                // Plain-text bodies are legal; the normalization boundary
                // handles both shapes.
                return Ok(serde_json::from_str::<Value>(&text)
                    .unwrap_or(Value::String(text)));
            }

            last_error = text.clone();

            if status.as_u16() == 429 && retry_count < MAX_TRANSPORT_RETRIES {
                retry_count += 1;
                let wait = parse_retry_after(&text).unwrap_or_else(|| backoff_secs(retry_count));
                tokio::time::sleep(Duration::from_secs(wait)).await;
                continue;
            }

            if status.is_server_error() && retry_count < MAX_TRANSPORT_RETRIES {
                retry_count += 1;
                tokio::time::sleep(Duration::from_secs(backoff_secs(retry_count))).await;
                continue;
            }

            return Err(GenerateError::Api {
                status: status.as_u16(),
                message: sanitize_api_response(&text),
            });
        }

        Err(GenerateError::Transport(last_error))
    }
}

impl CompletionModel for ModelClient {
    fn generate<'a>(
        &'a self,
        request: GenerateRequest,
    ) -> BoxFuture<'a, Result<CompletionResponse, GenerateError>> {
        Box::pin(self.generate(request))
    }

    fn remaining_quota(&self) -> u32 {
        self.get_remaining_quota()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_with_quota(quota: u32) -> ModelClient {
        ModelClient::new("http://localhost:9", "test-key", quota).unwrap()
    }

    #[tokio::test]
    async fn quota_gate_fires_before_any_network_call() {
        let client = client_with_quota(0);
        let err = client
            .generate(GenerateRequest::new("hello"))
            .await
            .unwrap_err();
        assert_eq!(err, GenerateError::QuotaExceeded { quota: 0 });
    }

    #[tokio::test]
    async fn quota_gate_also_blocks_the_fallback_prompt() {
        let client = client_with_quota(0);
        let err = client
            .generate(GenerateRequest::new("hello").with_fallback("hello again"))
            .await
            .unwrap_err();
        assert_eq!(err, GenerateError::QuotaExceeded { quota: 0 });
    }

    #[test]
    fn remaining_quota_is_quota_minus_calls() {
        let client = client_with_quota(20);
        assert_eq!(client.get_remaining_quota(), 20);
        client.calls_made.fetch_add(3, Ordering::Relaxed);
        assert_eq!(client.calls_made(), 3);
        assert_eq!(client.get_remaining_quota(), 17);
        // Counter never decreases; remaining saturates at zero.
        client.calls_made.fetch_add(100, Ordering::Relaxed);
        assert_eq!(client.get_remaining_quota(), 0);
    }

    #[test]
    fn backoff_grows_exponentially() {
        assert_eq!(backoff_secs(1), 2);
        assert_eq!(backoff_secs(2), 4);
        assert_eq!(backoff_secs(3), 8);
    }

    #[test]
    fn normalize_accepts_plain_strings() {
        let value = Value::String("generated code".to_string());
        assert_eq!(
            normalize_response_text(&value).as_deref(),
            Some("generated code")
        );
    }

    #[test]
    fn normalize_prefers_choices_text() {
        let value = serde_json::json!({
            "choices": [{"text": "from choices", "finish_reason": "stop"}],
            "text": "outer text"
        });
        assert_eq!(
            normalize_response_text(&value).as_deref(),
            Some("from choices")
        );
    }

    #[test]
    fn normalize_handles_chat_shaped_choices() {
        let value = serde_json::json!({
            "choices": [{"message": {"content": "chat content"}}]
        });
        assert_eq!(
            normalize_response_text(&value).as_deref(),
            Some("chat content")
        );
    }

    #[test]
    fn normalize_walks_candidate_keys_in_order() {
        let value = serde_json::json!({"output": "the output", "response": "ignored"});
        assert_eq!(
            normalize_response_text(&value).as_deref(),
            Some("the output")
        );
    }

    #[test]
    fn normalize_stringifies_unknown_objects() {
        let value = serde_json::json!({"unexpected": {"deeply": "nested"}});
        let text = normalize_response_text(&value).unwrap();
        assert!(text.contains("unexpected"));
    }

    #[test]
    fn normalize_treats_null_as_missing() {
        assert!(normalize_response_text(&Value::Null).is_none());
    }

    #[test]
    fn retry_after_hint_is_parsed_from_body() {
        assert_eq!(
            parse_retry_after("rate limited, retry after 12 seconds"),
            Some(12)
        );
        assert_eq!(parse_retry_after("please slow down"), None);
        // Out-of-range hints are ignored.
        assert_eq!(parse_retry_after("retry after 900 seconds"), None);
    }

    #[test]
    fn sanitize_redacts_secret_looking_bodies() {
        let redacted = sanitize_api_response("error: bad api_key sk-12345");
        assert!(redacted.contains("redacted"));
        assert_eq!(sanitize_api_response("plain error"), "plain error");
    }

    #[test]
    fn errors_format_with_context() {
        let err = GenerateError::QuotaExceeded { quota: 20 };
        assert!(err.to_string().contains("20"));
        let err = GenerateError::Api {
            status: 500,
            message: "boom".to_string(),
        };
        assert!(err.to_string().contains("500"));
    }
}
