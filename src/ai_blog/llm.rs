use std::time::Duration;

use reqwest::StatusCode as HttpStatusCode;
use serde_json::{Value, json};

use crate::config::{LlmProvider, LlmSettings};

pub const DEFAULT_MAX_TOKENS: u32 = 4000;
const TEMPERATURE: f64 = 0.7;
const GROQ_TOP_P: f64 = 0.95;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("No LLM API key configured. Set GROQ_API_KEY or OPENAI_API_KEY.")]
    NotConfigured,
    #[error("Failed to build LLM HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("Failed to call {provider} API after {attempts} attempt(s): {source}")]
    Transport {
        provider: &'static str,
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },
    #[error("{provider} API error {status} after {attempts} attempt(s): {body}")]
    Api {
        provider: &'static str,
        status: u16,
        attempts: u32,
        body: String,
    },
    #[error("{provider} response is not valid JSON: {body}")]
    MalformedBody { provider: &'static str, body: String },
    #[error("{0} response does not contain message content")]
    MissingContent(&'static str),
}

/// OpenAI-compatible chat completion client for Groq and OpenAI.
#[derive(Debug, Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    settings: LlmSettings,
}

impl LlmClient {
    pub fn new(settings: LlmSettings) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(LlmError::Client)?;
        Ok(Self { http, settings })
    }

    pub fn is_configured(&self) -> bool {
        self.settings.api_key.is_some()
    }

    pub fn provider(&self) -> LlmProvider {
        self.settings.provider
    }

    pub fn model(&self) -> &str {
        &self.settings.model
    }

    /// Sends `[system, user]` and returns the first choice's message content.
    pub async fn complete(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
    ) -> Result<String, LlmError> {
        let api_key = self.settings.api_key.as_deref().ok_or(LlmError::NotConfigured)?;
        let provider = self.settings.provider.label();
        let url = format!("{}/chat/completions", self.settings.base_url.trim_end_matches('/'));
        let body = request_body(
            self.settings.provider,
            &self.settings.model,
            system,
            user,
            max_tokens,
        );

        let total_attempts = self.settings.max_retries + 1;
        let retry_base_ms = self.settings.retry_base_ms;
        let retry_max_ms = self.settings.retry_max_ms.max(retry_base_ms);

        tracing::info!("Calling {} API with model {}", provider, self.settings.model);

        for attempt in 1..=total_attempts {
            let can_retry = attempt < total_attempts;
            let response = match self
                .http
                .post(&url)
                .bearer_auth(api_key)
                .json(&body)
                .send()
                .await
            {
                Ok(response) => response,
                Err(error) => {
                    if can_retry {
                        let delay = retry_delay_for_attempt(attempt, retry_base_ms, retry_max_ms);
                        tracing::warn!(
                            attempt,
                            total_attempts,
                            delay_ms = delay.as_millis(),
                            "{} request failed (network/transport): {}. Retrying...",
                            provider,
                            error
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(LlmError::Transport {
                        provider,
                        attempts: total_attempts,
                        source: error,
                    });
                }
            };

            let status = response.status();
            let text = match response.text().await {
                Ok(text) => text,
                Err(error) => {
                    return Err(LlmError::Transport {
                        provider,
                        attempts: attempt,
                        source: error,
                    });
                }
            };

            if status != HttpStatusCode::OK {
                if can_retry && is_retryable_status(status) {
                    let delay = retry_delay_for_attempt(attempt, retry_base_ms, retry_max_ms);
                    tracing::warn!(
                        attempt,
                        total_attempts,
                        status = %status,
                        delay_ms = delay.as_millis(),
                        "{} transient API error. Retrying...",
                        provider
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                tracing::error!(status = %status, "{} API error: {}", provider, text);
                return Err(LlmError::Api {
                    provider,
                    status: status.as_u16(),
                    attempts: attempt,
                    body: text,
                });
            }

            let parsed: Value = serde_json::from_str(&text).map_err(|_| LlmError::MalformedBody {
                provider,
                body: text.clone(),
            })?;
            let content = message_content(&parsed).ok_or(LlmError::MissingContent(provider))?;

            tracing::info!(
                "Received response from {} API. Preview: {}",
                provider,
                preview(&content, 100)
            );
            return Ok(content);
        }

        Err(LlmError::Api {
            provider,
            status: 0,
            attempts: total_attempts,
            body: "request did not succeed".to_string(),
        })
    }
}

fn request_body(
    provider: LlmProvider,
    model: &str,
    system: &str,
    user: &str,
    max_tokens: u32,
) -> Value {
    let messages = json!([
        { "role": "system", "content": system },
        { "role": "user", "content": user }
    ]);
    match provider {
        LlmProvider::Groq => json!({
            "model": model,
            "messages": messages,
            "temperature": TEMPERATURE,
            "max_completion_tokens": max_tokens,
            "top_p": GROQ_TOP_P,
            "stream": false
        }),
        LlmProvider::OpenAi => json!({
            "model": model,
            "messages": messages,
            "temperature": TEMPERATURE,
            "max_tokens": max_tokens
        }),
    }
}

fn message_content(response: &Value) -> Option<String> {
    response
        .get("choices")
        .and_then(|choices| choices.as_array())
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(|content| content.as_str())
        .map(ToString::to_string)
}

fn is_retryable_status(status: HttpStatusCode) -> bool {
    matches!(
        status,
        HttpStatusCode::TOO_MANY_REQUESTS
            | HttpStatusCode::INTERNAL_SERVER_ERROR
            | HttpStatusCode::BAD_GATEWAY
            | HttpStatusCode::SERVICE_UNAVAILABLE
            | HttpStatusCode::GATEWAY_TIMEOUT
    )
}

fn retry_delay_for_attempt(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let multiplier = 1u64 << exponent;
    let delay_ms = base_ms.saturating_mul(multiplier).min(max_ms);
    Duration::from_millis(delay_ms)
}

pub fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    format!("{}...", head)
}
