//! Client for the external text-completion API used by the message parser.

use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::AiConfig;

const API_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone, thiserror::Error)]
pub enum CompletionError {
    #[error("network error: {0}")]
    Transport(String),
    #[error("timeout")]
    Timeout,
    #[error("http {status}: {body}")]
    Http { status: u16, body: String },
    #[error("rate limited")]
    RateLimited,
    #[error("invalid api key")]
    InvalidApiKey,
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl CompletionError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout | Self::RateLimited => true,
            Self::Http { status, .. } => (500..=599).contains(status),
            _ => false,
        }
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: [Message<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone)]
pub struct TextCompletionClient {
    http: Client,
    api_key: String,
    endpoint: String,
    model: String,
    max_tokens: u32,
}

impl TextCompletionClient {
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

    /// `None` when no API key is configured; the parser endpoint then
    /// answers 503.
    pub fn from_config(config: &AiConfig) -> Result<Option<Self>, CompletionError> {
        let Some(api_key) = config.api_key.clone() else {
            return Ok(None);
        };
        let http = Client::builder()
            .timeout(Self::REQUEST_TIMEOUT)
            .user_agent(concat!("scoutdesk-api/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CompletionError::Transport(e.to_string()))?;
        Ok(Some(Self {
            http,
            api_key,
            endpoint: format!("{}/messages", config.base_url),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        }))
    }

    /// Sends one user turn and returns the text of the reply. Transient
    /// failures are retried up to three times with backoff.
    pub async fn complete(&self, system: &str, prompt: &str) -> Result<String, CompletionError> {
        let request = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            system,
            messages: [Message {
                role: "user",
                content: prompt,
            }],
        };

        let response = (|| async { self.send(&request).await })
            .retry(
                ExponentialBuilder::default()
                    .with_min_delay(Duration::from_millis(500))
                    .with_max_delay(Duration::from_secs(8))
                    .with_max_times(3)
                    .with_jitter(),
            )
            .when(CompletionError::is_transient)
            .notify(|e, dur| {
                warn!(
                    error = %e,
                    retry_in_ms = dur.as_millis() as u64,
                    "completion request failed, retrying"
                )
            })
            .await?;

        response
            .content
            .into_iter()
            .find_map(|block| match block {
                ContentBlock::Text { text } => Some(text),
                ContentBlock::Other => None,
            })
            .ok_or_else(|| CompletionError::Decode("no text block in response".into()))
    }

    async fn send(&self, request: &MessagesRequest<'_>) -> Result<MessagesResponse, CompletionError> {
        let res = self
            .http
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(request)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        match res.status() {
            s if s.is_success() => res
                .json::<MessagesResponse>()
                .await
                .map_err(|e| CompletionError::Decode(e.to_string())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(CompletionError::InvalidApiKey),
            StatusCode::TOO_MANY_REQUESTS => Err(CompletionError::RateLimited),
            s => Err(CompletionError::Http {
                status: s.as_u16(),
                body: res.text().await.unwrap_or_default(),
            }),
        }
    }
}

fn map_reqwest_error(e: reqwest::Error) -> CompletionError {
    if e.is_timeout() {
        CompletionError::Timeout
    } else {
        CompletionError::Transport(e.to_string())
    }
}

/// Pulls the JSON payload out of a reply that may wrap it in a fenced
/// code block or surround it with prose.
pub fn extract_json(text: &str) -> &str {
    let text = text.trim();

    if let Some(start) = text.find("```") {
        let after_fence = &text[start + 3..];
        // Skip a language tag such as `json` on the fence line.
        let body_start = after_fence.find('\n').map_or(0, |i| i + 1);
        let body = &after_fence[body_start..];
        if let Some(end) = body.find("```") {
            return body[..end].trim();
        }
    }

    let open = text.find(['[', '{']);
    let close = text.rfind([']', '}']);
    match (open, close) {
        (Some(open), Some(close)) if close > open => &text[open..=close],
        _ => text,
    }
}
