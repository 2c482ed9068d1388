//! Client for the Anthropic messages API. The model is treated as an opaque
//! function from prompt text to a JSON document.

use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;
use tracing::{error, warn};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 4096;

#[derive(Debug, Clone, Error)]
pub enum LlmError {
    #[error("network error: {0}")]
    Transport(String),
    #[error("request timed out")]
    Timeout,
    #[error("http {status}: {body}")]
    Http { status: u16, body: String },
    #[error("rate limited by upstream")]
    RateLimited,
    #[error("api key rejected")]
    InvalidApiKey,
    #[error("unusable model output: {0}")]
    Output(String),
}

impl LlmError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout | Self::RateLimited => true,
            Self::Http { status, .. } => (500..=599).contains(status),
            Self::InvalidApiKey | Self::Output(_) => false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
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

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

impl MessagesResponse {
    fn text(&self) -> Option<&str> {
        self.content.iter().find_map(|block| match block {
            ContentBlock::Text { text } => Some(text.as_str()),
            ContentBlock::Other => None,
        })
    }
}

#[derive(Debug, Clone)]
pub struct LlmClient {
    http: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl LlmClient {
    /// Per-attempt ceiling; the caller applies its own overall deadline
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(45);

    pub fn new(api_key: String, model: Option<String>) -> Result<Self, LlmError> {
        Self::with_base_url(api_key, model, DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(
        api_key: String,
        model: Option<String>,
        base_url: String,
    ) -> Result<Self, LlmError> {
        let http = Client::builder()
            .timeout(Self::REQUEST_TIMEOUT)
            .user_agent(concat!("formcredit/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Send one user message and return the first text block of the reply
    pub async fn ask(&self, prompt: &str, system: Option<&str>) -> Result<String, LlmError> {
        let request = MessagesRequest {
            model: &self.model,
            max_tokens: MAX_TOKENS,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
            system,
        };

        let response = (|| async { self.send(&request).await })
            .retry(
                ExponentialBuilder::default()
                    .with_min_delay(Duration::from_millis(500))
                    .with_max_delay(Duration::from_secs(8))
                    .with_max_times(3)
                    .with_jitter(),
            )
            .when(LlmError::is_transient)
            .notify(|e, dur| {
                warn!(
                    error = %e,
                    retry_in_secs = dur.as_secs_f64(),
                    "LLM request failed, retrying"
                )
            })
            .await?;

        response
            .text()
            .map(str::to_string)
            .ok_or_else(|| LlmError::Output("no text content in response".to_string()))
    }

    /// Like `ask`, but parses the reply as JSON. Fenced code blocks are unwrapped.
    pub async fn ask_json<T: DeserializeOwned>(
        &self,
        prompt: &str,
        system: Option<&str>,
    ) -> Result<T, LlmError> {
        let text = self.ask(prompt, system).await?;
        parse_json_reply(&text)
    }

    async fn send(&self, request: &MessagesRequest<'_>) -> Result<MessagesResponse, LlmError> {
        let res = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(request)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        match res.status() {
            s if s.is_success() => res
                .json::<MessagesResponse>()
                .await
                .map_err(|e| LlmError::Output(e.to_string())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(LlmError::InvalidApiKey),
            StatusCode::TOO_MANY_REQUESTS => Err(LlmError::RateLimited),
            s => {
                let status = s.as_u16();
                let body = res.text().await.unwrap_or_default();
                Err(LlmError::Http { status, body })
            }
        }
    }
}

fn map_reqwest_error(e: reqwest::Error) -> LlmError {
    if e.is_timeout() {
        LlmError::Timeout
    } else {
        LlmError::Transport(e.to_string())
    }
}

pub(crate) fn parse_json_reply<T: DeserializeOwned>(text: &str) -> Result<T, LlmError> {
    let json = extract_json(text);
    if json.is_empty() {
        return Err(LlmError::Output("empty response".to_string()));
    }
    serde_json::from_str(json).map_err(|e| {
        error!(
            error = %e,
            preview = %json.chars().take(200).collect::<String>(),
            "Could not parse model output as JSON"
        );
        LlmError::Output(e.to_string())
    })
}

/// Pull the JSON document out of a reply that may wrap it in prose or a fenced block
fn extract_json(text: &str) -> &str {
    let text = text.trim();

    if let Some(start) = text.find("```") {
        let after_fence = start + 3;
        let body_start = text[after_fence..]
            .find('\n')
            .map(|i| after_fence + i + 1)
            .unwrap_or(after_fence);
        if let Some(end) = text[body_start..].find("```") {
            return text[body_start..body_start + end].trim();
        }
    }

    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_plain() {
        assert_eq!(extract_json(r#" {"a": 1} "#), r#"{"a": 1}"#);
    }

    #[test]
    fn test_extract_json_fenced_with_language() {
        let input = "Here you go:\n```json\n{\"a\": 1}\n```\nEnjoy";
        assert_eq!(extract_json(input), r#"{"a": 1}"#);
    }

    #[test]
    fn test_extract_json_fenced_without_language() {
        let input = "```\n{\"a\": 1}\n```";
        assert_eq!(extract_json(input), r#"{"a": 1}"#);
    }

    #[test]
    fn test_extract_json_surrounded_by_prose() {
        let input = "Sure! {\"a\": {\"b\": 2}} Let me know.";
        assert_eq!(extract_json(input), r#"{"a": {"b": 2}}"#);
    }

    #[test]
    fn test_parse_json_reply_rejects_garbage() {
        let parsed: Result<serde_json::Value, _> = parse_json_reply("I cannot help with that");
        assert!(matches!(parsed, Err(LlmError::Output(_))));
        let empty: Result<serde_json::Value, _> = parse_json_reply("   ");
        assert!(matches!(empty, Err(LlmError::Output(_))));
    }

    #[test]
    fn test_transient_classification() {
        assert!(LlmError::Timeout.is_transient());
        assert!(LlmError::RateLimited.is_transient());
        assert!(
            LlmError::Http {
                status: 529,
                body: String::new()
            }
            .is_transient()
        );
        assert!(
            !LlmError::Http {
                status: 400,
                body: String::new()
            }
            .is_transient()
        );
        assert!(!LlmError::InvalidApiKey.is_transient());
    }

    #[test]
    fn test_response_text_skips_non_text_blocks() {
        let body = r#"{"content":[{"type":"thinking","thinking":"..."},{"type":"text","text":"hi"}]}"#;
        let response: MessagesResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response.text(), Some("hi"));
    }
}
