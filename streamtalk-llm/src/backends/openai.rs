// ABOUTME: Backend for any OpenAI-compatible chat completions endpoint (Groq by default).
// ABOUTME: Maps rate limits and JSON-validation rejections to typed errors for the caller.

use crate::{CompletionRequest, LanguageModel, LlmError};
use async_trait::async_trait;
use reqwest::{header::HeaderValue, Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_MODEL: &str = "openai/gpt-oss-120b";
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Settings for the OpenAI-compatible backend
#[derive(Clone, Deserialize)]
pub struct OpenAiSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_temperature() -> f32 {
    0.8
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl Default for OpenAiSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key: None,
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl std::fmt::Debug for OpenAiSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiSettings")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("temperature", &self.temperature)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Language model backed by an OpenAI-compatible HTTP API
#[derive(Clone)]
pub struct OpenAiModel {
    client: Client,
    settings: OpenAiSettings,
    api_key: String,
}

impl OpenAiModel {
    /// Create a backend. Falls back to LLM_API_KEY, then GROQ_API_KEY, when
    /// the settings carry no key.
    pub fn new(settings: OpenAiSettings) -> Result<Self, LlmError> {
        let api_key = settings
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var("LLM_API_KEY").ok())
            .or_else(|| std::env::var("GROQ_API_KEY").ok())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                LlmError::Auth("no API key configured (set LLM_API_KEY or GROQ_API_KEY)".into())
            })?;

        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        tracing::info!(base_url = %settings.base_url, model = %settings.model, "OpenAI-compatible model configured");

        Ok(Self {
            client,
            settings,
            api_key,
        })
    }

    /// Factory function for the registry
    pub fn factory() -> crate::registry::ModelFactory {
        Box::new(|config| {
            let settings: OpenAiSettings = serde_json::from_value(config.clone())
                .map_err(|e| anyhow::anyhow!("Invalid openai backend config: {}", e))?;
            let model = OpenAiModel::new(settings)?;
            Ok(Arc::new(model))
        })
    }

    pub fn model_name(&self) -> &str {
        &self.settings.model
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.settings.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl LanguageModel for OpenAiModel {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError> {
        let body = ChatCompletionRequest {
            model: &self.settings.model,
            messages: request
                .messages
                .iter()
                .map(|m| WireMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            max_tokens: request.max_tokens,
            temperature: self.settings.temperature,
            response_format: request.json_output.then_some(ResponseFormat {
                kind: "json_object",
            }),
        };

        tracing::debug!(purpose = %request.purpose, messages = request.messages.len(), "Sending completion request");

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout
                } else {
                    LlmError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers().get("retry-after"));
            let body_text = response.text().await.unwrap_or_default();
            return Err(map_http_error(status, &body_text, retry_after));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Backend(format!("malformed completion response: {}", e)))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|s| s.trim().to_string())
            .unwrap_or_default();

        if text.is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(text)
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    failed_generation: Option<String>,
}

fn map_http_error(status: StatusCode, body: &str, retry_after: Option<Duration>) -> LlmError {
    let parsed = serde_json::from_str::<ErrorResponse>(body).ok();

    match status {
        StatusCode::TOO_MANY_REQUESTS => LlmError::RateLimited { retry_after },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LlmError::Auth(
            parsed
                .map(|p| p.error.message)
                .unwrap_or_else(|| body.to_string()),
        ),
        StatusCode::BAD_REQUEST
            if parsed
                .as_ref()
                .and_then(|p| p.error.code.as_deref())
                .is_some_and(|c| c == "json_validate_failed") =>
        {
            LlmError::InvalidJson {
                failed_generation: parsed.and_then(|p| p.error.failed_generation),
            }
        }
        _ => LlmError::Http {
            status: status.as_u16(),
            message: parsed
                .map(|p| p.error.message)
                .unwrap_or_else(|| body.to_string()),
        },
    }
}

fn parse_retry_after(header: Option<&HeaderValue>) -> Option<Duration> {
    let value = header?.to_str().ok()?.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    value
        .parse::<f64>()
        .ok()
        .filter(|s| s.is_finite() && *s >= 0.0)
        .map(Duration::from_secs_f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_rate_limit() {
        let err = map_http_error(
            StatusCode::TOO_MANY_REQUESTS,
            "{}",
            Some(Duration::from_secs(3)),
        );
        assert_eq!(
            err,
            LlmError::RateLimited {
                retry_after: Some(Duration::from_secs(3))
            }
        );
    }

    #[test]
    fn test_map_json_validate_failed() {
        let body = r#"{"error":{"message":"bad","code":"json_validate_failed","failed_generation":"{oops"}}"#;
        let err = map_http_error(StatusCode::BAD_REQUEST, body, None);
        assert_eq!(
            err,
            LlmError::InvalidJson {
                failed_generation: Some("{oops".to_string())
            }
        );
    }

    #[test]
    fn test_map_other_bad_request_is_http() {
        let body = r#"{"error":{"message":"context too long"}}"#;
        let err = map_http_error(StatusCode::BAD_REQUEST, body, None);
        assert_eq!(
            err,
            LlmError::Http {
                status: 400,
                message: "context too long".to_string()
            }
        );
    }

    #[test]
    fn test_parse_retry_after_variants() {
        let whole = HeaderValue::from_static("12");
        let fractional = HeaderValue::from_static("1.5");
        let junk = HeaderValue::from_static("soon");
        assert_eq!(parse_retry_after(Some(&whole)), Some(Duration::from_secs(12)));
        assert_eq!(
            parse_retry_after(Some(&fractional)),
            Some(Duration::from_millis(1500))
        );
        assert_eq!(parse_retry_after(Some(&junk)), None);
        assert_eq!(parse_retry_after(None), None);
    }

    #[test]
    fn test_settings_debug_redacts_key() {
        let settings = OpenAiSettings {
            api_key: Some("gsk-secret".into()),
            ..Default::default()
        };
        let debug = format!("{:?}", settings);
        assert!(!debug.contains("gsk-secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
