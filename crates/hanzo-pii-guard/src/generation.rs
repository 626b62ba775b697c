//! Text generation via an OpenAI-compatible chat completions API

use crate::config::GenerationConfig;
use crate::error::{GenerationError, GenerationErrorKind};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

/// Produces model output for a prompt.
///
/// The pipeline only calls this after the prompt passed input screening.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    async fn generate(&self, prompt: &str) -> std::result::Result<String, GenerationError>;

    /// Short name used in logs
    fn name(&self) -> &str {
        "generation-client"
    }
}

/// Client for `POST {api_base}/chat/completions`
pub struct OpenAiGenerationClient {
    config: GenerationConfig,
    client: reqwest::Client,
}

impl OpenAiGenerationClient {
    /// Create a new client
    pub fn new(config: GenerationConfig) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| {
                GenerationError::new(
                    GenerationErrorKind::Configuration,
                    format!("failed to build HTTP client: {}", e),
                )
            })?;

        Ok(Self { config, client })
    }

    fn request_body(&self, prompt: &str) -> Value {
        let mut body = json!({
            "model": self.config.model,
            "messages": [
                {
                    "role": "user",
                    "content": prompt,
                }
            ],
        });

        if let Some(temp) = self.config.temperature {
            body["temperature"] = json!(temp);
        }
        if let Some(max_tokens) = self.config.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }

        body
    }

    fn map_transport_error(&self, err: reqwest::Error) -> GenerationError {
        if err.is_timeout() {
            GenerationError::timeout(self.config.timeout_ms)
        } else {
            GenerationError::new(GenerationErrorKind::Transport, err.to_string())
        }
    }
}

#[async_trait]
impl GenerationClient for OpenAiGenerationClient {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let api_key = self.config.api_key.as_ref().ok_or_else(|| {
            GenerationError::new(GenerationErrorKind::Configuration, "API key not set")
        })?;

        debug!(model = %self.config.model, "Calling chat completions");

        let response = self
            .client
            .post(format!(
                "{}/chat/completions",
                self.config.api_base.trim_end_matches('/')
            ))
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&self.request_body(prompt))
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(classify_failure(status.as_u16(), error_text));
        }

        let response_json: Value = response.json().await.map_err(|e| {
            GenerationError::new(GenerationErrorKind::MalformedResponse, e.to_string())
        })?;

        parse_completion(&response_json)
    }

    fn name(&self) -> &str {
        "openai-chat"
    }
}

/// Map a non-success answer to an error kind. OpenAI reports an exhausted
/// quota either as 429 or with an `insufficient_quota` code on other statuses.
fn classify_failure(status: u16, body: String) -> GenerationError {
    let kind = if body.contains("insufficient_quota") {
        GenerationErrorKind::Quota
    } else {
        GenerationErrorKind::from_status(status)
    };
    GenerationError::new(kind, format!("API error {}: {}", status, body))
}

/// Extract the first choice's message content
fn parse_completion(response: &Value) -> Result<String, GenerationError> {
    let content = response["choices"]
        .get(0)
        .and_then(|choice| choice["message"]["content"].as_str())
        .ok_or_else(|| {
            GenerationError::new(
                GenerationErrorKind::MalformedResponse,
                "No message content in response",
            )
        })?;

    Ok(content.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_completion_trims() {
        let response = json!({
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "  Paris\n"}}]
        });
        assert_eq!(parse_completion(&response).unwrap(), "Paris");
    }

    #[test]
    fn test_parse_completion_missing_content() {
        let response = json!({"choices": []});
        let err = parse_completion(&response).unwrap_err();
        assert_eq!(err.kind, GenerationErrorKind::MalformedResponse);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_classify_failure() {
        assert_eq!(classify_failure(429, String::new()).kind, GenerationErrorKind::Quota);
        assert_eq!(
            classify_failure(403, r#"{"error":{"code":"insufficient_quota"}}"#.into()).kind,
            GenerationErrorKind::Quota
        );
        assert!(classify_failure(502, "bad gateway".into()).is_retryable());
        assert!(!classify_failure(400, "bad request".into()).is_retryable());
    }

    #[test]
    fn test_request_body_settings() {
        let client = OpenAiGenerationClient::new(GenerationConfig {
            temperature: Some(0.2),
            max_tokens: Some(64),
            ..Default::default()
        })
        .unwrap();

        let body = client.request_body("hello");
        assert_eq!(body["model"], "gpt-3.5-turbo");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "hello");
        assert_eq!(body["max_tokens"], 64);
    }
}
