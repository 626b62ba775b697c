//! Entity screening via an external token classification (NER) service

use crate::config::ScannerConfig;
use crate::error::ScanError;
use crate::tags::{self, TokenPrediction};
use crate::types::ScreeningResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Finds allow-listed entities in text.
///
/// Implementations must fail with [`ScanError`] when the underlying service
/// cannot answer; an empty result always means "looked and found nothing".
#[async_trait]
pub trait EntityScanner: Send + Sync {
    async fn scan(&self, text: &str) -> std::result::Result<ScreeningResult, ScanError>;

    /// Short name used in logs
    fn name(&self) -> &str {
        "entity-scanner"
    }
}

/// Scanner backed by a Hugging Face style token classification endpoint
pub struct HttpEntityScanner {
    config: ScannerConfig,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ScanRequest<'a> {
    inputs: &'a str,
}

/// Accepts both the per-token and the aggregated output shapes
#[derive(Debug, Deserialize)]
struct RawPrediction {
    #[serde(default)]
    entity: Option<String>,
    #[serde(default)]
    entity_group: Option<String>,
    word: String,
    #[serde(default)]
    score: Option<f32>,
    #[serde(default)]
    index: Option<usize>,
    #[serde(default)]
    start: Option<usize>,
    #[serde(default)]
    end: Option<usize>,
}

impl RawPrediction {
    fn into_prediction(self) -> Option<TokenPrediction> {
        let tag = self.entity.or(self.entity_group)?;
        Some(TokenPrediction {
            tag,
            word: self.word,
            score: self.score,
            index: self.index,
            start: self.start,
            end: self.end,
        })
    }
}

impl HttpEntityScanner {
    /// Create a new scanner
    pub fn new(config: ScannerConfig) -> Result<Self, ScanError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| ScanError::Unreachable(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    fn map_transport_error(&self, err: reqwest::Error) -> ScanError {
        if err.is_timeout() {
            ScanError::Timeout(self.config.timeout_ms)
        } else {
            ScanError::Unreachable(err.to_string())
        }
    }

    /// Call the recognition service and return raw token predictions
    pub async fn predict(&self, text: &str) -> Result<Vec<TokenPrediction>, ScanError> {
        let mut req = self
            .client
            .post(&self.config.endpoint)
            .json(&ScanRequest { inputs: text });

        if let Some(ref token) = self.config.api_token {
            req = req.header("Authorization", format!("Bearer {}", token));
        }

        let response = req.send().await.map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ScanError::Service {
                status: status.as_u16(),
                body,
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ScanError::MalformedResponse(e.to_string()))?;

        parse_predictions(body)
    }
}

#[async_trait]
impl EntityScanner for HttpEntityScanner {
    async fn scan(&self, text: &str) -> Result<ScreeningResult, ScanError> {
        let predictions: Vec<TokenPrediction> = self
            .predict(text)
            .await?
            .into_iter()
            .filter(|p| p.score.unwrap_or(1.0) >= self.config.min_score)
            .collect();

        let result = tags::collapse(text, &predictions);
        debug!(
            tokens = predictions.len(),
            entities = result.len(),
            "NER scan complete"
        );
        Ok(result)
    }

    fn name(&self) -> &str {
        "http-ner"
    }
}

/// Decode a token classification response.
///
/// Single inputs come back as a flat list; some deployments wrap it in an
/// outer batch list.
fn parse_predictions(body: Value) -> Result<Vec<TokenPrediction>, ScanError> {
    let items = match body {
        Value::Array(items) => items,
        Value::Object(ref obj) if obj.contains_key("error") => {
            return Err(ScanError::MalformedResponse(format!(
                "service reported error: {}",
                obj["error"]
            )));
        }
        other => {
            return Err(ScanError::MalformedResponse(format!(
                "expected a list of predictions, got {}",
                other
            )));
        }
    };

    let items = match items.first() {
        Some(Value::Array(_)) => items
            .into_iter()
            .flat_map(|batch| match batch {
                Value::Array(inner) => inner,
                _ => vec![],
            })
            .collect(),
        _ => items,
    };

    items
        .into_iter()
        .map(|item| {
            serde_json::from_value::<RawPrediction>(item)
                .map_err(|e| ScanError::MalformedResponse(e.to_string()))
        })
        .filter_map(|raw| match raw {
            Ok(raw) => raw.into_prediction().map(Ok),
            Err(e) => Some(Err(e)),
        })
        .collect()
}
