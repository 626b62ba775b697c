//! The screening pipeline: screen input, generate, screen output, record.

use crate::config::{GuardConfig, PolicyConfig, StoreBackend, WITHHELD_PROMPT_MARKER};
use crate::error::{GenerationError, GuardError, Result, ScanError};
use crate::generation::{GenerationClient, OpenAiGenerationClient};
use crate::scanner::{EntityScanner, HttpEntityScanner};
use crate::store::{AnomalyStore, MemoryAnomalyStore};
use crate::types::{
    AnomalyEvent, AnomalySource, AuditStatus, GuardOutcome, GuardResponse, ScreeningResult,
};
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Guard in front of a generative model.
///
/// One call to [`GuardPipeline::screen`] walks the state machine
///
/// ```text
/// Start → ScanInput ─┬─ entities ──→ Blocked  (INPUT event, model never called)
///                    └─ clean ─────→ Generate → ScanOutput ─┬─ entities → Flagged (OUTPUT event)
///                                                           └─ clean ───→ Clean   (nothing recorded)
/// ```
///
/// Every external call is sequential and carries its own deadline. A scanner
/// failure fails the request; it is never read as "no entities".
pub struct GuardPipeline {
    scanner: Arc<dyn EntityScanner>,
    generator: Arc<dyn GenerationClient>,
    store: Arc<dyn AnomalyStore>,
    policy: PolicyConfig,
}

impl GuardPipeline {
    /// Assemble a pipeline from explicit components
    pub fn new(
        scanner: Arc<dyn EntityScanner>,
        generator: Arc<dyn GenerationClient>,
        store: Arc<dyn AnomalyStore>,
        policy: PolicyConfig,
    ) -> Self {
        Self {
            scanner,
            generator,
            store,
            policy,
        }
    }

    /// Create a builder for GuardPipeline
    pub fn builder() -> GuardPipelineBuilder {
        GuardPipelineBuilder::new()
    }

    /// Acquire the configured services: NER endpoint, chat completions API
    /// and the anomaly store (creating the database and table if needed).
    pub async fn start(config: GuardConfig) -> Result<Self> {
        config.validate()?;

        let scanner = HttpEntityScanner::new(config.scanner.clone())
            .map_err(|e| GuardError::Config(e.to_string()))?;
        let generator = OpenAiGenerationClient::new(config.generation.clone())
            .map_err(|e| GuardError::Config(e.to_string()))?;

        if config.generation.api_key.is_none() {
            warn!("No generation API key configured; clean prompts will fail at generation");
        }

        let store: Arc<dyn AnomalyStore> = match config.store.backend {
            StoreBackend::Memory => Arc::new(MemoryAnomalyStore::new()),
            #[cfg(feature = "postgres")]
            StoreBackend::Postgres => {
                Arc::new(crate::store::PostgresAnomalyStore::connect(&config.store).await?)
            }
            #[cfg(not(feature = "postgres"))]
            StoreBackend::Postgres => {
                return Err(GuardError::Config(
                    "postgres store requested but the `postgres` feature is disabled".to_string(),
                ));
            }
        };

        info!(
            scanner = scanner.name(),
            generator = generator.name(),
            store = store.kind(),
            "Guard pipeline started"
        );

        Ok(Self::new(
            Arc::new(scanner),
            Arc::new(generator),
            store,
            config.policy,
        ))
    }

    /// Release the store. In-flight requests should be drained first.
    pub async fn shutdown(&self) -> Result<()> {
        self.store.close().await?;
        info!(store = self.store.kind(), "Guard pipeline stopped");
        Ok(())
    }

    pub fn policy(&self) -> &PolicyConfig {
        &self.policy
    }

    /// Kind of the backing anomaly store
    pub fn store_kind(&self) -> &str {
        self.store.kind()
    }

    /// Screen a prompt and, if it is clean, the model's answer to it
    pub async fn screen(&self, text: &str) -> Result<GuardOutcome> {
        self.validate(text)?;

        // Step 1: input screening
        let input_findings = self.scan(AnomalySource::Input, text).await?;
        if !input_findings.is_clean() {
            return Ok(self.block(text, input_findings).await);
        }

        // Step 2: generation (input is known clean)
        let generated = self.generate(text).await?;

        // Step 3: output screening
        let output_findings = self.scan(AnomalySource::Output, &generated).await?;
        if !output_findings.is_clean() {
            return Ok(self.flag(text, generated, output_findings).await);
        }

        info!(
            prompt_chars = text.chars().count(),
            output_chars = generated.chars().count(),
            "Exchange clean"
        );
        Ok(GuardOutcome {
            response: GuardResponse::clean(generated),
            source: None,
            audit: AuditStatus::NotRequired,
        })
    }

    /// Like [`GuardPipeline::screen`], but gives up with
    /// [`GuardError::Cancelled`] as soon as `cancel` resolves. The in-flight
    /// call is dropped and nothing is recorded.
    pub async fn screen_until<F>(&self, text: &str, cancel: F) -> Result<GuardOutcome>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            biased;
            _ = cancel => {
                debug!("Screening cancelled by caller");
                Err(GuardError::Cancelled)
            }
            outcome = self.screen(text) => outcome,
        }
    }

    fn validate(&self, text: &str) -> Result<()> {
        if text.trim().is_empty() {
            return Err(GuardError::Validation("text must not be empty".to_string()));
        }

        let limit = self.policy.max_prompt_chars;
        if limit > 0 {
            let chars = text.chars().count();
            if chars > limit {
                return Err(GuardError::Validation(format!(
                    "text is {} characters, limit is {}",
                    chars, limit
                )));
            }
        }

        Ok(())
    }

    async fn scan(&self, stage: AnomalySource, text: &str) -> Result<ScreeningResult> {
        let deadline = self.policy.scan_timeout_ms;
        let result = tokio::time::timeout(Duration::from_millis(deadline), self.scanner.scan(text))
            .await
            .map_err(|_| ScanError::Timeout(deadline))
            .and_then(|scan| scan);

        match result {
            Ok(findings) => {
                debug!(stage = %stage, entities = findings.len(), "Screening complete");
                Ok(findings)
            }
            Err(e) => {
                error!(stage = %stage, error = %e, "Screening failed; refusing request");
                Err(e.into())
            }
        }
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let deadline = self.policy.generation_timeout_ms;
        let result =
            tokio::time::timeout(Duration::from_millis(deadline), self.generator.generate(prompt))
                .await
                .map_err(|_| GenerationError::timeout(deadline))
                .and_then(|generated| generated);

        result.map_err(|e| {
            warn!(
                error = %e,
                retryable = e.is_retryable(),
                "Generation failed"
            );
            e.into()
        })
    }

    /// Terminal state for a prompt that carries sensitive entities
    async fn block(&self, prompt: &str, findings: ScreeningResult) -> GuardOutcome {
        let placeholder = self.policy.placeholder_text.clone();
        let response =
            GuardResponse::with_findings(placeholder.clone(), &self.policy.input_warning, findings);

        let prompt_text = if self.policy.retain_blocked_prompt {
            prompt.to_string()
        } else {
            WITHHELD_PROMPT_MARKER.to_string()
        };

        self.finish(AnomalySource::Input, prompt_text, placeholder, response)
            .await
    }

    /// Terminal state for model output that carries sensitive entities
    async fn flag(
        &self,
        prompt: &str,
        generated: String,
        findings: ScreeningResult,
    ) -> GuardOutcome {
        let response =
            GuardResponse::with_findings(generated.clone(), &self.policy.output_warning, findings);

        self.finish(AnomalySource::Output, prompt.to_string(), generated, response)
            .await
    }

    async fn finish(
        &self,
        source: AnomalySource,
        prompt_text: String,
        generated_text: String,
        response: GuardResponse,
    ) -> GuardOutcome {
        warn!(
            source = %source,
            category = ?response.anomaly_category,
            entities = response.sensitive_data.len(),
            "Sensitive data detected"
        );

        let event = AnomalyEvent {
            prompt_text,
            generated_text,
            anomaly_category: response.anomaly_category,
            warning_message: response.warning_message.clone(),
            sensitive_data: response.sensitive_data.clone(),
            source,
            timestamp: Utc::now(),
        };

        let audit = self.record(&event).await;

        GuardOutcome {
            response,
            source: Some(source),
            audit,
        }
    }

    /// Persist the event. A failed write never undoes the decision; it is
    /// reported as [`AuditStatus::Lost`].
    async fn record(&self, event: &AnomalyEvent) -> AuditStatus {
        let deadline = self.policy.record_timeout_ms;
        let written =
            tokio::time::timeout(Duration::from_millis(deadline), self.store.record(event)).await;

        match written {
            Ok(Ok(id)) => {
                debug!(record_id = id.id, source = %event.source, "Anomaly recorded");
                AuditStatus::Recorded(id)
            }
            Ok(Err(e)) => {
                error!(
                    source = %event.source,
                    store = self.store.kind(),
                    error = %e,
                    "Anomaly audit write failed; decision stands but the record is lost"
                );
                AuditStatus::Lost {
                    reason: e.to_string(),
                }
            }
            Err(_) => {
                error!(
                    source = %event.source,
                    store = self.store.kind(),
                    timeout_ms = deadline,
                    "Anomaly audit write timed out; decision stands but the record may be lost"
                );
                AuditStatus::Lost {
                    reason: format!("store write timed out after {}ms", deadline),
                }
            }
        }
    }
}

/// Builder for GuardPipeline
pub struct GuardPipelineBuilder {
    scanner: Option<Arc<dyn EntityScanner>>,
    generator: Option<Arc<dyn GenerationClient>>,
    store: Option<Arc<dyn AnomalyStore>>,
    policy: PolicyConfig,
}

impl GuardPipelineBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self {
            scanner: None,
            generator: None,
            store: None,
            policy: PolicyConfig::default(),
        }
    }

    pub fn scanner(mut self, scanner: Arc<dyn EntityScanner>) -> Self {
        self.scanner = Some(scanner);
        self
    }

    pub fn generator(mut self, generator: Arc<dyn GenerationClient>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn store(mut self, store: Arc<dyn AnomalyStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn policy(mut self, policy: PolicyConfig) -> Self {
        self.policy = policy;
        self
    }

    /// Build the pipeline; every component must be set
    pub fn build(self) -> Result<GuardPipeline> {
        let scanner = self
            .scanner
            .ok_or_else(|| GuardError::Config("scanner not set".to_string()))?;
        let generator = self
            .generator
            .ok_or_else(|| GuardError::Config("generator not set".to_string()))?;
        let store = self
            .store
            .ok_or_else(|| GuardError::Config("store not set".to_string()))?;

        Ok(GuardPipeline::new(scanner, generator, store, self.policy))
    }
}

impl Default for GuardPipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Entity, EntityCategory};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct KeywordScanner;

    #[async_trait]
    impl EntityScanner for KeywordScanner {
        async fn scan(&self, text: &str) -> std::result::Result<ScreeningResult, ScanError> {
            Ok(text
                .split_whitespace()
                .filter(|w| *w == "Alice")
                .map(|w| Entity::new(EntityCategory::Person, w))
                .collect())
        }
    }

    struct Echo(AtomicUsize);

    #[async_trait]
    impl GenerationClient for Echo {
        async fn generate(&self, prompt: &str) -> std::result::Result<String, GenerationError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(format!("you said: {}", prompt))
        }
    }

    fn pipeline(policy: PolicyConfig) -> (GuardPipeline, Arc<Echo>, Arc<MemoryAnomalyStore>) {
        let generator = Arc::new(Echo(AtomicUsize::new(0)));
        let store = Arc::new(MemoryAnomalyStore::new());
        let pipeline = GuardPipeline::builder()
            .scanner(Arc::new(KeywordScanner))
            .generator(generator.clone())
            .store(store.clone())
            .policy(policy)
            .build()
            .unwrap();
        (pipeline, generator, store)
    }

    #[tokio::test]
    async fn test_clean_exchange() {
        let (pipeline, generator, store) = pipeline(PolicyConfig::default());
        let outcome = pipeline.screen("hello there").await.unwrap();

        assert_eq!(outcome.response, GuardResponse::clean("you said: hello there"));
        assert_eq!(outcome.audit, AuditStatus::NotRequired);
        assert_eq!(generator.0.load(Ordering::SeqCst), 1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_blocked_prompt_withheld() {
        let policy = PolicyConfig {
            retain_blocked_prompt: false,
            ..Default::default()
        };
        let (pipeline, generator, store) = pipeline(policy);
        let outcome = pipeline.screen("hi Alice").await.unwrap();

        assert!(outcome.is_blocked());
        assert_eq!(generator.0.load(Ordering::SeqCst), 0);
        assert_eq!(store.snapshot()[0].event.prompt_text, WITHHELD_PROMPT_MARKER);
    }

    #[tokio::test]
    async fn test_whitespace_prompt_rejected() {
        let (pipeline, generator, _) = pipeline(PolicyConfig::default());
        let err = pipeline.screen("   \n\t").await.unwrap_err();

        assert!(err.is_client_error());
        assert_eq!(generator.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_prompt_length_limit() {
        let policy = PolicyConfig {
            max_prompt_chars: 5,
            ..Default::default()
        };
        let (pipeline, _, _) = pipeline(policy);

        assert!(matches!(
            pipeline.screen("far too long").await,
            Err(GuardError::Validation(_))
        ));
        assert!(pipeline.screen("short").await.is_ok());
    }

    #[test]
    fn test_builder_requires_components() {
        let err = GuardPipeline::builder()
            .scanner(Arc::new(KeywordScanner))
            .build()
            .err()
            .unwrap();
        assert!(err.to_string().contains("generator not set"));
    }

    #[tokio::test]
    async fn test_start_with_memory_store() {
        let mut config = GuardConfig::default();
        config.store.backend = StoreBackend::Memory;

        let pipeline = GuardPipeline::start(config).await.unwrap();
        assert_eq!(pipeline.store_kind(), "memory");
        pipeline.shutdown().await.unwrap();
    }
}
