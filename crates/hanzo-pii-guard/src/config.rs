//! Configuration for Hanzo PII Guard

use crate::error::{GuardError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default input placeholder returned when a prompt is blocked
pub const DEFAULT_PLACEHOLDER: &str = "Data was not provided to AI";

/// Default warning for a blocked prompt
pub const DEFAULT_INPUT_WARNING: &str =
    "Sensitive data detected in user input. Please remove sensitive information and try again.";

/// Default warning for flagged model output
pub const DEFAULT_OUTPUT_WARNING: &str =
    "Sensitive data detected in AI generated Output. Please do not ask for sensitive information and try again.";

/// Stored in place of the prompt when blocked prompts are not retained
pub const WITHHELD_PROMPT_MARKER: &str = "[prompt withheld]";

/// Main configuration for the guard pipeline
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct GuardConfig {
    /// Entity recognition service
    pub scanner: ScannerConfig,
    /// Generation service
    pub generation: GenerationConfig,
    /// Anomaly store
    pub store: StoreConfig,
    /// Screening policy and stage deadlines
    pub policy: PolicyConfig,
}

impl GuardConfig {
    /// Load from a TOML file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_toml_file(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides
    pub fn from_env() -> Result<Self> {
        Self::load(None)
    }

    /// Parse a TOML file; missing keys fall back to defaults
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            GuardError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| GuardError::Config(e.to_string()))
    }

    /// Apply overrides from process environment variables
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable source. Unrecognized
    /// values are rejected rather than ignored.
    pub fn apply_vars<F>(&mut self, var: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| var(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("NER_API_URL") {
            self.scanner.endpoint = v;
        }
        if let Some(v) = get("NER_API_TOKEN").or_else(|| get("HF_API_TOKEN")) {
            self.scanner.api_token = Some(v);
        }
        if let Some(v) = get("OPENAI_API_KEY") {
            self.generation.api_key = Some(v);
        }
        if let Some(v) = get("OPENAI_API_BASE") {
            self.generation.api_base = v;
        }
        if let Some(v) = get("OPENAI_MODEL") {
            self.generation.model = v;
        }
        if let Some(v) = get("GUARD_STORE") {
            self.store.backend = match v.trim().to_lowercase().as_str() {
                "memory" => StoreBackend::Memory,
                "postgres" | "postgresql" => StoreBackend::Postgres,
                other => {
                    return Err(GuardError::Config(format!(
                        "GUARD_STORE must be `postgres` or `memory`, got `{}`",
                        other
                    )));
                }
            };
        }
        if let Some(v) = get("DATABASE_URL") {
            self.store.url = Some(v);
        }
        if let Some(v) = get("POSTGRES_HOST") {
            self.store.host = v;
        }
        if let Some(v) = get("POSTGRES_PORT") {
            self.store.port = v.trim().parse().map_err(|_| {
                GuardError::Config(format!("POSTGRES_PORT is not a valid port: `{}`", v))
            })?;
        }
        if let Some(v) = get("POSTGRES_USER") {
            self.store.user = v;
        }
        if let Some(v) = get("POSTGRES_PASSWORD") {
            self.store.password = Some(v);
        }
        if let Some(v) = get("POSTGRES_DB") {
            self.store.database = v;
        }

        Ok(())
    }

    /// Reject settings that would disable a deadline or an endpoint
    pub fn validate(&self) -> Result<()> {
        if self.scanner.endpoint.trim().is_empty() {
            return Err(GuardError::Config("scanner endpoint is empty".to_string()));
        }
        if self.generation.api_base.trim().is_empty() {
            return Err(GuardError::Config("generation api_base is empty".to_string()));
        }
        if self.generation.model.trim().is_empty() {
            return Err(GuardError::Config("generation model is empty".to_string()));
        }

        let timeouts = [
            ("scanner.timeout_ms", self.scanner.timeout_ms),
            ("generation.timeout_ms", self.generation.timeout_ms),
            ("store.connect_timeout_ms", self.store.connect_timeout_ms),
            ("policy.scan_timeout_ms", self.policy.scan_timeout_ms),
            ("policy.generation_timeout_ms", self.policy.generation_timeout_ms),
            ("policy.record_timeout_ms", self.policy.record_timeout_ms),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                return Err(GuardError::Config(format!("{} must be greater than 0", name)));
            }
        }

        if self.store.backend == StoreBackend::Postgres && self.store.max_connections == 0 {
            return Err(GuardError::Config(
                "store.max_connections must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Entity recognition service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Token classification endpoint
    pub endpoint: String,
    /// Bearer token for the endpoint
    pub api_token: Option<String>,
    /// HTTP timeout in milliseconds
    pub timeout_ms: u64,
    /// Drop token predictions scored below this
    pub min_score: f32,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api-inference.huggingface.co/models/dbmdz/bert-large-cased-finetuned-conll03-english"
                .to_string(),
            api_token: None,
            timeout_ms: 10_000,
            min_score: 0.0,
        }
    }
}

/// Generation service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Base URL of the OpenAI-compatible API
    pub api_base: String,
    /// API key
    pub api_key: Option<String>,
    /// Model name
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// HTTP timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-3.5-turbo".to_string(),
            temperature: None,
            max_tokens: None,
            timeout_ms: 60_000,
        }
    }
}

/// Which store implementation to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// PostgreSQL `anomalies` table
    Postgres,
    /// Process-local, lost on restart
    Memory,
}

/// Anomaly store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Full connection URL; takes precedence over the discrete fields
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    /// Database holding the anomalies table, created if absent
    pub database: String,
    /// Database used to create `database` when it does not exist yet
    pub maintenance_database: String,
    pub max_connections: u32,
    pub connect_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Postgres,
            url: None,
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: None,
            database: "anomalies".to_string(),
            maintenance_database: "postgres".to_string(),
            max_connections: 5,
            connect_timeout_ms: 10_000,
        }
    }
}

/// Screening policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Returned as generated text when the prompt is blocked
    pub placeholder_text: String,
    /// Warning attached to blocked prompts
    pub input_warning: String,
    /// Warning attached to flagged model output
    pub output_warning: String,
    /// Keep the real prompt in INPUT audit rows
    pub retain_blocked_prompt: bool,
    /// Longest accepted prompt in characters, 0 for no limit
    pub max_prompt_chars: usize,
    /// Deadline for each screening call
    pub scan_timeout_ms: u64,
    /// Deadline for the generation call
    pub generation_timeout_ms: u64,
    /// Deadline for the audit write
    pub record_timeout_ms: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            placeholder_text: DEFAULT_PLACEHOLDER.to_string(),
            input_warning: DEFAULT_INPUT_WARNING.to_string(),
            output_warning: DEFAULT_OUTPUT_WARNING.to_string(),
            retain_blocked_prompt: true,
            max_prompt_chars: 16_384,
            scan_timeout_ms: 10_000,
            generation_timeout_ms: 60_000,
            record_timeout_ms: 5_000,
        }
    }
}
