//! Core types for Hanzo PII Guard

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coarse entity categories covered by the screening policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntityCategory {
    /// People's names
    Person,
    /// Places, addresses, countries
    Location,
    /// Companies, institutions, agencies
    Organization,
}

impl EntityCategory {
    /// Short NER tag used by CoNLL-style models
    pub fn tag(&self) -> &'static str {
        match self {
            EntityCategory::Person => "PER",
            EntityCategory::Location => "LOC",
            EntityCategory::Organization => "ORG",
        }
    }

    /// Upper-case name used on the wire and in the audit table
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityCategory::Person => "PERSON",
            EntityCategory::Location => "LOCATION",
            EntityCategory::Organization => "ORGANIZATION",
        }
    }
}

impl std::fmt::Display for EntityCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A sensitive entity found in screened text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub category: EntityCategory,
    pub surface_text: String,
}

impl Entity {
    pub fn new(category: EntityCategory, surface_text: impl Into<String>) -> Self {
        Self {
            category,
            surface_text: surface_text.into(),
        }
    }
}

/// Entities found by one screening pass, in detection order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScreeningResult {
    entities: Vec<Entity>,
}

impl ScreeningResult {
    pub fn new(entities: Vec<Entity>) -> Self {
        Self { entities }
    }

    /// A result with no findings
    pub fn clean() -> Self {
        Self::default()
    }

    pub fn is_clean(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Category of the earliest detected entity
    pub fn first_category(&self) -> Option<EntityCategory> {
        self.entities.first().map(|e| e.category)
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn into_entities(self) -> Vec<Entity> {
        self.entities
    }
}

impl FromIterator<Entity> for ScreeningResult {
    fn from_iter<I: IntoIterator<Item = Entity>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Which side of the exchange leaked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalySource {
    /// The user's prompt
    Input,
    /// The model's generated output
    Output,
}

impl AnomalySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalySource::Input => "input",
            AnomalySource::Output => "output",
        }
    }
}

impl std::fmt::Display for AnomalySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit record of one flagged exchange
///
/// Built once by the pipeline and handed to the store; never mutated
/// afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyEvent {
    pub prompt_text: String,
    pub generated_text: String,
    pub anomaly_category: Option<EntityCategory>,
    pub warning_message: Option<String>,
    pub sensitive_data: Vec<Entity>,
    pub source: AnomalySource,
    /// When the pipeline flagged the exchange
    pub timestamp: DateTime<Utc>,
}

/// Identity assigned by the store on insert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordId {
    /// Monotonically increasing row identity
    pub id: i64,
    /// Write time assigned by the store
    pub recorded_at: DateTime<Utc>,
}

/// Response handed back to the caller
///
/// `sensitive_data` is non-empty exactly when `anomaly_category` and
/// `warning_message` are set; only the constructors below build values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardResponse {
    pub generated_text: String,
    pub anomaly_category: Option<EntityCategory>,
    pub warning_message: Option<String>,
    pub sensitive_data: Vec<Entity>,
}

impl GuardResponse {
    /// Nothing sensitive on either side
    pub fn clean(generated_text: impl Into<String>) -> Self {
        Self {
            generated_text: generated_text.into(),
            anomaly_category: None,
            warning_message: None,
            sensitive_data: vec![],
        }
    }

    /// Build a response carrying findings. Falls back to [`GuardResponse::clean`]
    /// when `findings` is empty so the invariant cannot be broken.
    pub fn with_findings(
        generated_text: impl Into<String>,
        warning_message: impl Into<String>,
        findings: ScreeningResult,
    ) -> Self {
        match findings.first_category() {
            None => Self::clean(generated_text),
            Some(category) => Self {
                generated_text: generated_text.into(),
                anomaly_category: Some(category),
                warning_message: Some(warning_message.into()),
                sensitive_data: findings.into_entities(),
            },
        }
    }

    pub fn is_anomalous(&self) -> bool {
        !self.sensitive_data.is_empty()
    }
}

/// Outcome of the audit write for a screening run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AuditStatus {
    /// Clean exchange, nothing to record
    NotRequired,
    /// Anomaly persisted
    Recorded(RecordId),
    /// Anomaly could not be persisted; the block/flag still stands
    Lost { reason: String },
}

impl AuditStatus {
    pub fn is_lost(&self) -> bool {
        matches!(self, AuditStatus::Lost { .. })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::NotRequired => "not-required",
            AuditStatus::Recorded(_) => "recorded",
            AuditStatus::Lost { .. } => "lost",
        }
    }
}

/// Full result of one pass through the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardOutcome {
    pub response: GuardResponse,
    /// Set when the exchange was blocked (input) or flagged (output)
    pub source: Option<AnomalySource>,
    pub audit: AuditStatus,
}

impl GuardOutcome {
    pub fn is_blocked(&self) -> bool {
        self.source == Some(AnomalySource::Input)
    }

    pub fn is_flagged(&self) -> bool {
        self.source == Some(AnomalySource::Output)
    }
}
