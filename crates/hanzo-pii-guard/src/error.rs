//! Error types for Hanzo PII Guard

use thiserror::Error;

/// Result type alias for guard operations
pub type Result<T> = std::result::Result<T, GuardError>;

/// Top-level error returned by the screening pipeline
#[derive(Debug, Error)]
pub enum GuardError {
    /// Request was rejected before any screening happened
    #[error("Validation error: {0}")]
    Validation(String),

    /// The entity recognition service failed; never treated as "no entities"
    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),

    /// The generation service failed after the input passed screening
    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    /// The anomaly store failed
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The caller went away before the exchange finished
    #[error("Request cancelled")]
    Cancelled,
}

impl GuardError {
    /// Whether the failure was caused by the request itself
    pub fn is_client_error(&self) -> bool {
        matches!(self, GuardError::Validation(_))
    }

    /// Whether retrying the same request may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            GuardError::Scan(e) => e.is_retryable(),
            GuardError::Generation(e) => e.is_retryable(),
            GuardError::Persistence(_) => true,
            _ => false,
        }
    }
}

/// Failure of the entity recognition service
#[derive(Debug, Error)]
pub enum ScanError {
    /// Service could not be reached
    #[error("recognition service unreachable: {0}")]
    Unreachable(String),

    /// Service did not answer in time
    #[error("recognition service timed out after {0}ms")]
    Timeout(u64),

    /// Service answered with a non-success status
    #[error("recognition service returned {status}: {body}")]
    Service { status: u16, body: String },

    /// Service answered with a body we could not interpret
    #[error("malformed recognition response: {0}")]
    MalformedResponse(String),
}

impl ScanError {
    /// Transport failures and 5xx answers may clear up on retry
    pub fn is_retryable(&self) -> bool {
        match self {
            ScanError::Unreachable(_) | ScanError::Timeout(_) => true,
            ScanError::Service { status, .. } => *status >= 500,
            ScanError::MalformedResponse(_) => false,
        }
    }
}

/// Cause of a generation failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationErrorKind {
    /// No answer within the configured timeout
    Timeout,
    /// Upstream returned a 5xx status
    Server { status: u16 },
    /// Connection-level failure
    Transport,
    /// Quota exhausted or rate limited (429)
    Quota,
    /// Upstream rejected the request (other 4xx)
    Rejected { status: u16 },
    /// Upstream answered but the body had no usable completion
    MalformedResponse,
    /// Client is missing required settings (API key, endpoint)
    Configuration,
}

impl GenerationErrorKind {
    /// Classify an HTTP status returned by the generation API
    pub fn from_status(status: u16) -> Self {
        match status {
            429 => GenerationErrorKind::Quota,
            500..=599 => GenerationErrorKind::Server { status },
            _ => GenerationErrorKind::Rejected { status },
        }
    }

    /// Timeouts, 5xx and transport failures are worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GenerationErrorKind::Timeout
                | GenerationErrorKind::Server { .. }
                | GenerationErrorKind::Transport
        )
    }
}

impl std::fmt::Display for GenerationErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GenerationErrorKind::Timeout => write!(f, "timeout"),
            GenerationErrorKind::Server { status } => write!(f, "server error {}", status),
            GenerationErrorKind::Transport => write!(f, "transport"),
            GenerationErrorKind::Quota => write!(f, "quota exhausted"),
            GenerationErrorKind::Rejected { status } => write!(f, "rejected {}", status),
            GenerationErrorKind::MalformedResponse => write!(f, "malformed response"),
            GenerationErrorKind::Configuration => write!(f, "configuration"),
        }
    }
}

/// Failure of the generation service
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct GenerationError {
    pub kind: GenerationErrorKind,
    pub message: String,
}

impl GenerationError {
    pub fn new(kind: GenerationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(after_ms: u64) -> Self {
        Self::new(
            GenerationErrorKind::Timeout,
            format!("no completion after {}ms", after_ms),
        )
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// Failure of the anomaly store
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Could not connect to, or create, the backing database
    #[error("store connection failed: {0}")]
    Connection(String),

    /// The insert itself failed
    #[error("store write failed: {0}")]
    Query(String),

    /// Event could not be encoded for storage
    #[error("event serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The store was already shut down
    #[error("store is closed")]
    Closed,
}
