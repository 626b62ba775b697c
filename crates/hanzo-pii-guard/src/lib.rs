//! # Hanzo PII Guard
//!
//! Named-entity screening for LLM prompts and completions.
//!
//! The guard sits between a caller and a generative model. Every prompt is
//! screened for people, places and organizations before the model sees it;
//! every answer is screened again before the caller sees it. Anything that
//! trips either check is written to an append-only audit trail.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hanzo_pii_guard::{GuardConfig, GuardPipeline};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pipeline = GuardPipeline::start(GuardConfig::from_env()?).await?;
//!
//!     let outcome = pipeline.screen("What is the capital of France?").await?;
//!     if outcome.response.is_anomalous() {
//!         println!("Flagged: {:?}", outcome.response.warning_message);
//!     } else {
//!         println!("{}", outcome.response.generated_text);
//!     }
//!
//!     pipeline.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌────────┐     ┌──────────────────────────────┐     ┌────────────┐
//! │ Caller │ ──► │        GuardPipeline         │ ──► │ Generation │
//! └────────┘     │                              │     │  Client    │
//!                │ ┌──────────┐   ┌──────────┐  │     └────────────┘
//!                │ │ Entity   │   │ Anomaly  │  │
//!                │ │ Scanner  │   │ Store    │  │
//!                │ └──────────┘   └──────────┘  │
//!                └──────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod generation;
pub mod pipeline;
pub mod scanner;
pub mod store;
pub mod tags;
pub mod types;

pub use config::{GuardConfig, PolicyConfig, StoreBackend};
pub use error::{
    GenerationError, GenerationErrorKind, GuardError, PersistenceError, Result, ScanError,
};
pub use generation::{GenerationClient, OpenAiGenerationClient};
pub use pipeline::{GuardPipeline, GuardPipelineBuilder};
pub use scanner::{EntityScanner, HttpEntityScanner};
pub use store::{AnomalyStore, MemoryAnomalyStore};
#[cfg(feature = "postgres")]
pub use store::PostgresAnomalyStore;
pub use types::*;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::GuardConfig;
    pub use crate::error::{GuardError, Result};
    pub use crate::generation::GenerationClient;
    pub use crate::pipeline::GuardPipeline;
    pub use crate::scanner::EntityScanner;
    pub use crate::store::AnomalyStore;
    pub use crate::types::*;
}
