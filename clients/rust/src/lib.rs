//! Deterministic A/B test assignment with sticky storage and batched event
//! delivery.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ab_testing::{Engine, FileStore, TracingSink, PartialContext};
//!
//! let engine = Engine::builder(
//!     Arc::new(FileStore::new("assignments.json")),
//!     Arc::new(TracingSink),
//! )
//! .build();
//! engine.initialize(ab_testing::loader::load_default_tests()?).await;
//!
//! let result = engine.get_variant("promo-banner", Some(PartialContext::new().user("u1")));
//! if result.in_test && result.variant_id == "B" {
//!     // render the bold banner
//! }
//! engine.shutdown().await;
//! ```

pub mod assignment;
pub mod config;
pub mod context;
pub mod engine;
pub mod events;
pub mod hashing;
pub mod loader;
pub mod model;
pub mod registry;
pub mod scheduler;
pub mod sink;
pub mod store;
pub mod targeting;
pub mod testing;

use std::time::Duration;

pub use ab_testing_validation::ValidationError;
use thiserror::Error;

pub use assignment::{
    AssignmentResult, AssignmentSource, Assignments, CONTROL_SENTINEL, ExclusionReason,
};
pub use config::EngineConfig;
pub use context::{
    ContextProvider, PartialContext, StaticContextProvider, UserContext, new_session_id,
};
pub use engine::{Clock, DebugInfo, Engine, EngineBuilder, InitReport, ManualClock, SystemClock};
pub use events::{Event, EventDetails, EventType, Properties};
pub use model::{Test, TestStatus, Variant};
pub use scheduler::FlushOutcome;
#[cfg(feature = "http")]
pub use sink::HttpSink;
pub use sink::{AnalyticsSink, JsonLinesSink, MemorySink, TracingSink};
pub use store::{AssignmentStore, FileStore, MemoryStore};
pub use targeting::{Operator, RuleType, RuleValue, TargetingRule};
pub use testing::OverrideGuard;

/// A test definition the engine refuses to register or use.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Test id must not be empty")]
    EmptyTestId,

    #[error("Test '{test_id}' has no variants")]
    NoVariants { test_id: String },

    #[error("Test '{test_id}' declares variant '{variant_id}' more than once")]
    DuplicateVariant { test_id: String, variant_id: String },

    #[error("Variant '{variant_id}' of test '{test_id}' has weight {weight}, expected 0-100")]
    InvalidWeight {
        test_id: String,
        variant_id: String,
        weight: f64,
    },

    #[error("Test '{test_id}' has traffic allocation {value}, expected 0-100")]
    InvalidTrafficAllocation { test_id: String, value: f64 },

    #[error("Test '{test_id}' has invalid regex '{pattern}': {source}")]
    InvalidPattern {
        test_id: String,
        pattern: String,
        source: regex::Error,
    },

    #[error("Unknown test: {test_id}")]
    UnknownTest { test_id: String },

    #[error("Unknown variant '{variant_id}' for test '{test_id}'")]
    UnknownVariant { test_id: String, variant_id: String },

    #[error("Definition error: {0}")]
    Definition(#[from] ValidationError),

    #[error("Failed to parse test '{test_id}': {source}")]
    Parse {
        test_id: String,
        source: serde_json::Error,
    },
}

/// Assignment store failure. Logged by the engine, never returned to callers
/// of `get_variant`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to replace assignment file: {0}")]
    Persist(#[from] tempfile::PersistError),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Analytics sink failure. The batch stays queued for the next flush.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Delivery timed out after {0:?}")]
    Timeout(Duration),

    #[error("Delivery rejected: {0}")]
    Rejected(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "http")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Collector responded with status {status}")]
    HttpStatus { status: u16 },
}

pub type Result<T> = std::result::Result<T, ConfigurationError>;
