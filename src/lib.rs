// src/lib.rs
//! Payee entity-resolution engine: canonicalizes raw payee names, retrieves
//! candidates over trigram, phonetic, and vector routes, scores them with a
//! calibrated classifier, and resolves each query to an auto-match, a
//! human-review item, or a no-match.
//!
//! `MatchEngine` is the single-query pipeline; `BatchCoordinator` wraps it
//! with deduplication and a bounded worker pool. Everything the engine uses
//! (store, embedding provider, caches, review queue) is constructed once and
//! injected, never ambient.

pub mod cache;
pub mod canonical;
pub mod config;
pub mod embed;
pub mod error;
pub mod matching;
pub mod metrics;
pub mod models;
pub mod review;
pub mod store;

// Re-export the primary surface at the crate root
pub use config::MatcherConfig;
pub use error::{ErrorKind, MatchError};
pub use matching::{BatchCoordinator, MatchClassifier, MatchEngine, TrainingReport};
pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use models::{
    Label, Location, MatchMethodType, MatchOutcome, MatchQuery, MatchResult, Payee, PayeeId,
    PayeeRecord, ReviewItem, ReviewItemId, ReviewStatus,
};
pub use review::{LabelStore, ReviewQueue};
pub use store::{InMemoryPayeeStore, ReferenceStore};
