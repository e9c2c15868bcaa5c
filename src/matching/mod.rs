// src/matching/mod.rs
pub mod batch;
pub mod candidates;
pub mod classifier;
pub mod decision;
pub mod engine;
pub mod features;

// Re-export the matching surface for clean API
pub use batch::BatchCoordinator;
pub use candidates::CandidateGenerator;
pub use classifier::{MatchClassifier, TrainingReport};
pub use decision::{ClassifiedCandidate, Decision, DecisionEngine};
pub use engine::MatchEngine;
pub use features::{FeatureVector, FEATURE_COUNT};
