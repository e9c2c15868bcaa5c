// src/models/mod.rs
pub mod core;
pub mod matching;
pub mod review;

// Re-export the shapes most callers need
pub use self::core::{Location, Payee, PayeeId, PayeeRecord, SourceId};
pub use matching::{
    CandidateScore, MatchMethodType, MatchOutcome, MatchQuery, MatchResult, ScoredCandidate,
};
pub use review::{Label, ReviewItem, ReviewItemId, ReviewStatus};
