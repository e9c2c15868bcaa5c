// src/models/matching.rs
// Query and result types for the matching pipeline.

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::models::core::{Location, PayeeId};
use crate::models::review::ReviewItemId;

/// A single name lookup against the reference network.
#[derive(Debug, Clone)]
pub struct MatchQuery {
    pub raw_name: String,
    pub location: Option<Location>,
}

impl MatchQuery {
    pub fn new(raw_name: impl Into<String>) -> Self {
        Self {
            raw_name: raw_name.into(),
            location: None,
        }
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }
}

/// Which retrieval route dominated an auto-match decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchMethodType {
    Exact,
    Fuzzy,
    Phonetic,
    Vector,
    HighConfidence,
}

impl MatchMethodType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchMethodType::Exact => "exact",
            MatchMethodType::Fuzzy => "fuzzy",
            MatchMethodType::Phonetic => "phonetic",
            MatchMethodType::Vector => "vector",
            MatchMethodType::HighConfidence => "high_confidence",
        }
    }
}

/// Per-route retrieval detail for one candidate, accumulated while the
/// generator unions the trigram, phonetic, and vector routes.
#[derive(Debug, Clone)]
pub struct CandidateScore {
    pub payee_id: PayeeId,
    pub trigram_score: Option<f32>,
    pub phonetic_hit: bool,
    pub vector_score: Option<f32>,
}

impl CandidateScore {
    pub fn new(payee_id: PayeeId) -> Self {
        Self {
            payee_id,
            trigram_score: None,
            phonetic_hit: false,
            vector_score: None,
        }
    }

    /// Best available retrieval score, used only to rank overflow before the
    /// union cap. Phonetic-only hits rank below any scored route.
    pub fn rank_score(&self) -> f32 {
        let trigram = self.trigram_score.unwrap_or(0.0);
        let vector = self.vector_score.unwrap_or(0.0);
        let phonetic = if self.phonetic_hit { 0.3 } else { 0.0 };
        trigram.max(vector).max(phonetic)
    }
}

/// A classified candidate frozen into results and review snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub payee_id: PayeeId,
    pub probability: f64,
    pub features: Vec<f64>,
}

/// Outcome of one lookup. Exhaustively matched at every call site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MatchOutcome {
    Matched {
        payee_id: PayeeId,
        confidence: f64,
        method: MatchMethodType,
        reasoning: String,
    },
    Review {
        review_item_id: ReviewItemId,
    },
    NoMatch {
        confidence: f64,
        reasoning: Option<String>,
    },
    Error {
        kind: ErrorKind,
    },
}

impl MatchOutcome {
    pub fn is_matched(&self) -> bool {
        matches!(self, MatchOutcome::Matched { .. })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, MatchOutcome::Error { .. })
    }
}

/// Returned per query; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResult {
    pub raw_name: String,
    pub canonical_name: Option<String>,
    pub outcome: MatchOutcome,
}

impl MatchResult {
    pub fn error(raw_name: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            raw_name: raw_name.into(),
            canonical_name: None,
            outcome: MatchOutcome::Error { kind },
        }
    }
}
