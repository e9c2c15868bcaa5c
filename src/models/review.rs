// src/models/review.rs
// Human-review queue items and the labels they emit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::models::core::PayeeId;
use crate::models::matching::ScoredCandidate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReviewItemId(pub Uuid);

impl ReviewItemId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ReviewItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ReviewItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReviewStatus {
    Open,
    Approved,
    Rejected,
}

/// An uncertain decision queued for a human.
///
/// The candidate list is a snapshot taken at decision time; later upserts or
/// retraining never mutate it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewItem {
    pub id: ReviewItemId,
    pub raw_name: String,
    pub canonical_name: String,
    pub candidates: Vec<ScoredCandidate>,
    pub status: ReviewStatus,
    pub reviewer: Option<String>,
    pub created_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

impl ReviewItem {
    pub fn new(
        raw_name: impl Into<String>,
        canonical_name: impl Into<String>,
        candidates: Vec<ScoredCandidate>,
    ) -> Self {
        Self {
            id: ReviewItemId::new(),
            raw_name: raw_name.into(),
            canonical_name: canonical_name.into(),
            candidates,
            status: ReviewStatus::Open,
            reviewer: None,
            created_at: Utc::now(),
            reviewed_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == ReviewStatus::Open
    }
}

/// One human judgement: does this query refer to this payee?
///
/// Labels are append-only and feed offline retraining.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Label {
    pub id: Uuid,
    pub raw_name: String,
    pub canonical_name: String,
    pub payee_id: PayeeId,
    pub same_entity: bool,
    pub features: Option<Vec<f64>>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Label {
    pub fn new(
        raw_name: impl Into<String>,
        canonical_name: impl Into<String>,
        payee_id: PayeeId,
        same_entity: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            raw_name: raw_name.into(),
            canonical_name: canonical_name.into(),
            payee_id,
            same_entity,
            features: None,
            metadata: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    pub fn with_features(mut self, features: Vec<f64>) -> Self {
        self.features = Some(features);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}
