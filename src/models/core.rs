// src/models/core.rs
// Reference-network entity types: payee identity, upsert records, location context.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::canonical::CanonicalName;

/// Stable identifier for a payee in the reference network.
///
/// Built from the contributing source plus that source's own record id, so
/// re-ingesting the same upstream row always lands on the same payee.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PayeeId(pub String);

impl PayeeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PayeeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a contributing data source (vendor master, ERP export, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceId(pub String);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Optional address context attached to payees and queries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
}

impl Location {
    pub fn is_empty(&self) -> bool {
        self.city.is_none() && self.state.is_none() && self.country.is_none()
    }
}

/// Input shape for reference-network upserts.
#[derive(Debug, Clone)]
pub struct PayeeRecord {
    pub source: SourceId,
    pub source_record_id: String,
    pub raw_name: String,
    pub location: Option<Location>,
    pub embedding: Option<Vec<f32>>,
}

impl PayeeRecord {
    pub fn new(
        source: impl Into<String>,
        source_record_id: impl Into<String>,
        raw_name: impl Into<String>,
    ) -> Self {
        Self {
            source: SourceId(source.into()),
            source_record_id: source_record_id.into(),
            raw_name: raw_name.into(),
            location: None,
            embedding: None,
        }
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Derives the stable payee id for this record.
    pub fn payee_id(&self) -> PayeeId {
        PayeeId(format!("{}:{}", self.source.0, self.source_record_id))
    }
}

/// A canonical entry in the reference network.
///
/// `canonical` is derived from `raw_name` at upsert time; the two are never
/// updated independently.
#[derive(Debug, Clone)]
pub struct Payee {
    pub id: PayeeId,
    pub raw_name: String,
    pub canonical: CanonicalName,
    pub embedding: Option<Vec<f32>>,
    pub location: Option<Location>,
    pub source: SourceId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
