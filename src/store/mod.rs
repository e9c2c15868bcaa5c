// src/store/mod.rs
// Reference-network storage: the async store trait the engine matches
// against, plus the indexed in-memory implementation.

pub mod trigram;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use std::collections::{BTreeSet, HashMap, HashSet};
use tokio::sync::RwLock;

use crate::canonical::canonicalize;
use crate::embed::cosine_similarity;
use crate::models::{Payee, PayeeId, PayeeRecord};

/// Retrieval surface the matching engine depends on.
///
/// Implementations must be read-your-writes: a completed `upsert` is visible
/// to every later retrieval call.
#[async_trait]
pub trait ReferenceStore: Send + Sync {
    /// Idempotent by payee id. Re-upserting an id with a changed raw name
    /// recomputes its canonical fields and replaces every stale index entry.
    /// The record is authoritative: a `None` embedding clears a stored one.
    async fn upsert(&self, record: PayeeRecord) -> Result<PayeeId>;

    async fn get(&self, id: &PayeeId) -> Result<Option<Payee>>;

    /// Top-k payees by padded-trigram similarity against the canonical
    /// query, highest first, ties broken by ascending id. Scores below
    /// `floor` are never returned.
    async fn trigram_top_k(
        &self,
        canonical: &str,
        k: usize,
        floor: f32,
    ) -> Result<Vec<(PayeeId, f32)>>;

    /// Payees sharing at least one phonetic code, in ascending id order,
    /// capped at `cap`.
    async fn phonetic_match(&self, codes: &[String], cap: usize) -> Result<Vec<PayeeId>>;

    /// Top-k payees by cosine similarity, highest first, ties broken by
    /// ascending id. Only meaningful when `supports_vectors` is true.
    async fn vector_top_k(&self, embedding: &[f32], k: usize) -> Result<Vec<(PayeeId, f32)>>;

    fn supports_vectors(&self) -> bool;

    async fn len(&self) -> Result<usize>;
}

#[derive(Default)]
struct StoreInner {
    payees: HashMap<PayeeId, Payee>,
    // gram -> posting list
    trigram_postings: HashMap<String, HashSet<PayeeId>>,
    // id -> its gram set, kept for similarity scoring and index removal
    trigram_sets: HashMap<PayeeId, HashSet<String>>,
    phonetic_postings: HashMap<String, BTreeSet<PayeeId>>,
    vectors: HashMap<PayeeId, Vec<f32>>,
}

impl StoreInner {
    fn remove_from_indexes(&mut self, id: &PayeeId) {
        if let Some(grams) = self.trigram_sets.remove(id) {
            for gram in grams {
                if let Some(postings) = self.trigram_postings.get_mut(&gram) {
                    postings.remove(id);
                    if postings.is_empty() {
                        self.trigram_postings.remove(&gram);
                    }
                }
            }
        }
        if let Some(old) = self.payees.get(id) {
            for code in &old.canonical.phonetic_codes {
                if let Some(postings) = self.phonetic_postings.get_mut(code) {
                    postings.remove(id);
                    if postings.is_empty() {
                        self.phonetic_postings.remove(code);
                    }
                }
            }
        }
        self.vectors.remove(id);
    }

    fn index(&mut self, payee: &Payee) {
        let grams = trigram::extract_trigrams(&payee.canonical.canonical);
        for gram in &grams {
            self.trigram_postings
                .entry(gram.clone())
                .or_default()
                .insert(payee.id.clone());
        }
        self.trigram_sets.insert(payee.id.clone(), grams);
        for code in &payee.canonical.phonetic_codes {
            self.phonetic_postings
                .entry(code.clone())
                .or_default()
                .insert(payee.id.clone());
        }
        if let Some(ref embedding) = payee.embedding {
            self.vectors.insert(payee.id.clone(), embedding.clone());
        }
    }
}

/// In-memory reference store with inverted trigram and phonetic indexes and
/// a linear-scan vector route. `RwLock` gives unlimited parallel readers.
pub struct InMemoryPayeeStore {
    inner: RwLock<StoreInner>,
}

impl InMemoryPayeeStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
        }
    }
}

impl Default for InMemoryPayeeStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReferenceStore for InMemoryPayeeStore {
    async fn upsert(&self, record: PayeeRecord) -> Result<PayeeId> {
        let id = record.payee_id();
        let canonical = canonicalize(&record.raw_name);
        let mut inner = self.inner.write().await;

        let created_at = inner
            .payees
            .get(&id)
            .map(|existing| existing.created_at)
            .unwrap_or_else(Utc::now);
        inner.remove_from_indexes(&id);

        let payee = Payee {
            id: id.clone(),
            raw_name: record.raw_name,
            canonical,
            embedding: record.embedding,
            location: record.location,
            source: record.source,
            created_at,
            updated_at: Utc::now(),
        };
        inner.index(&payee);
        inner.payees.insert(id.clone(), payee);
        debug!("upserted payee {}", id);
        Ok(id)
    }

    async fn get(&self, id: &PayeeId) -> Result<Option<Payee>> {
        let inner = self.inner.read().await;
        Ok(inner.payees.get(id).cloned())
    }

    async fn trigram_top_k(
        &self,
        canonical: &str,
        k: usize,
        floor: f32,
    ) -> Result<Vec<(PayeeId, f32)>> {
        let query_grams = trigram::extract_trigrams(canonical);
        if query_grams.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let inner = self.inner.read().await;

        let mut seen: HashSet<&PayeeId> = HashSet::new();
        for gram in &query_grams {
            if let Some(postings) = inner.trigram_postings.get(gram) {
                seen.extend(postings.iter());
            }
        }

        let mut scored: Vec<(PayeeId, f32)> = seen
            .into_iter()
            .filter_map(|id| {
                let grams = inner.trigram_sets.get(id)?;
                let score = trigram::similarity(&query_grams, grams);
                (score >= floor).then(|| (id.clone(), score))
            })
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(k);
        Ok(scored)
    }

    async fn phonetic_match(&self, codes: &[String], cap: usize) -> Result<Vec<PayeeId>> {
        if codes.is_empty() || cap == 0 {
            return Ok(Vec::new());
        }
        let inner = self.inner.read().await;
        let mut ids: BTreeSet<PayeeId> = BTreeSet::new();
        for code in codes {
            if let Some(postings) = inner.phonetic_postings.get(code) {
                ids.extend(postings.iter().cloned());
            }
        }
        Ok(ids.into_iter().take(cap).collect())
    }

    async fn vector_top_k(&self, embedding: &[f32], k: usize) -> Result<Vec<(PayeeId, f32)>> {
        if embedding.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let inner = self.inner.read().await;
        let mut scored: Vec<(PayeeId, f32)> = inner
            .vectors
            .iter()
            .map(|(id, vector)| (id.clone(), cosine_similarity(embedding, vector)))
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(k);
        Ok(scored)
    }

    fn supports_vectors(&self) -> bool {
        true
    }

    async fn len(&self) -> Result<usize> {
        let inner = self.inner.read().await;
        Ok(inner.payees.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Location;

    fn record(source_record_id: &str, raw_name: &str) -> PayeeRecord {
        PayeeRecord::new("vendor_master", source_record_id, raw_name)
    }

    #[tokio::test]
    async fn upsert_then_get_is_read_your_writes() {
        let store = InMemoryPayeeStore::new();
        let id = store.upsert(record("1", "Microsoft Corporation")).await.unwrap();
        let payee = store.get(&id).await.unwrap().unwrap();
        assert_eq!(payee.canonical.canonical, "microsoft");
        assert_eq!(store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn upsert_same_id_is_idempotent() {
        let store = InMemoryPayeeStore::new();
        let first = store.upsert(record("1", "Acme Corp")).await.unwrap();
        let second = store.upsert(record("1", "Acme Corp")).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn reupsert_with_new_name_reindexes() {
        let store = InMemoryPayeeStore::new();
        let id = store.upsert(record("1", "Acme Corp")).await.unwrap();
        store.upsert(record("1", "Globex Corporation")).await.unwrap();

        let hits = store.trigram_top_k("globex", 10, 0.1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, id);

        // stale postings for the old name are gone
        let stale = store.trigram_top_k("acme", 10, 0.1).await.unwrap();
        assert!(stale.is_empty());
    }

    #[tokio::test]
    async fn reupsert_preserves_created_at() {
        let store = InMemoryPayeeStore::new();
        let id = store.upsert(record("1", "Acme Corp")).await.unwrap();
        let created = store.get(&id).await.unwrap().unwrap().created_at;
        store.upsert(record("1", "Acme Holdings")).await.unwrap();
        let after = store.get(&id).await.unwrap().unwrap();
        assert_eq!(after.created_at, created);
        assert!(after.updated_at >= created);
    }

    #[tokio::test]
    async fn trigram_ranks_exact_above_variant() {
        let store = InMemoryPayeeStore::new();
        store.upsert(record("1", "Amazon.com Inc")).await.unwrap();
        store.upsert(record("2", "Amazonia Imports")).await.unwrap();
        store.upsert(record("3", "Wayfair LLC")).await.unwrap();

        let hits = store.trigram_top_k("amazon com", 10, 0.1).await.unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].0.as_str(), "vendor_master:1");
        assert!((hits[0].1 - 1.0).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn trigram_floor_filters_weak_hits() {
        let store = InMemoryPayeeStore::new();
        store.upsert(record("1", "Amazon")).await.unwrap();
        // shares one boundary trigram at most
        let hits = store.trigram_top_k("aardvark", 10, 0.3).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn phonetic_match_is_ordered_and_capped() {
        let store = InMemoryPayeeStore::new();
        store.upsert(record("2", "Smith Consulting")).await.unwrap();
        store.upsert(record("1", "Smyth Consulting")).await.unwrap();
        store.upsert(record("3", "Jones Plumbing")).await.unwrap();

        let codes = canonicalize("Smith").phonetic_codes;
        let hits = store.phonetic_match(&codes, 10).await.unwrap();
        assert_eq!(hits.len(), 2);
        // ascending id order regardless of insertion order
        assert_eq!(hits[0].as_str(), "vendor_master:1");
        assert_eq!(hits[1].as_str(), "vendor_master:2");

        let capped = store.phonetic_match(&codes, 1).await.unwrap();
        assert_eq!(capped.len(), 1);
        assert_eq!(capped[0].as_str(), "vendor_master:1");
    }

    #[tokio::test]
    async fn vector_top_k_ranks_by_cosine() {
        let store = InMemoryPayeeStore::new();
        store
            .upsert(record("1", "Acme").with_embedding(vec![1.0, 0.0]))
            .await
            .unwrap();
        store
            .upsert(record("2", "Globex").with_embedding(vec![0.0, 1.0]))
            .await
            .unwrap();

        let hits = store.vector_top_k(&[1.0, 0.0], 10).await.unwrap();
        assert_eq!(hits[0].0.as_str(), "vendor_master:1");
        assert!(hits[0].1 > hits[1].1);
    }

    #[tokio::test]
    async fn location_survives_round_trip() {
        let store = InMemoryPayeeStore::new();
        let id = store
            .upsert(record("1", "Acme").with_location(Location {
                city: Some("Seattle".to_string()),
                state: Some("WA".to_string()),
                country: None,
            }))
            .await
            .unwrap();
        let payee = store.get(&id).await.unwrap().unwrap();
        assert_eq!(payee.location.unwrap().city.as_deref(), Some("Seattle"));
    }
}
