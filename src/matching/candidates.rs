// src/matching/candidates.rs
// Candidate retrieval: union of the trigram, phonetic, and vector routes,
// deduplicated by payee id with per-route provenance kept for the feature
// extractor.

use anyhow::{Context, Result};
use log::debug;
use std::collections::HashMap;
use std::sync::Arc;

use crate::canonical::CanonicalName;
use crate::config::MatcherConfig;
use crate::models::matching::CandidateScore;
use crate::models::PayeeId;
use crate::store::ReferenceStore;

pub struct CandidateGenerator {
    store: Arc<dyn ReferenceStore>,
    config: MatcherConfig,
}

impl CandidateGenerator {
    pub fn new(store: Arc<dyn ReferenceStore>, config: MatcherConfig) -> Self {
        Self { store, config }
    }

    /// Retrieves the candidate union for one canonical query.
    ///
    /// An empty return means no route produced anything; the caller
    /// short-circuits to NoMatch without classifying. The union is capped by
    /// dropping the lowest-ranked overflow, ties broken by ascending id.
    pub async fn generate(
        &self,
        canonical: &CanonicalName,
        embedding: Option<&[f32]>,
    ) -> Result<Vec<CandidateScore>> {
        let trigram_fut = self.store.trigram_top_k(
            &canonical.canonical,
            self.config.trigram_top_k,
            self.config.trigram_floor,
        );
        let phonetic_fut = self
            .store
            .phonetic_match(&canonical.phonetic_codes, self.config.phonetic_cap);
        let (trigram_hits, phonetic_hits) = tokio::join!(trigram_fut, phonetic_fut);
        let trigram_hits = trigram_hits.context("trigram retrieval failed")?;
        let phonetic_hits = phonetic_hits.context("phonetic retrieval failed")?;

        let vector_hits = match embedding {
            Some(vector) if self.store.supports_vectors() => self
                .store
                .vector_top_k(vector, self.config.vector_top_k)
                .await
                .context("vector retrieval failed")?,
            _ => Vec::new(),
        };

        let mut merged: HashMap<PayeeId, CandidateScore> = HashMap::new();
        for (id, score) in &trigram_hits {
            merged
                .entry(id.clone())
                .or_insert_with(|| CandidateScore::new(id.clone()))
                .trigram_score = Some(*score);
        }
        for id in &phonetic_hits {
            merged
                .entry(id.clone())
                .or_insert_with(|| CandidateScore::new(id.clone()))
                .phonetic_hit = true;
        }
        for (id, score) in &vector_hits {
            merged
                .entry(id.clone())
                .or_insert_with(|| CandidateScore::new(id.clone()))
                .vector_score = Some(*score);
        }

        let mut candidates: Vec<CandidateScore> = merged.into_values().collect();
        candidates.sort_by(|a, b| {
            b.rank_score()
                .partial_cmp(&a.rank_score())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.payee_id.cmp(&b.payee_id))
        });
        if candidates.len() > self.config.max_candidates {
            candidates.truncate(self.config.max_candidates);
        }

        debug!(
            "candidate union for '{}': {} trigram, {} phonetic, {} vector -> {} distinct",
            canonical.canonical,
            trigram_hits.len(),
            phonetic_hits.len(),
            vector_hits.len(),
            candidates.len()
        );
        Ok(candidates)
    }
}
