// src/matching/features.rs
// Fixed feature schema for query/candidate pairs. The classifier depends on
// this layout staying put: retraining may change coefficients, never slots.

use serde::{Deserialize, Serialize};
use strsim::{jaro_winkler, normalized_levenshtein};

use crate::canonical::CanonicalName;
use crate::models::core::{Location, Payee};
use crate::models::matching::CandidateScore;
use crate::store::trigram;

pub const FEATURE_COUNT: usize = 13;

pub const F_EXACT_MATCH: usize = 0;
pub const F_TOKEN_JACCARD: usize = 1;
pub const F_TRIGRAM_SIM: usize = 2;
pub const F_PHONETIC_OVERLAP: usize = 3;
pub const F_EDIT_SIM: usize = 4;
pub const F_LENGTH_RATIO: usize = 5;
pub const F_PREFIX_RATIO: usize = 6;
pub const F_FOUND_TRIGRAM: usize = 7;
pub const F_FOUND_PHONETIC: usize = 8;
pub const F_FOUND_VECTOR: usize = 9;
pub const F_COSINE: usize = 10;
pub const F_CITY_MATCH: usize = 11;
pub const F_STATE_MATCH: usize = 12;

/// Marks a signal that was never computed, as opposed to one that scored
/// zero. Used for the cosine slot when no embedding was available and the
/// location slots when either side lacks that field.
pub const FEATURE_ABSENT: f64 = -1.0;

const CITY_FUZZ_THRESHOLD: f64 = 0.90;

static FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "exact canonical match",
    "token overlap",
    "trigram similarity",
    "phonetic agreement",
    "edit-distance similarity",
    "length parity",
    "shared prefix",
    "trigram retrieval",
    "phonetic retrieval",
    "vector retrieval",
    "embedding cosine",
    "city agreement",
    "state agreement",
];

pub fn feature_name(index: usize) -> &'static str {
    FEATURE_NAMES.get(index).copied().unwrap_or("unknown")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    values: [f64; FEATURE_COUNT],
}

impl FeatureVector {
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.values.to_vec()
    }

    pub fn get(&self, index: usize) -> f64 {
        self.values.get(index).copied().unwrap_or(0.0)
    }

    #[cfg(test)]
    pub fn from_values(values: [f64; FEATURE_COUNT]) -> Self {
        Self { values }
    }

    /// Extracts the pair features for one query/candidate pair.
    ///
    /// `cosine` is the similarity between the query and candidate embeddings
    /// when both exist; retrieval-route flags and scores come from the
    /// candidate generator.
    pub fn extract(
        query: &CanonicalName,
        query_location: Option<&Location>,
        candidate: &Payee,
        retrieval: &CandidateScore,
        cosine: Option<f64>,
    ) -> Self {
        let mut values = [0.0f64; FEATURE_COUNT];
        let cand_name = &candidate.canonical;

        values[F_EXACT_MATCH] =
            if !query.canonical.is_empty() && query.canonical == cand_name.canonical {
                1.0
            } else {
                0.0
            };
        values[F_TOKEN_JACCARD] = token_jaccard(query, cand_name);
        values[F_TRIGRAM_SIM] = match retrieval.trigram_score {
            Some(score) => f64::from(score),
            None => {
                let a = trigram::extract_trigrams(&query.canonical);
                let b = trigram::extract_trigrams(&cand_name.canonical);
                f64::from(trigram::similarity(&a, &b))
            }
        };
        values[F_PHONETIC_OVERLAP] = phonetic_overlap(query, cand_name);
        values[F_EDIT_SIM] = normalized_levenshtein(&query.canonical, &cand_name.canonical);
        values[F_LENGTH_RATIO] = length_ratio(&query.canonical, &cand_name.canonical);
        values[F_PREFIX_RATIO] = prefix_ratio(&query.canonical, &cand_name.canonical);
        values[F_FOUND_TRIGRAM] = if retrieval.trigram_score.is_some() {
            1.0
        } else {
            0.0
        };
        values[F_FOUND_PHONETIC] = if retrieval.phonetic_hit { 1.0 } else { 0.0 };
        values[F_FOUND_VECTOR] = if retrieval.vector_score.is_some() {
            1.0
        } else {
            0.0
        };
        // Rescaled from [-1, 1] so the sentinel stays unambiguous.
        values[F_COSINE] = match cosine.or_else(|| retrieval.vector_score.map(f64::from)) {
            Some(c) => ((c + 1.0) / 2.0).clamp(0.0, 1.0),
            None => FEATURE_ABSENT,
        };

        let (city, state) = location_agreement(query_location, candidate.location.as_ref());
        values[F_CITY_MATCH] = city;
        values[F_STATE_MATCH] = state;

        Self { values }
    }
}

fn token_jaccard(a: &CanonicalName, b: &CanonicalName) -> f64 {
    let sa = a.token_set();
    let sb = b.token_set();
    if sa.is_empty() || sb.is_empty() {
        return 0.0;
    }
    let shared = sa.intersection(&sb).count();
    let union = sa.len() + sb.len() - shared;
    shared as f64 / union as f64
}

/// Code overlap normalized by the smaller code set, so a short query name
/// fully covered by a longer candidate still scores 1.0.
fn phonetic_overlap(a: &CanonicalName, b: &CanonicalName) -> f64 {
    let sa = a.code_set();
    let sb = b.code_set();
    if sa.is_empty() || sb.is_empty() {
        return 0.0;
    }
    let shared = sa.intersection(&sb).count();
    shared as f64 / sa.len().min(sb.len()) as f64
}

fn length_ratio(a: &str, b: &str) -> f64 {
    let la = a.chars().count();
    let lb = b.chars().count();
    let max = la.max(lb);
    if max == 0 {
        return 0.0;
    }
    1.0 - (la.abs_diff(lb) as f64 / max as f64)
}

fn prefix_ratio(a: &str, b: &str) -> f64 {
    let max = a.chars().count().max(b.chars().count());
    if max == 0 {
        return 0.0;
    }
    let shared = a
        .chars()
        .zip(b.chars())
        .take_while(|(x, y)| x == y)
        .count();
    shared as f64 / max as f64
}

fn location_agreement(query: Option<&Location>, candidate: Option<&Location>) -> (f64, f64) {
    let (Some(q), Some(c)) = (query, candidate) else {
        return (FEATURE_ABSENT, FEATURE_ABSENT);
    };

    let city = match (&q.city, &c.city) {
        (Some(a), Some(b)) => {
            let a = a.to_lowercase();
            let b = b.to_lowercase();
            if a == b || jaro_winkler(&a, &b) >= CITY_FUZZ_THRESHOLD {
                1.0
            } else {
                0.0
            }
        }
        _ => FEATURE_ABSENT,
    };
    let state = match (&q.state, &c.state) {
        (Some(a), Some(b)) => {
            if a.eq_ignore_ascii_case(b) {
                1.0
            } else {
                0.0
            }
        }
        _ => FEATURE_ABSENT,
    };
    (city, state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::canonicalize;
    use crate::models::{PayeeId, SourceId};
    use chrono::Utc;

    fn payee(raw_name: &str, location: Option<Location>) -> Payee {
        Payee {
            id: PayeeId("src:1".to_string()),
            raw_name: raw_name.to_string(),
            canonical: canonicalize(raw_name),
            embedding: None,
            location,
            source: SourceId("src".to_string()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn retrieval_for(id: &PayeeId) -> CandidateScore {
        CandidateScore::new(id.clone())
    }

    #[test]
    fn exact_variant_scores_exact_flag() {
        let query = canonicalize("Microsoft Corp");
        let candidate = payee("Microsoft Corporation", None);
        let mut retrieval = retrieval_for(&candidate.id);
        retrieval.trigram_score = Some(1.0);

        let fv = FeatureVector::extract(&query, None, &candidate, &retrieval, None);
        assert_eq!(fv.get(F_EXACT_MATCH), 1.0);
        assert_eq!(fv.get(F_TOKEN_JACCARD), 1.0);
        assert_eq!(fv.get(F_TRIGRAM_SIM), 1.0);
        assert_eq!(fv.get(F_EDIT_SIM), 1.0);
        assert_eq!(fv.get(F_FOUND_TRIGRAM), 1.0);
        assert_eq!(fv.get(F_FOUND_PHONETIC), 0.0);
    }

    #[test]
    fn trigram_similarity_recomputed_when_route_missed() {
        let query = canonicalize("Amazone");
        let candidate = payee("Amazon.com Inc", None);
        let retrieval = retrieval_for(&candidate.id);

        let fv = FeatureVector::extract(&query, None, &candidate, &retrieval, None);
        assert_eq!(fv.get(F_FOUND_TRIGRAM), 0.0);
        assert!(fv.get(F_TRIGRAM_SIM) > 0.0);
        assert!(fv.get(F_TRIGRAM_SIM) < 1.0);
    }

    #[test]
    fn absent_signals_use_sentinel_not_zero() {
        let query = canonicalize("Acme");
        let candidate = payee("Acme", None);
        let retrieval = retrieval_for(&candidate.id);

        let fv = FeatureVector::extract(&query, None, &candidate, &retrieval, None);
        assert_eq!(fv.get(F_COSINE), FEATURE_ABSENT);
        assert_eq!(fv.get(F_CITY_MATCH), FEATURE_ABSENT);
        assert_eq!(fv.get(F_STATE_MATCH), FEATURE_ABSENT);
    }

    #[test]
    fn cosine_rescaled_into_unit_interval() {
        let query = canonicalize("Acme");
        let candidate = payee("Acme", None);
        let retrieval = retrieval_for(&candidate.id);

        let fv = FeatureVector::extract(&query, None, &candidate, &retrieval, Some(1.0));
        assert!((fv.get(F_COSINE) - 1.0).abs() < 1e-9);

        let fv = FeatureVector::extract(&query, None, &candidate, &retrieval, Some(-1.0));
        assert_eq!(fv.get(F_COSINE), 0.0);
    }

    #[test]
    fn location_agreement_is_fuzzy_on_city_exact_on_state() {
        let query = canonicalize("Acme");
        let candidate = payee(
            "Acme",
            Some(Location {
                city: Some("Seattle".to_string()),
                state: Some("WA".to_string()),
                country: None,
            }),
        );
        let retrieval = retrieval_for(&candidate.id);

        let q_loc = Location {
            city: Some("Seatle".to_string()),
            state: Some("wa".to_string()),
            country: None,
        };
        let fv = FeatureVector::extract(&query, Some(&q_loc), &candidate, &retrieval, None);
        assert_eq!(fv.get(F_CITY_MATCH), 1.0);
        assert_eq!(fv.get(F_STATE_MATCH), 1.0);

        let q_loc = Location {
            city: Some("Portland".to_string()),
            state: Some("OR".to_string()),
            country: None,
        };
        let fv = FeatureVector::extract(&query, Some(&q_loc), &candidate, &retrieval, None);
        assert_eq!(fv.get(F_CITY_MATCH), 0.0);
        assert_eq!(fv.get(F_STATE_MATCH), 0.0);
    }

    #[test]
    fn phonetic_overlap_normalized_by_smaller_set() {
        let query = canonicalize("Smith");
        let candidate = payee("Smith Consulting Group", None);
        let retrieval = retrieval_for(&candidate.id);

        let fv = FeatureVector::extract(&query, None, &candidate, &retrieval, None);
        assert!((fv.get(F_PHONETIC_OVERLAP) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn prefix_and_length_track_surface_shape() {
        assert!((prefix_ratio("amazon", "amazone") - 6.0 / 7.0).abs() < 1e-9);
        assert!((length_ratio("amazon", "amazone") - 6.0 / 7.0).abs() < 1e-9);
        assert_eq!(prefix_ratio("", ""), 0.0);
    }

    #[test]
    fn feature_names_cover_every_slot() {
        for i in 0..FEATURE_COUNT {
            assert_ne!(feature_name(i), "unknown");
        }
        assert_eq!(feature_name(FEATURE_COUNT), "unknown");
    }
}
