// src/matching/decision.rs
// Threshold decisioning over classified candidates: auto-match band, review
// band with snapshot creation, and the deterministic tie-break.

use log::debug;

use crate::config::MatcherConfig;
use crate::matching::classifier::MatchClassifier;
use crate::matching::features::{feature_name, FeatureVector, F_EXACT_MATCH};
use crate::models::matching::{CandidateScore, MatchMethodType, MatchOutcome, ScoredCandidate};
use crate::models::review::ReviewItem;

const PROBABILITY_TIE_EPSILON: f64 = 1e-12;

/// A candidate that made it through the classifier.
#[derive(Debug, Clone)]
pub struct ClassifiedCandidate {
    pub retrieval: CandidateScore,
    pub probability: f64,
    pub features: FeatureVector,
}

/// What the decision engine resolved for one query. When the outcome is a
/// review, the item itself rides along for the caller to enqueue.
#[derive(Debug)]
pub struct Decision {
    pub outcome: MatchOutcome,
    pub review_item: Option<ReviewItem>,
}

pub struct DecisionEngine {
    config: MatcherConfig,
}

impl DecisionEngine {
    pub fn new(config: MatcherConfig) -> Self {
        Self { config }
    }

    pub fn decide(
        &self,
        raw_name: &str,
        canonical: &str,
        mut candidates: Vec<ClassifiedCandidate>,
        classifier: &MatchClassifier,
    ) -> Decision {
        if candidates.is_empty() {
            return Decision {
                outcome: MatchOutcome::NoMatch {
                    confidence: 0.0,
                    reasoning: Some("no candidates retrieved".to_string()),
                },
                review_item: None,
            };
        }

        candidates.sort_by(|a, b| {
            b.probability
                .partial_cmp(&a.probability)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.retrieval.payee_id.cmp(&b.retrieval.payee_id))
        });
        let top_probability = candidates[0].probability;

        if top_probability < self.config.review_threshold {
            return Decision {
                outcome: MatchOutcome::NoMatch {
                    confidence: top_probability,
                    reasoning: None,
                },
                review_item: None,
            };
        }

        // Ties at the top resolve to the smallest payee id; the sort above
        // already puts it first within the epsilon band.
        let winner = candidates
            .iter()
            .take_while(|c| (top_probability - c.probability).abs() < PROBABILITY_TIE_EPSILON)
            .min_by(|a, b| a.retrieval.payee_id.cmp(&b.retrieval.payee_id))
            .unwrap_or(&candidates[0]);

        if top_probability >= self.config.auto_match_threshold {
            let method = derive_method(winner, self.config.auto_match_threshold);
            let reasoning = reasoning_string(winner, classifier);
            debug!(
                "auto-match '{}' -> {} at {:.4} via {:?}",
                canonical, winner.retrieval.payee_id, top_probability, method
            );
            return Decision {
                outcome: MatchOutcome::Matched {
                    payee_id: winner.retrieval.payee_id.clone(),
                    confidence: top_probability,
                    method,
                    reasoning,
                },
                review_item: None,
            };
        }

        let snapshot: Vec<ScoredCandidate> = candidates
            .iter()
            .take(self.config.review_snapshot_size)
            .map(|c| ScoredCandidate {
                payee_id: c.retrieval.payee_id.clone(),
                probability: c.probability,
                features: c.features.to_vec(),
            })
            .collect();
        let item = ReviewItem::new(raw_name, canonical, snapshot);
        debug!(
            "review '{}': top candidate {} at {:.4}, snapshotting {}",
            canonical,
            winner.retrieval.payee_id,
            top_probability,
            item.candidates.len()
        );
        Decision {
            outcome: MatchOutcome::Review {
                review_item_id: item.id,
            },
            review_item: Some(item),
        }
    }

    /// Audit outcome for a classifier rejection. Never an auto-match.
    pub fn classifier_failure(reason: &str) -> MatchOutcome {
        MatchOutcome::NoMatch {
            confidence: 0.0,
            reasoning: Some(format!("classifier_error: {}", reason)),
        }
    }
}

fn derive_method(winner: &ClassifiedCandidate, auto_threshold: f64) -> MatchMethodType {
    if winner.features.get(F_EXACT_MATCH) >= 1.0 {
        return MatchMethodType::Exact;
    }
    let retrieval = &winner.retrieval;
    let routes = usize::from(retrieval.trigram_score.is_some())
        + usize::from(retrieval.phonetic_hit)
        + usize::from(retrieval.vector_score.is_some());
    if routes > 1 && winner.probability >= auto_threshold {
        return MatchMethodType::HighConfidence;
    }
    if retrieval.trigram_score.is_some() {
        MatchMethodType::Fuzzy
    } else if retrieval.phonetic_hit {
        MatchMethodType::Phonetic
    } else {
        MatchMethodType::Vector
    }
}

fn reasoning_string(winner: &ClassifiedCandidate, classifier: &MatchClassifier) -> String {
    if winner.features.get(F_EXACT_MATCH) >= 1.0 {
        return "exact canonical match".to_string();
    }
    let contributors = classifier.top_contributors(&winner.features, 2);
    if contributors.is_empty() {
        return "high overall similarity".to_string();
    }
    let names: Vec<&str> = contributors
        .iter()
        .map(|(index, _)| feature_name(*index))
        .collect();
    format!("matched on {}", names.join(" and "))
}
