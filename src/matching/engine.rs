// src/matching/engine.rs
// The single-query pipeline: validate -> canonicalize -> decision cache ->
// embedding (degradable) -> candidate union -> features -> classifier ->
// decision. One engine instance is shared by all workers; every component it
// owns is injected here once, never reached through globals.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use log::{debug, info, warn};
use tokio::sync::RwLock;

use crate::cache::{create_embedding_cache, decision_key, DecisionCache, SharedEmbeddingCache};
use crate::canonical::{canonicalize, CanonicalName};
use crate::config::{MatcherConfig, MAX_QUERY_LENGTH};
use crate::embed::{cosine_similarity, EmbeddingProvider};
use crate::error::MatchError;
use crate::matching::candidates::CandidateGenerator;
use crate::matching::classifier::{MatchClassifier, TrainingReport};
use crate::matching::decision::{ClassifiedCandidate, Decision, DecisionEngine};
use crate::matching::features::FeatureVector;
use crate::metrics::{EngineMetrics, MetricsSnapshot};
use crate::models::core::{Payee, PayeeRecord};
use crate::models::matching::{CandidateScore, MatchOutcome, MatchQuery, MatchResult};
use crate::models::PayeeId;
use crate::review::{LabelStore, ReviewQueue};
use crate::store::ReferenceStore;

pub struct MatchEngine {
    config: MatcherConfig,
    store: Arc<dyn ReferenceStore>,
    provider: Arc<dyn EmbeddingProvider>,
    embedding_cache: SharedEmbeddingCache,
    decision_cache: DecisionCache,
    candidates: CandidateGenerator,
    decision: DecisionEngine,
    classifier: RwLock<MatchClassifier>,
    review_queue: Arc<ReviewQueue>,
    labels: Arc<LabelStore>,
    metrics: Arc<EngineMetrics>,
}

impl MatchEngine {
    pub fn new(
        config: MatcherConfig,
        store: Arc<dyn ReferenceStore>,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        config.validate()?;
        config.log_config();

        let embedding_cache = create_embedding_cache(
            config.embedding_cache_size,
            Duration::from_secs(config.embedding_cache_ttl_secs),
        );
        let decision_cache = DecisionCache::new(
            config.decision_cache_size,
            Duration::from_secs(config.decision_cache_ttl_secs),
        );
        let labels = Arc::new(LabelStore::new());
        let review_queue = Arc::new(ReviewQueue::new(Arc::clone(&labels)));
        let candidates = CandidateGenerator::new(Arc::clone(&store), config.clone());
        let decision = DecisionEngine::new(config.clone());

        info!(
            "match engine ready (provider '{}' {}, classifier v1)",
            provider.id(),
            provider.model_version()
        );
        Ok(Self {
            config,
            store,
            provider,
            embedding_cache,
            decision_cache,
            candidates,
            decision,
            classifier: RwLock::new(MatchClassifier::new()),
            review_queue,
            labels,
            metrics: Arc::new(EngineMetrics::new()),
        })
    }

    /// Resolves one raw name against the reference network.
    ///
    /// Validation failures and store outages are the only `Err` cases; every
    /// other failure resolves into the result's outcome slot so batch
    /// positions stay isolated.
    pub async fn match_payee(&self, query: &MatchQuery) -> Result<MatchResult, MatchError> {
        let started = Instant::now();
        validate_query(query)?;

        let timeout = Duration::from_millis(self.config.item_timeout_ms);
        let result = match tokio::time::timeout(timeout, self.match_inner(query)).await {
            Ok(result) => result?,
            Err(_) => {
                let err = MatchError::Timeout {
                    duration_ms: self.config.item_timeout_ms,
                };
                warn!("match for '{}' failed: {}", query.raw_name, err);
                MatchResult::error(&query.raw_name, err.kind())
            }
        };

        self.metrics.record_outcome(&result.outcome);
        self.metrics.record_latency(started.elapsed());
        Ok(result)
    }

    async fn match_inner(&self, query: &MatchQuery) -> Result<MatchResult, MatchError> {
        let canonical = canonicalize(&query.raw_name);
        if canonical.is_empty() {
            debug!("query '{}' canonicalized to empty", query.raw_name);
            return Ok(MatchResult {
                raw_name: query.raw_name.clone(),
                canonical_name: None,
                outcome: MatchOutcome::NoMatch {
                    confidence: 0.0,
                    reasoning: Some("name canonicalized to empty".to_string()),
                },
            });
        }

        let cache_key = decision_key(&canonical.canonical, query.location.as_ref());
        if let Some((_, outcome)) = self.decision_cache.get(&cache_key).await {
            return Ok(MatchResult {
                raw_name: query.raw_name.clone(),
                canonical_name: Some(canonical.canonical),
                outcome,
            });
        }

        let embedding = self.embed_degradable(&canonical.canonical).await;
        let union = self
            .candidates
            .generate(&canonical, embedding.as_deref())
            .await
            .map_err(store_error)?;

        let enriched = self.fetch_candidates(union, embedding.as_deref()).await?;
        let Decision {
            outcome,
            review_item,
        } = self.classify_and_decide(query, &canonical, enriched).await;

        if let Some(item) = review_item {
            if let Err(e) = self.review_queue.enqueue(item) {
                warn!("review item for '{}' dropped: {:#}", query.raw_name, e);
            }
        }
        self.decision_cache
            .put(cache_key, canonical.canonical.clone(), outcome.clone())
            .await;

        Ok(MatchResult {
            raw_name: query.raw_name.clone(),
            canonical_name: Some(canonical.canonical),
            outcome,
        })
    }

    /// Embedding lookup bounded by the provider timeout. Failure or timeout
    /// degrades the vector route only; trigram and phonetic still decide.
    async fn embed_degradable(&self, canonical: &str) -> Option<Vec<f32>> {
        let timeout = Duration::from_millis(self.config.provider_timeout_ms);
        let lookup = self
            .embedding_cache
            .get_or_compute(canonical, self.provider.as_ref());
        match tokio::time::timeout(timeout, lookup).await {
            Ok(Ok(vector)) => Some(vector),
            Ok(Err(e)) => {
                warn!(
                    "embedding provider failed for '{}': {:#}; vector route skipped",
                    canonical, e
                );
                None
            }
            Err(_) => {
                self.metrics.record_provider_timeout();
                let err = MatchError::ProviderTimeout {
                    duration_ms: self.config.provider_timeout_ms,
                };
                warn!("{} for '{}'; vector route skipped", err, canonical);
                None
            }
        }
    }

    async fn fetch_candidates(
        &self,
        union: Vec<CandidateScore>,
        embedding: Option<&[f32]>,
    ) -> Result<Vec<(Payee, CandidateScore, Option<f64>)>, MatchError> {
        let mut enriched = Vec::with_capacity(union.len());
        for retrieval in union {
            let payee = match self.store.get(&retrieval.payee_id).await.map_err(store_error)? {
                Some(payee) => payee,
                None => {
                    debug!(
                        "candidate {} disappeared between retrieval and fetch",
                        retrieval.payee_id
                    );
                    continue;
                }
            };
            let cosine = match (embedding, payee.embedding.as_deref()) {
                (Some(q), Some(c)) => Some(f64::from(cosine_similarity(q, c))),
                _ => None,
            };
            enriched.push((payee, retrieval, cosine));
        }
        Ok(enriched)
    }

    async fn classify_and_decide(
        &self,
        query: &MatchQuery,
        canonical: &CanonicalName,
        enriched: Vec<(Payee, CandidateScore, Option<f64>)>,
    ) -> Decision {
        let classifier = self.classifier.read().await;
        let mut classified = Vec::with_capacity(enriched.len());
        for (payee, retrieval, cosine) in &enriched {
            let features = FeatureVector::extract(
                canonical,
                query.location.as_ref(),
                payee,
                retrieval,
                *cosine,
            );
            match classifier.score(&features) {
                Ok(probability) => classified.push(ClassifiedCandidate {
                    retrieval: retrieval.clone(),
                    probability,
                    features,
                }),
                Err(e) => {
                    warn!(
                        "classifier rejected candidate {} for '{}': {}",
                        retrieval.payee_id, canonical.canonical, e
                    );
                    return Decision {
                        outcome: DecisionEngine::classifier_failure(&e.to_string()),
                        review_item: None,
                    };
                }
            }
        }
        self.decision
            .decide(&query.raw_name, &canonical.canonical, classified, &classifier)
    }

    /// Ingests one reference record, computing its embedding when the caller
    /// did not supply one. Idempotent by payee id.
    pub async fn upsert(&self, mut record: PayeeRecord) -> Result<PayeeId, MatchError> {
        if record.embedding.is_none() {
            let canonical = canonicalize(&record.raw_name);
            if !canonical.is_empty() {
                record.embedding = self.embed_degradable(&canonical.canonical).await;
            }
        }
        self.store.upsert(record).await.map_err(store_error)
    }

    /// Retrains the classifier and refits its calibration curve from the
    /// accumulated label store. Serving continues on the old model until the
    /// swap completes.
    pub async fn retrain(&self, epochs: Option<usize>) -> Result<TrainingReport> {
        let labels = self.labels.all();
        info!("🔄 Retraining classifier from {} labels", labels.len());
        let mut classifier = self.classifier.write().await;
        let mut report = classifier.train_from_labels(&labels, epochs)?;
        classifier.calibrate(&labels)?;
        report.version = classifier.version;
        Ok(report)
    }

    pub async fn export_model(&self) -> Result<String> {
        self.classifier.read().await.to_json()
    }

    /// Replaces the serving model with a previously exported one.
    pub async fn import_model(&self, json: &str) -> Result<()> {
        let imported = MatchClassifier::from_json(json)?;
        let mut classifier = self.classifier.write().await;
        info!(
            "classifier replaced: v{} -> v{}",
            classifier.version, imported.version
        );
        *classifier = imported;
        Ok(())
    }

    pub async fn classifier_version(&self) -> u32 {
        self.classifier.read().await.version
    }

    pub fn review_queue(&self) -> &Arc<ReviewQueue> {
        &self.review_queue
    }

    pub fn labels(&self) -> &Arc<LabelStore> {
        &self.labels
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }

    /// Outcome counters plus cache hit rates in one snapshot.
    pub async fn metrics_snapshot(&self) -> MetricsSnapshot {
        let mut snapshot = self.metrics.snapshot();
        let (hits, misses, _) = self.embedding_cache.stats().await;
        snapshot.embedding_cache_hits = hits;
        snapshot.embedding_cache_misses = misses;
        let (hits, misses) = self.decision_cache.stats();
        snapshot.decision_cache_hits = hits;
        snapshot.decision_cache_misses = misses;
        snapshot
    }
}

pub(crate) fn validate_query(query: &MatchQuery) -> Result<(), MatchError> {
    let trimmed = query.raw_name.trim();
    if trimmed.is_empty() {
        return Err(MatchError::Validation {
            reason: "name is empty".to_string(),
        });
    }
    if query.raw_name.chars().count() > MAX_QUERY_LENGTH {
        return Err(MatchError::Validation {
            reason: format!("name exceeds {} characters", MAX_QUERY_LENGTH),
        });
    }
    Ok(())
}

fn store_error(e: anyhow::Error) -> MatchError {
    MatchError::StoreUnavailable {
        reason: format!("{:#}", e),
    }
}
