// src/cache/mod.rs
// Embedding and decision caches. The embedding cache is content-addressed
// and single-flight: concurrent misses on one key collapse into a single
// provider call. Entries expire by LRU pressure or hard TTL, and an expired
// entry is never served even while still resident.

use anyhow::{Context, Result};
use log::{debug, info};
use lru::LruCache;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::num::NonZero;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OnceCell};

use crate::embed::EmbeddingProvider;
use crate::models::core::Location;
use crate::models::matching::MatchOutcome;

const CACHE_STATS_LOG_INTERVAL: u64 = 1000;

/// Content address for one embedding: canonical text plus the provider and
/// model revision that produced it.
pub fn embedding_key(canonical: &str, provider_id: &str, model_version: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hasher.update([0x1f]);
    hasher.update(provider_id.as_bytes());
    hasher.update([0x1f]);
    hasher.update(model_version.as_bytes());
    hex::encode(hasher.finalize())
}

/// Cache key for a decided query: canonical name plus location context.
pub fn decision_key(canonical: &str, location: Option<&Location>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    if let Some(loc) = location {
        for part in [&loc.city, &loc.state, &loc.country] {
            hasher.update([0x1f]);
            if let Some(value) = part {
                hasher.update(value.to_lowercase().as_bytes());
            }
        }
    }
    hex::encode(hasher.finalize())
}

struct CachedEmbedding {
    vector: Vec<f32>,
    created_at: Instant,
}

struct EmbeddingCacheState {
    entries: LruCache<String, CachedEmbedding>,
    in_flight: HashMap<String, Arc<OnceCell<Vec<f32>>>>,
}

pub struct EmbeddingCache {
    state: Mutex<EmbeddingCacheState>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

pub type SharedEmbeddingCache = Arc<EmbeddingCache>;

pub fn create_embedding_cache(capacity: usize, ttl: Duration) -> SharedEmbeddingCache {
    Arc::new(EmbeddingCache::new(capacity, ttl))
}

impl EmbeddingCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            state: Mutex::new(EmbeddingCacheState {
                entries: LruCache::new(NonZero::new(capacity).unwrap_or(NonZero::<usize>::MIN)),
                in_flight: HashMap::new(),
            }),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Returns the cached vector for this canonical text, or computes it via
    /// the provider. Concurrent callers for the same key share one provider
    /// call; a failed computation is not cached, so the next caller retries.
    pub async fn get_or_compute(
        &self,
        canonical: &str,
        provider: &dyn EmbeddingProvider,
    ) -> Result<Vec<f32>> {
        let key = embedding_key(canonical, provider.id(), provider.model_version());

        let cell = {
            let mut state = self.state.lock().await;
            let cached = state
                .entries
                .get(&key)
                .map(|entry| (entry.created_at.elapsed() < self.ttl, entry.vector.clone()));
            match cached {
                Some((true, vector)) => {
                    self.record_hit();
                    return Ok(vector);
                }
                Some((false, _)) => {
                    // resident but past TTL: drop, recompute
                    state.entries.pop(&key);
                }
                None => {}
            }
            self.record_miss();
            state
                .in_flight
                .entry(key.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let computed = cell
            .get_or_try_init(|| async {
                provider
                    .embed(canonical)
                    .await
                    .with_context(|| format!("embedding provider '{}' failed", provider.id()))
            })
            .await;

        match computed {
            Ok(vector) => {
                let vector = vector.clone();
                let mut state = self.state.lock().await;
                state.entries.put(
                    key.clone(),
                    CachedEmbedding {
                        vector: vector.clone(),
                        created_at: Instant::now(),
                    },
                );
                state.in_flight.remove(&key);
                Ok(vector)
            }
            Err(e) => {
                let mut state = self.state.lock().await;
                state.in_flight.remove(&key);
                Err(e)
            }
        }
    }

    pub async fn stats(&self) -> (u64, u64, usize) {
        let state = self.state.lock().await;
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
            state.entries.len(),
        )
    }

    fn record_hit(&self) {
        let hits = self.hits.fetch_add(1, Ordering::Relaxed) + 1;
        let misses = self.misses.load(Ordering::Relaxed);
        if (hits + misses) % CACHE_STATS_LOG_INTERVAL == 0 {
            info!(
                "💾 Embedding cache: {} hits, {} misses ({:.1}% hit rate)",
                hits,
                misses,
                hits as f64 / (hits + misses) as f64 * 100.0
            );
        }
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }
}

struct CachedDecision {
    canonical: String,
    outcome: MatchOutcome,
    created_at: Instant,
}

/// Short-lived cache absorbing exact duplicate lookups. Review outcomes are
/// never stored here: a repeated uncertain query must open its own item.
pub struct DecisionCache {
    state: Mutex<LruCache<String, CachedDecision>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl DecisionCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            state: Mutex::new(LruCache::new(NonZero::new(capacity).unwrap_or(NonZero::<usize>::MIN))),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub async fn get(&self, key: &str) -> Option<(String, MatchOutcome)> {
        let mut state = self.state.lock().await;
        let cached = state.get(key).map(|c| {
            (
                c.created_at.elapsed() < self.ttl,
                c.canonical.clone(),
                c.outcome.clone(),
            )
        });
        match cached {
            Some((true, canonical, outcome)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!("decision cache hit for {}", &key[..8.min(key.len())]);
                Some((canonical, outcome))
            }
            Some((false, _, _)) => {
                state.pop(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub async fn put(&self, key: String, canonical: String, outcome: MatchOutcome) {
        // Review items must stay one-per-query and errors must be retried.
        if matches!(
            outcome,
            MatchOutcome::Review { .. } | MatchOutcome::Error { .. }
        ) {
            return;
        }
        let mut state = self.state.lock().await;
        state.put(
            key,
            CachedDecision {
                canonical,
                outcome,
                created_at: Instant::now(),
            },
        );
    }

    pub fn stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}
