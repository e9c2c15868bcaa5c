// src/config.rs
// Engine tuning knobs with env-var overrides.

use log::info;
use std::env;

pub const DEFAULT_AUTO_MATCH_THRESHOLD: f64 = 0.97;
pub const DEFAULT_REVIEW_THRESHOLD: f64 = 0.60;
pub const DEFAULT_TRIGRAM_TOP_K: usize = 50;
pub const DEFAULT_PHONETIC_CAP: usize = 100;
pub const DEFAULT_VECTOR_TOP_K: usize = 50;
pub const DEFAULT_MAX_CANDIDATES: usize = 150;
pub const DEFAULT_REVIEW_SNAPSHOT_SIZE: usize = 5;
pub const DEFAULT_ITEM_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_PROVIDER_TIMEOUT_MS: u64 = 2_000;
pub const DEFAULT_EMBEDDING_CACHE_SIZE: usize = 10_000;
pub const DEFAULT_EMBEDDING_CACHE_TTL_SECS: u64 = 86_400;
pub const DEFAULT_DECISION_CACHE_SIZE: usize = 1_024;
pub const DEFAULT_DECISION_CACHE_TTL_SECS: u64 = 60;
pub const DEFAULT_TRIGRAM_FLOOR: f32 = 0.10;
pub const MAX_QUERY_LENGTH: usize = 512;

#[derive(Debug, Clone)]
pub struct MatcherConfig {
    /// Probability at or above which a candidate is matched automatically.
    pub auto_match_threshold: f64,
    /// Lower bound of the review band; below it the query is a NoMatch.
    pub review_threshold: f64,
    pub trigram_top_k: usize,
    pub phonetic_cap: usize,
    pub vector_top_k: usize,
    /// Cap on the deduplicated candidate union.
    pub max_candidates: usize,
    /// How many top candidates a review item snapshots.
    pub review_snapshot_size: usize,
    /// Bounded worker pool for batch matching.
    pub worker_pool_size: usize,
    pub item_timeout_ms: u64,
    pub provider_timeout_ms: u64,
    pub embedding_cache_size: usize,
    pub embedding_cache_ttl_secs: u64,
    pub decision_cache_size: usize,
    pub decision_cache_ttl_secs: u64,
    /// Trigram similarity below this never enters the candidate union.
    pub trigram_floor: f32,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            auto_match_threshold: DEFAULT_AUTO_MATCH_THRESHOLD,
            review_threshold: DEFAULT_REVIEW_THRESHOLD,
            trigram_top_k: DEFAULT_TRIGRAM_TOP_K,
            phonetic_cap: DEFAULT_PHONETIC_CAP,
            vector_top_k: DEFAULT_VECTOR_TOP_K,
            max_candidates: DEFAULT_MAX_CANDIDATES,
            review_snapshot_size: DEFAULT_REVIEW_SNAPSHOT_SIZE,
            worker_pool_size: 8.min(num_cpus::get().max(1)),
            item_timeout_ms: DEFAULT_ITEM_TIMEOUT_MS,
            provider_timeout_ms: DEFAULT_PROVIDER_TIMEOUT_MS,
            embedding_cache_size: DEFAULT_EMBEDDING_CACHE_SIZE,
            embedding_cache_ttl_secs: DEFAULT_EMBEDDING_CACHE_TTL_SECS,
            decision_cache_size: DEFAULT_DECISION_CACHE_SIZE,
            decision_cache_ttl_secs: DEFAULT_DECISION_CACHE_TTL_SECS,
            trigram_floor: DEFAULT_TRIGRAM_FLOOR,
        }
    }
}

impl MatcherConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        config.auto_match_threshold = env_f64("MATCH_AUTO_THRESHOLD", config.auto_match_threshold);
        config.review_threshold = env_f64("MATCH_REVIEW_THRESHOLD", config.review_threshold);
        config.worker_pool_size =
            env_usize("MATCH_WORKER_POOL_SIZE", config.worker_pool_size).max(1);
        config.item_timeout_ms = env_u64("MATCH_ITEM_TIMEOUT_MS", config.item_timeout_ms).max(1);
        config.provider_timeout_ms =
            env_u64("MATCH_PROVIDER_TIMEOUT_MS", config.provider_timeout_ms).max(1);
        config.embedding_cache_size =
            env_usize("MATCH_EMBEDDING_CACHE_SIZE", config.embedding_cache_size).max(1);
        config.decision_cache_size =
            env_usize("MATCH_DECISION_CACHE_SIZE", config.decision_cache_size).max(1);
        config.decision_cache_ttl_secs =
            env_u64("MATCH_DECISION_CACHE_TTL_SECS", config.decision_cache_ttl_secs);

        config
    }

    pub fn log_config(&self) {
        info!("🔧 Matcher configuration:");
        info!(
            "   • thresholds: auto-match >= {:.2}, review >= {:.2}",
            self.auto_match_threshold, self.review_threshold
        );
        info!(
            "   • retrieval: trigram top-{}, phonetic cap {}, vector top-{}, union cap {}",
            self.trigram_top_k, self.phonetic_cap, self.vector_top_k, self.max_candidates
        );
        info!(
            "   • {} workers, {}ms per-item timeout, {}ms provider timeout",
            self.worker_pool_size, self.item_timeout_ms, self.provider_timeout_ms
        );
        info!(
            "   • embedding cache {} entries / {}s ttl, decision cache {} entries / {}s ttl",
            self.embedding_cache_size,
            self.embedding_cache_ttl_secs,
            self.decision_cache_size,
            self.decision_cache_ttl_secs
        );
    }

    /// Review band is only coherent when the thresholds are ordered.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(0.0..=1.0).contains(&self.review_threshold)
            || !(0.0..=1.0).contains(&self.auto_match_threshold)
        {
            anyhow::bail!("thresholds must lie in [0, 1]");
        }
        if self.review_threshold >= self.auto_match_threshold {
            anyhow::bail!(
                "review threshold {} must be below auto-match threshold {}",
                self.review_threshold,
                self.auto_match_threshold
            );
        }
        Ok(())
    }
}

fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_coherent() {
        let config = MatcherConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.review_threshold < config.auto_match_threshold);
        assert!(config.worker_pool_size >= 1);
    }

    #[test]
    fn inverted_thresholds_rejected() {
        let config = MatcherConfig {
            auto_match_threshold: 0.5,
            review_threshold: 0.9,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn out_of_range_threshold_rejected() {
        let config = MatcherConfig {
            auto_match_threshold: 1.2,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
