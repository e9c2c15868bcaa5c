// src/metrics.rs
// Lightweight in-process counters for match outcomes and latency. Cheap to
// record from worker tasks; snapshots are taken on demand.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use log::info;
use serde::Serialize;

use crate::models::matching::MatchOutcome;

const MAX_LATENCY_SAMPLES: usize = 4_096;

#[derive(Debug, Default)]
struct LatencyWindow {
    samples_us: Vec<u64>,
    next: usize,
}

impl LatencyWindow {
    fn record(&mut self, micros: u64) {
        if self.samples_us.len() < MAX_LATENCY_SAMPLES {
            self.samples_us.push(micros);
        } else {
            self.samples_us[self.next] = micros;
            self.next = (self.next + 1) % MAX_LATENCY_SAMPLES;
        }
    }

    fn percentile_ms(&self, pct: f64) -> f64 {
        if self.samples_us.is_empty() {
            return 0.0;
        }
        let mut sorted = self.samples_us.clone();
        sorted.sort_unstable();
        let rank = (pct / 100.0) * (sorted.len() - 1) as f64;
        let index = rank.round() as usize;
        sorted[index.min(sorted.len() - 1)] as f64 / 1_000.0
    }
}

#[derive(Debug, Default)]
pub struct EngineMetrics {
    auto_matched: AtomicU64,
    review: AtomicU64,
    no_match: AtomicU64,
    errors: AtomicU64,
    provider_timeouts: AtomicU64,
    latency: Mutex<LatencyWindow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_queries: u64,
    pub auto_matched: u64,
    pub review: u64,
    pub no_match: u64,
    pub errors: u64,
    pub provider_timeouts: u64,
    /// Cache fields are filled by the engine from the caches' own counters.
    pub decision_cache_hits: u64,
    pub decision_cache_misses: u64,
    pub embedding_cache_hits: u64,
    pub embedding_cache_misses: u64,
    pub p50_latency_ms: f64,
    pub p95_latency_ms: f64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_outcome(&self, outcome: &MatchOutcome) {
        let counter = match outcome {
            MatchOutcome::Matched { .. } => &self.auto_matched,
            MatchOutcome::Review { .. } => &self.review,
            MatchOutcome::NoMatch { .. } => &self.no_match,
            MatchOutcome::Error { .. } => &self.errors,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_latency(&self, elapsed: Duration) {
        if let Ok(mut window) = self.latency.lock() {
            window.record(elapsed.as_micros() as u64);
        }
    }

    pub fn record_provider_timeout(&self) {
        self.provider_timeouts.fetch_add(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let auto_matched = self.auto_matched.load(Ordering::SeqCst);
        let review = self.review.load(Ordering::SeqCst);
        let no_match = self.no_match.load(Ordering::SeqCst);
        let errors = self.errors.load(Ordering::SeqCst);
        let (p50, p95) = match self.latency.lock() {
            Ok(window) => (window.percentile_ms(50.0), window.percentile_ms(95.0)),
            Err(_) => (0.0, 0.0),
        };
        MetricsSnapshot {
            total_queries: auto_matched + review + no_match + errors,
            auto_matched,
            review,
            no_match,
            errors,
            provider_timeouts: self.provider_timeouts.load(Ordering::SeqCst),
            decision_cache_hits: 0,
            decision_cache_misses: 0,
            embedding_cache_hits: 0,
            embedding_cache_misses: 0,
            p50_latency_ms: p50,
            p95_latency_ms: p95,
        }
    }

    pub fn log_summary(&self) {
        let snap = self.snapshot();
        info!("📊 Match engine summary:");
        info!(
            "   • {} queries: {} auto-matched, {} review, {} no-match, {} errors",
            snap.total_queries, snap.auto_matched, snap.review, snap.no_match, snap.errors
        );
        info!(
            "   • latency p50 {:.2}ms, p95 {:.2}ms",
            snap.p50_latency_ms, snap.p95_latency_ms
        );
        info!("   • {} provider timeouts", snap.provider_timeouts);
    }
}
