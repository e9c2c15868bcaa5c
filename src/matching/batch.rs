// src/matching/batch.rs
// Order-preserving batch matching. Identical canonical queries are matched
// once and fanned out to every original position; distinct groups run on a
// bounded worker pool. One group's failure stays in its own result slots.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use log::{debug, error, info, warn};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::cache::decision_key;
use crate::canonical::canonicalize;
use crate::error::{ErrorKind, MatchError};
use crate::matching::engine::{validate_query, MatchEngine};
use crate::models::matching::{MatchQuery, MatchResult};

pub struct BatchCoordinator {
    engine: Arc<MatchEngine>,
    pool_size: usize,
}

impl BatchCoordinator {
    pub fn new(engine: Arc<MatchEngine>) -> Self {
        let pool_size = engine.config().worker_pool_size.max(1);
        Self { engine, pool_size }
    }

    pub async fn match_batch(
        &self,
        queries: &[MatchQuery],
    ) -> Result<Vec<MatchResult>, MatchError> {
        self.match_batch_cancellable(queries, Arc::new(AtomicBool::new(false)))
            .await
    }

    /// Matches a batch, checking the cancellation flag between group
    /// dispatches. Groups already holding a worker slot run to completion
    /// under their own timeout; groups not yet dispatched resolve to
    /// `Error{Cancelled}`.
    pub async fn match_batch_cancellable(
        &self,
        queries: &[MatchQuery],
        cancel: Arc<AtomicBool>,
    ) -> Result<Vec<MatchResult>, MatchError> {
        if queries.is_empty() {
            return Ok(Vec::new());
        }

        let mut slots: Vec<Option<MatchResult>> = vec![None; queries.len()];
        let mut groups: Vec<(MatchQuery, Vec<usize>)> = Vec::new();
        let mut group_index: HashMap<String, usize> = HashMap::new();

        for (position, query) in queries.iter().enumerate() {
            if let Err(e) = validate_query(query) {
                debug!("batch position {} rejected: {}", position, e);
                slots[position] = Some(MatchResult::error(&query.raw_name, e.kind()));
                continue;
            }
            let canonical = canonicalize(&query.raw_name);
            let key = decision_key(&canonical.canonical, query.location.as_ref());
            match group_index.get(&key) {
                Some(&index) => groups[index].1.push(position),
                None => {
                    group_index.insert(key, groups.len());
                    groups.push((query.clone(), vec![position]));
                }
            }
        }

        info!(
            "batch of {} queries -> {} distinct groups on {} workers",
            queries.len(),
            groups.len(),
            self.pool_size
        );

        let semaphore = Arc::new(Semaphore::new(self.pool_size));
        let mut dispatched: Vec<(Vec<usize>, JoinHandle<Result<MatchResult, MatchError>>)> =
            Vec::with_capacity(groups.len());

        for (query, positions) in groups {
            if cancel.load(Ordering::SeqCst) {
                for &position in &positions {
                    slots[position] =
                        Some(MatchResult::error(&queries[position].raw_name, ErrorKind::Cancelled));
                }
                continue;
            }
            let engine = Arc::clone(&self.engine);
            let semaphore = Arc::clone(&semaphore);
            let cancel = Arc::clone(&cancel);
            let handle = tokio::spawn(async move {
                let permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| MatchError::Cancelled)?;
                let _permit_guard = permit;
                // a group still waiting for a slot counts as undispatched
                if cancel.load(Ordering::SeqCst) {
                    return Err(MatchError::Cancelled);
                }
                engine.match_payee(&query).await
            });
            dispatched.push((positions, handle));
        }

        let (position_sets, handles): (Vec<_>, Vec<_>) = dispatched.into_iter().unzip();
        let joined = join_all(handles).await;

        let mut fatal: Option<MatchError> = None;
        for (positions, joined_result) in position_sets.into_iter().zip(joined) {
            let group_result = match joined_result {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => {
                    if matches!(e, MatchError::StoreUnavailable { .. }) {
                        error!("batch aborting: {}", e);
                        if fatal.is_none() {
                            fatal = Some(e);
                        }
                        continue;
                    }
                    warn!("batch group failed: {}", e);
                    MatchResult::error(&queries[positions[0]].raw_name, e.kind())
                }
                Err(join_error) => {
                    error!("batch worker task failed: {}", join_error);
                    MatchResult::error(&queries[positions[0]].raw_name, ErrorKind::Cancelled)
                }
            };
            for &position in &positions {
                let mut slot_result = group_result.clone();
                slot_result.raw_name = queries[position].raw_name.clone();
                slots[position] = Some(slot_result);
            }
        }

        if let Some(e) = fatal {
            return Err(e);
        }

        self.engine.metrics().log_summary();

        Ok(slots
            .into_iter()
            .enumerate()
            .map(|(position, slot)| {
                slot.unwrap_or_else(|| {
                    error!("batch slot {} was never filled", position);
                    MatchResult::error(&queries[position].raw_name, ErrorKind::Cancelled)
                })
            })
            .collect())
    }
}
