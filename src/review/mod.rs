// src/review/mod.rs
// Human-review workflow: the queue of borderline matches and the label store
// that resolutions feed. Labels are the training input for the classifier.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Result};
use chrono::Utc;
use log::info;
use serde_json::json;

use crate::models::review::{Label, ReviewItem, ReviewItemId, ReviewStatus};
use crate::models::PayeeId;

/// Append-only store of human-labeled pairs.
#[derive(Debug, Default)]
pub struct LabelStore {
    labels: Mutex<Vec<Label>>,
}

impl LabelStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, label: Label) -> Result<()> {
        let mut labels = self
            .labels
            .lock()
            .map_err(|_| anyhow!("label store lock poisoned"))?;
        labels.push(label);
        Ok(())
    }

    pub fn append_all(&self, batch: Vec<Label>) -> Result<()> {
        let mut labels = self
            .labels
            .lock()
            .map_err(|_| anyhow!("label store lock poisoned"))?;
        labels.extend(batch);
        Ok(())
    }

    pub fn all(&self) -> Vec<Label> {
        self.labels
            .lock()
            .map(|labels| labels.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.labels.lock().map(|labels| labels.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct ReviewQueue {
    items: Mutex<HashMap<ReviewItemId, ReviewItem>>,
    labels: Arc<LabelStore>,
}

impl ReviewQueue {
    pub fn new(labels: Arc<LabelStore>) -> Self {
        Self {
            items: Mutex::new(HashMap::new()),
            labels,
        }
    }

    pub fn enqueue(&self, item: ReviewItem) -> Result<()> {
        let mut items = self
            .items
            .lock()
            .map_err(|_| anyhow!("review queue lock poisoned"))?;
        items.insert(item.id, item);
        Ok(())
    }

    pub fn get(&self, id: ReviewItemId) -> Option<ReviewItem> {
        self.items
            .lock()
            .ok()
            .and_then(|items| items.get(&id).cloned())
    }

    /// Open items, oldest first.
    pub fn open(&self) -> Vec<ReviewItem> {
        let mut open: Vec<ReviewItem> = self
            .items
            .lock()
            .map(|items| items.values().filter(|i| i.is_open()).cloned().collect())
            .unwrap_or_default();
        open.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.0.cmp(&b.id.0)));
        open
    }

    pub fn open_count(&self) -> usize {
        self.items
            .lock()
            .map(|items| items.values().filter(|i| i.is_open()).count())
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.items.lock().map(|items| items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Confirm one snapshotted candidate as the true entity. Emits a positive
    /// label for the chosen candidate and negatives for the rest.
    pub fn approve(
        &self,
        id: ReviewItemId,
        chosen_payee: &PayeeId,
        reviewer: &str,
    ) -> Result<Vec<Label>> {
        let labels = {
            let mut items = self
                .items
                .lock()
                .map_err(|_| anyhow!("review queue lock poisoned"))?;
            let item = items
                .get_mut(&id)
                .ok_or_else(|| anyhow!("review item {} not found", id))?;
            if !item.is_open() {
                bail!("review item {} is already resolved ({:?})", id, item.status);
            }
            if !item
                .candidates
                .iter()
                .any(|c| &c.payee_id == chosen_payee)
            {
                bail!(
                    "payee {} is not among the snapshotted candidates of review item {}",
                    chosen_payee,
                    id
                );
            }
            item.status = ReviewStatus::Approved;
            item.reviewer = Some(reviewer.to_string());
            item.reviewed_at = Some(Utc::now());
            resolution_labels(item, Some(chosen_payee), reviewer, "approved")
        };
        self.labels.append_all(labels.clone())?;
        info!(
            "review item {} approved -> {} ({} labels)",
            id,
            chosen_payee,
            labels.len()
        );
        Ok(labels)
    }

    /// Mark every snapshotted candidate as a non-match.
    pub fn reject(&self, id: ReviewItemId, reviewer: &str) -> Result<Vec<Label>> {
        let labels = {
            let mut items = self
                .items
                .lock()
                .map_err(|_| anyhow!("review queue lock poisoned"))?;
            let item = items
                .get_mut(&id)
                .ok_or_else(|| anyhow!("review item {} not found", id))?;
            if !item.is_open() {
                bail!("review item {} is already resolved ({:?})", id, item.status);
            }
            item.status = ReviewStatus::Rejected;
            item.reviewer = Some(reviewer.to_string());
            item.reviewed_at = Some(Utc::now());
            resolution_labels(item, None, reviewer, "rejected")
        };
        self.labels.append_all(labels.clone())?;
        info!("review item {} rejected ({} labels)", id, labels.len());
        Ok(labels)
    }
}

fn resolution_labels(
    item: &ReviewItem,
    chosen: Option<&PayeeId>,
    reviewer: &str,
    resolution: &str,
) -> Vec<Label> {
    item.candidates
        .iter()
        .map(|candidate| {
            let same_entity = chosen.map_or(false, |c| &candidate.payee_id == c);
            Label::new(
                &item.raw_name,
                &item.canonical_name,
                candidate.payee_id.clone(),
                same_entity,
            )
            .with_features(candidate.features.clone())
            .with_metadata(json!({
                "review_item_id": item.id.to_string(),
                "reviewer": reviewer,
                "resolution": resolution,
                "probability": candidate.probability,
            }))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::matching::ScoredCandidate;

    fn snapshot_candidate(id: &str, probability: f64) -> ScoredCandidate {
        ScoredCandidate {
            payee_id: PayeeId(id.to_string()),
            probability,
            features: vec![0.5; 13],
        }
    }

    fn queue_with_item() -> (ReviewQueue, Arc<LabelStore>, ReviewItemId) {
        let labels = Arc::new(LabelStore::new());
        let queue = ReviewQueue::new(Arc::clone(&labels));
        let item = ReviewItem::new(
            "Acme Corp",
            "acme",
            vec![
                snapshot_candidate("src:1", 0.85),
                snapshot_candidate("src:2", 0.70),
                snapshot_candidate("src:3", 0.62),
            ],
        );
        let id = item.id;
        queue.enqueue(item).unwrap();
        (queue, labels, id)
    }

    #[test]
    fn approve_emits_positive_and_negative_labels() {
        let (queue, labels, id) = queue_with_item();
        let chosen = PayeeId("src:2".to_string());
        let emitted = queue.approve(id, &chosen, "alex").unwrap();

        assert_eq!(emitted.len(), 3);
        let positives: Vec<_> = emitted.iter().filter(|l| l.same_entity).collect();
        assert_eq!(positives.len(), 1);
        assert_eq!(positives[0].payee_id, chosen);
        assert!(emitted.iter().all(|l| l.features.is_some()));
        assert!(emitted
            .iter()
            .all(|l| l.metadata["review_item_id"] == id.to_string()));

        assert_eq!(labels.len(), 3);
        let stored = queue.get(id).unwrap();
        assert_eq!(stored.status, ReviewStatus::Approved);
        assert_eq!(stored.reviewer.as_deref(), Some("alex"));
        assert!(stored.reviewed_at.is_some());
    }

    #[test]
    fn reject_emits_all_negative_labels() {
        let (queue, labels, id) = queue_with_item();
        let emitted = queue.reject(id, "alex").unwrap();
        assert_eq!(emitted.len(), 3);
        assert!(emitted.iter().all(|l| !l.same_entity));
        assert_eq!(labels.len(), 3);
        assert_eq!(queue.get(id).unwrap().status, ReviewStatus::Rejected);
    }

    #[test]
    fn resolving_twice_is_an_error() {
        let (queue, labels, id) = queue_with_item();
        queue.reject(id, "alex").unwrap();
        let err = queue.reject(id, "sam").unwrap_err();
        assert!(err.to_string().contains("already resolved"));
        let err = queue
            .approve(id, &PayeeId("src:1".to_string()), "sam")
            .unwrap_err();
        assert!(err.to_string().contains("already resolved"));
        // no double labels
        assert_eq!(labels.len(), 3);
    }

    #[test]
    fn approving_unknown_item_is_an_error() {
        let (queue, _, _) = queue_with_item();
        let err = queue
            .approve(ReviewItemId::new(), &PayeeId("src:1".to_string()), "alex")
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn approving_payee_outside_snapshot_is_an_error() {
        let (queue, labels, id) = queue_with_item();
        let err = queue
            .approve(id, &PayeeId("src:99".to_string()), "alex")
            .unwrap_err();
        assert!(err.to_string().contains("not among the snapshotted"));
        assert_eq!(labels.len(), 0);
        assert!(queue.get(id).unwrap().is_open());
    }

    #[test]
    fn poisoned_locks_fail_writes_instead_of_dropping_them() {
        use std::panic::{catch_unwind, AssertUnwindSafe};

        let labels = LabelStore::new();
        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = labels.labels.lock().unwrap();
            panic!("poison the label store");
        }));
        let label = Label::new("Acme Corp", "acme", PayeeId("src:1".to_string()), true);
        assert!(labels.append(label).is_err());

        let (queue, _, _) = queue_with_item();
        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = queue.items.lock().unwrap();
            panic!("poison the queue");
        }));
        let item = ReviewItem::new("Beta LLC", "beta", vec![snapshot_candidate("src:9", 0.7)]);
        assert!(queue.enqueue(item).is_err());
    }

    #[test]
    fn approve_propagates_a_poisoned_label_store() {
        use std::panic::{catch_unwind, AssertUnwindSafe};

        let (queue, labels, id) = queue_with_item();
        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = labels.labels.lock().unwrap();
            panic!("poison the label store");
        }));
        let err = queue
            .approve(id, &PayeeId("src:1".to_string()), "alex")
            .unwrap_err();
        assert!(err.to_string().contains("poisoned"));
    }

    #[test]
    fn open_lists_only_unresolved_items() {
        let (queue, _, id) = queue_with_item();
        let other = ReviewItem::new("Beta LLC", "beta", vec![snapshot_candidate("src:9", 0.7)]);
        let other_id = other.id;
        queue.enqueue(other).unwrap();
        assert_eq!(queue.open().len(), 2);

        queue.reject(id, "alex").unwrap();
        let open = queue.open();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, other_id);
        assert_eq!(queue.open_count(), 1);
        assert_eq!(queue.len(), 2);
    }
}
