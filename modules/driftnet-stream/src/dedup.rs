use std::sync::Arc;

use anyhow::Result;
use uuid::Uuid;

use crate::traits::ItemStore;

/// Idempotence gate for the (search, item) pair.
///
/// Backed by the store's existence check rather than process memory, so a
/// restarted process never re-emits items persisted by a prior run. The
/// "mark committed" half of the contract rides the persister's durable
/// write: the committed row is the mark, written in the same transaction,
/// and the write itself re-checks the pair (ON CONFLICT) against races
/// between concurrent persister workers.
#[derive(Clone)]
pub struct Deduplicator {
    store: Arc<dyn ItemStore>,
}

impl Deduplicator {
    pub fn new(store: Arc<dyn ItemStore>) -> Self {
        Self { store }
    }

    /// True when the pair has not been committed yet. Evaluated before
    /// enqueueing so guaranteed duplicates never occupy queue capacity.
    pub async fn should_commit(&self, search_id: Uuid, upstream_id: &str) -> Result<bool> {
        Ok(!self.store.is_committed(search_id, upstream_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use driftnet_common::IngestedItem;
    use driftnet_store::CommitOutcome;

    use crate::fixtures::MemoryStore;

    #[tokio::test]
    async fn double_delivery_commits_exactly_once() {
        let store = Arc::new(MemoryStore::new(5));
        let dedup = Deduplicator::new(store.clone());
        let search_id = Uuid::new_v4();

        assert!(dedup.should_commit(search_id, "42").await.unwrap());

        let item = IngestedItem {
            search_id,
            upstream_id: "42".to_string(),
            payload: serde_json::json!({"text": "hello"}),
            received_at: Utc::now(),
        };
        assert_eq!(store.commit_item(&item).await.unwrap(), CommitOutcome::Committed);

        // Second delivery of the same pair: gate closes, and even a forced
        // write reports the duplicate instead of double-committing.
        assert!(!dedup.should_commit(search_id, "42").await.unwrap());
        assert_eq!(store.commit_item(&item).await.unwrap(), CommitOutcome::Duplicate);
        assert_eq!(store.committed_count(search_id), 1);
    }

    #[tokio::test]
    async fn same_item_commits_under_multiple_searches() {
        let store = Arc::new(MemoryStore::new(5));
        let dedup = Deduplicator::new(store.clone());
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        assert!(dedup.should_commit(a, "42").await.unwrap());
        assert!(dedup.should_commit(b, "42").await.unwrap());
    }
}
