use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use driftnet_common::QueuedItem;
use driftnet_store::{CommitOutcome, NackOutcome};

use crate::settings::StreamSettings;
use crate::traits::{IngestQueue, ItemStore};

/// Drains the durable queue into storage. Several workers may run
/// concurrently; batch claims are worker-exclusive, and commits are
/// idempotent on the (search, item) pair, so workers never conflict.
pub struct Persister {
    queue: Arc<dyn IngestQueue>,
    items: Arc<dyn ItemStore>,
    active: watch::Receiver<HashSet<Uuid>>,
    shutdown: watch::Receiver<bool>,
    settings: StreamSettings,
}

impl Persister {
    pub fn new(
        queue: Arc<dyn IngestQueue>,
        items: Arc<dyn ItemStore>,
        active: watch::Receiver<HashSet<Uuid>>,
        shutdown: watch::Receiver<bool>,
        settings: StreamSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            queue,
            items,
            active,
            shutdown,
            settings,
        })
    }

    pub fn spawn_workers(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        (0..self.settings.persister_workers)
            .map(|worker| {
                let persister = Arc::clone(self);
                tokio::spawn(async move { persister.run_worker(worker).await })
            })
            .collect()
    }

    async fn run_worker(&self, worker: usize) {
        info!(worker, "Persister worker started");
        let mut shutdown = self.shutdown.clone();

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            let batch = match self.queue.dequeue_batch(self.settings.persist_batch_size).await {
                Ok(batch) => batch,
                Err(err) => {
                    warn!(worker, error = %err, "Queue poll failed");
                    tokio::time::sleep(self.settings.persist_idle_wait).await;
                    continue;
                }
            };

            if batch.is_empty() {
                tokio::select! {
                    _ = tokio::time::sleep(self.settings.persist_idle_wait) => {}
                    _ = shutdown.changed() => {}
                }
                continue;
            }

            for queued in batch {
                self.persist_one(queued).await;
            }
        }

        info!(worker, "Persister worker stopped");
    }

    /// One item, one explicit commit point. Failures stay on the queue for
    /// retry; the retry budget promotes chronic failures to dead letters
    /// without stalling the rest of the pipeline.
    async fn persist_one(&self, queued: QueuedItem) {
        let search_id = queued.item.search_id;

        // Deactivated searches: default policy lets queued items drain;
        // the discard policy releases them uncommitted.
        if !self.settings.drain_on_deactivate && !self.active.borrow().contains(&search_id) {
            if let Err(err) = self.queue.ack(queued.queue_id).await {
                warn!(queue_id = queued.queue_id, error = %err, "Failed to release discarded item");
            } else {
                debug!(search_id = %search_id, upstream_id = %queued.item.upstream_id, "Discarded item for deactivated search");
            }
            return;
        }

        match self.items.commit_item(&queued.item).await {
            Ok(CommitOutcome::Committed) => {
                if let Err(err) = self.queue.ack(queued.queue_id).await {
                    // The commit is durable; a failed release only means the
                    // row gets re-claimed and skipped as a duplicate later.
                    warn!(queue_id = queued.queue_id, error = %err, "Commit succeeded but queue release failed");
                }
                debug!(
                    search_id = %search_id,
                    upstream_id = %queued.item.upstream_id,
                    "Item committed"
                );
            }
            Ok(CommitOutcome::Duplicate) => {
                if let Err(err) = self.queue.ack(queued.queue_id).await {
                    warn!(queue_id = queued.queue_id, error = %err, "Failed to release duplicate item");
                }
                debug!(
                    search_id = %search_id,
                    upstream_id = %queued.item.upstream_id,
                    "Duplicate item released"
                );
            }
            Err(err) => match self.queue.nack(queued.queue_id, &err.to_string()).await {
                Ok(NackOutcome::DeadLettered) => {
                    error!(
                        search_id = %search_id,
                        upstream_id = %queued.item.upstream_id,
                        error = %err,
                        "Item dead-lettered after repeated persistence failures"
                    );
                }
                Ok(NackOutcome::Requeued { attempts }) => {
                    warn!(
                        search_id = %search_id,
                        upstream_id = %queued.item.upstream_id,
                        attempts,
                        error = %err,
                        "Persistence failed; item requeued"
                    );
                }
                Err(nack_err) => {
                    error!(
                        queue_id = queued.queue_id,
                        error = %nack_err,
                        "Failed to requeue after persistence failure"
                    );
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::Utc;
    use serde_json::json;

    use driftnet_common::IngestedItem;

    use crate::fixtures::MemoryStore;

    fn queued(store: &MemoryStore, search_id: Uuid, id: &str) {
        store.enqueue_sync(IngestedItem {
            search_id,
            upstream_id: id.to_string(),
            payload: json!({"id_str": id, "text": "x"}),
            received_at: Utc::now(),
        });
    }

    fn settings() -> StreamSettings {
        StreamSettings::builder()
            .persister_workers(1)
            .persist_idle_wait(Duration::from_millis(5))
            .build()
    }

    async fn drain(store: Arc<MemoryStore>, active: &[Uuid], settings: StreamSettings) {
        let (_active_tx, active_rx) = watch::channel(active.iter().copied().collect());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let persister = Persister::new(
            store.clone(),
            store.clone(),
            active_rx,
            shutdown_rx,
            settings,
        );
        let workers = persister.spawn_workers();

        tokio::time::timeout(Duration::from_secs(5), async {
            while store.queue_depth_sync() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("queue should drain");

        let _ = shutdown_tx.send(true);
        for worker in workers {
            let _ = worker.await;
        }
    }

    #[tokio::test]
    async fn drains_queue_and_commits_once() {
        let store = Arc::new(MemoryStore::new(5));
        let search = Uuid::new_v4();
        queued(&store, search, "1");
        queued(&store, search, "2");
        // Same pair twice: the second write reports Duplicate and releases.
        queued(&store, search, "2");

        drain(store.clone(), &[search], settings()).await;

        assert_eq!(store.committed_count(search), 2);
        assert_eq!(store.dead_letter_count(), 0);
    }

    #[tokio::test]
    async fn chronic_failure_dead_letters_without_halting_pipeline() {
        let store = Arc::new(MemoryStore::new(3));
        let search = Uuid::new_v4();
        store.fail_commits_for("poison", 10);
        queued(&store, search, "poison");
        queued(&store, search, "healthy");

        drain(store.clone(), &[search], settings()).await;

        assert_eq!(store.committed_count(search), 1, "healthy item persisted");
        assert_eq!(store.dead_letter_count(), 1, "poison item dead-lettered");
    }

    #[tokio::test]
    async fn discard_policy_releases_deactivated_items_uncommitted() {
        let store = Arc::new(MemoryStore::new(5));
        let search = Uuid::new_v4();
        queued(&store, search, "1");

        let settings = StreamSettings::builder()
            .persister_workers(1)
            .persist_idle_wait(Duration::from_millis(5))
            .drain_on_deactivate(false)
            .build();
        // Search not in the active set: discard instead of drain.
        drain(store.clone(), &[], settings).await;

        assert_eq!(store.committed_count(search), 0);
        assert_eq!(store.dead_letter_count(), 0);
    }
}
