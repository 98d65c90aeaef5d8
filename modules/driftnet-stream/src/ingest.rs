use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

use driftnet_common::{IngestedItem, StreamItem};

use crate::dedup::Deduplicator;
use crate::matching;
use crate::multiplexer::SearchFilter;
use crate::settings::StreamSettings;
use crate::traits::IngestQueue;

/// Delivery path from a connection's read loop into the durable queue:
/// match the item against member searches, gate through dedup, enqueue in
/// receipt order.
#[derive(Clone)]
pub struct StreamIngestor {
    dedup: Deduplicator,
    queue: Arc<dyn IngestQueue>,
    active: watch::Receiver<HashSet<Uuid>>,
    queue_capacity: u64,
    queue_poll_interval: std::time::Duration,
}

impl StreamIngestor {
    pub fn new(
        dedup: Deduplicator,
        queue: Arc<dyn IngestQueue>,
        active: watch::Receiver<HashSet<Uuid>>,
        settings: &StreamSettings,
    ) -> Self {
        Self {
            dedup,
            queue,
            active,
            queue_capacity: settings.queue_capacity,
            queue_poll_interval: settings.queue_poll_interval,
        }
    }

    /// Deliver one item under every member search it matches. Returns how
    /// many queue entries were created.
    ///
    /// When the queue is saturated this call waits for capacity instead of
    /// dropping; the wait propagates into the connection read loop, which
    /// pauses upstream consumption. Reconnecting after a pause is cheaper
    /// than losing data.
    pub async fn ingest(&self, item: &StreamItem, filters: &[SearchFilter]) -> Result<u32> {
        let mut enqueued = 0;
        for filter in filters {
            if !matching::matches_any(&filter.terms, item) {
                continue;
            }
            // The search may have been deactivated between the last
            // re-filter and this item's arrival.
            if !self.active.borrow().contains(&filter.search_id) {
                continue;
            }
            if !self
                .dedup
                .should_commit(filter.search_id, &item.upstream_id)
                .await?
            {
                debug!(
                    search_id = %filter.search_id,
                    upstream_id = %item.upstream_id,
                    "Duplicate item skipped before enqueue"
                );
                continue;
            }

            self.wait_for_capacity().await?;
            let ingested = IngestedItem::from_stream(item, filter.search_id);
            if let Err(err) = self.queue.enqueue(&ingested).await {
                warn!(
                    search_id = %filter.search_id,
                    upstream_id = %item.upstream_id,
                    error = %err,
                    "Enqueue failed; item dropped for this search"
                );
                continue;
            }
            enqueued += 1;
        }
        Ok(enqueued)
    }

    async fn wait_for_capacity(&self) -> Result<()> {
        loop {
            if self.queue.depth().await? < self.queue_capacity {
                return Ok(());
            }
            tokio::time::sleep(self.queue_poll_interval).await;
        }
    }
}
