use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use driftnet_common::{DriftnetError, QueueStats};

use crate::backoff::BackoffPolicy;
use crate::dedup::Deduplicator;
use crate::ingest::StreamIngestor;
use crate::multiplexer::{ConnectionId, ConnectionOp, StreamMultiplexer};
use crate::persister::Persister;
use crate::registry::SearchStreamRegistry;
use crate::settings::StreamSettings;
use crate::supervisor::{ConnectionHandle, ReconnectSupervisor};
use crate::traits::{IngestQueue, ItemStore, SearchStore, StreamSource};

/// How an activation request was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// The search is assigned to a connection; streaming is starting.
    Live,
    /// Every connection is at capacity. The search is active and parked;
    /// streaming begins automatically once a slot frees. Not an error.
    Deferred,
}

/// Registry, multiplexer and the open-connection table, mutated together
/// under one lock so assignment recomputation is never observed mid-update.
struct Reconciler {
    registry: SearchStreamRegistry,
    multiplexer: StreamMultiplexer,
    connections: HashMap<ConnectionId, ConnectionHandle>,
}

/// Public facade over the streaming core.
///
/// Owns the registry and the open-connection table for its whole lifecycle:
/// created on process start, torn down by `stop()`.
pub struct StreamController {
    reconciler: Mutex<Reconciler>,
    source: Arc<dyn StreamSource>,
    searches: Arc<dyn SearchStore>,
    queue: Arc<dyn IngestQueue>,
    ingestor: StreamIngestor,
    policy: BackoffPolicy,
    settings: StreamSettings,
    /// Searches currently active, observed lock-free by the ingest path and
    /// the persister.
    active_tx: watch::Sender<HashSet<Uuid>>,
    shutdown_tx: watch::Sender<bool>,
    persister_tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl StreamController {
    pub fn new(
        source: Arc<dyn StreamSource>,
        searches: Arc<dyn SearchStore>,
        items: Arc<dyn ItemStore>,
        queue: Arc<dyn IngestQueue>,
        settings: StreamSettings,
    ) -> Arc<Self> {
        let (active_tx, active_rx) = watch::channel(HashSet::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let dedup = Deduplicator::new(items.clone());
        let ingestor = StreamIngestor::new(dedup, queue.clone(), active_rx.clone(), &settings);

        let persister = Persister::new(queue.clone(), items, active_rx, shutdown_rx, settings.clone());
        let persister_tasks = persister.spawn_workers();

        Arc::new(Self {
            reconciler: Mutex::new(Reconciler {
                registry: SearchStreamRegistry::new(),
                multiplexer: StreamMultiplexer::from_settings(&settings),
                connections: HashMap::new(),
            }),
            source,
            searches,
            queue,
            ingestor,
            policy: BackoffPolicy::from_settings(&settings),
            settings,
            active_tx,
            shutdown_tx,
            persister_tasks: std::sync::Mutex::new(persister_tasks),
        })
    }

    /// Activate streaming for a search. Idempotent: re-activating a live
    /// search replaces its filter in place (used when its query is edited).
    /// Returns once the activation is registered; the physical connection
    /// is established asynchronously.
    pub async fn start_stream(
        &self,
        search_id: Uuid,
        announcement_post_id: Option<&str>,
    ) -> Result<Activation, DriftnetError> {
        let search = self
            .searches
            .get_search(search_id)
            .await?
            .ok_or(DriftnetError::UnknownSearch(search_id))?;
        let terms = search.current_terms().to_vec();

        if let Some(post_id) = announcement_post_id {
            self.searches.record_announcement(search_id, post_id).await?;
        }
        if !search.active {
            self.searches.set_search_active(search_id, true).await?;
        }

        let mut guard = self.reconciler.lock().await;
        let rec = &mut *guard;
        rec.registry.activate(search_id, terms);
        self.active_tx.send_modify(|set| {
            set.insert(search_id);
        });
        let ops = rec.multiplexer.reconcile(&rec.registry);
        self.apply_ops(rec, ops);

        let activation = if rec.multiplexer.is_deferred(search_id) {
            Activation::Deferred
        } else {
            Activation::Live
        };
        info!(search_id = %search_id, ?activation, "Stream activation registered");
        Ok(activation)
    }

    /// Deactivate streaming for a search. After this returns, no further
    /// stream items are committed for it; items already queued drain (or
    /// are discarded, per `drain_on_deactivate`).
    pub async fn stop_stream(&self, search_id: Uuid) -> Result<(), DriftnetError> {
        self.searches.set_search_active(search_id, false).await?;

        let mut guard = self.reconciler.lock().await;
        let rec = &mut *guard;
        if !rec.registry.deactivate(search_id) {
            return Ok(());
        }
        self.active_tx.send_modify(|set| {
            set.remove(&search_id);
        });
        let ops = rec.multiplexer.reconcile(&rec.registry);
        self.apply_ops(rec, ops);

        info!(search_id = %search_id, "Stream deactivated");
        Ok(())
    }

    /// Re-activate every search the store marks active. Called once on
    /// process start so streaming survives restarts.
    pub async fn resume(&self) -> Result<usize, DriftnetError> {
        let searches = self.searches.get_active_searches().await?;
        let count = searches.len();

        let mut guard = self.reconciler.lock().await;
        let rec = &mut *guard;
        for search in &searches {
            rec.registry
                .activate(search.id, search.current_terms().to_vec());
            self.active_tx.send_modify(|set| {
                set.insert(search.id);
            });
        }
        let ops = rec.multiplexer.reconcile(&rec.registry);
        self.apply_ops(rec, ops);

        if count > 0 {
            info!(count, "Resumed active searches");
        }
        Ok(count)
    }

    /// Global shutdown: close every connection, drain the queue bounded by
    /// the shutdown timeout, stop the persister workers. Stored `active`
    /// flags are left untouched so a restart resumes the same searches.
    pub async fn stop(&self) -> Result<(), DriftnetError> {
        info!("Stream controller stopping");

        {
            let mut guard = self.reconciler.lock().await;
            let rec = &mut *guard;
            rec.registry.clear();
            rec.multiplexer.reconcile(&rec.registry);
            let handles: Vec<ConnectionHandle> =
                rec.connections.drain().map(|(_, handle)| handle).collect();
            for handle in handles {
                handle.close().await;
            }
        }

        let deadline = tokio::time::Instant::now() + self.settings.shutdown_timeout;
        loop {
            let depth = self.queue.depth().await?;
            if depth == 0 {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(depth, "Queue failed to drain before shutdown deadline");
                self.shutdown_persisters().await;
                return Err(DriftnetError::ShutdownTimeout(self.settings.shutdown_timeout));
            }
            tokio::time::sleep(self.settings.queue_poll_interval).await;
        }

        self.shutdown_persisters().await;
        info!("Stream controller stopped");
        Ok(())
    }

    /// Read-only queue snapshot for one search, for UI display.
    pub async fn queue_stats(&self, search_id: Uuid) -> Result<QueueStats, DriftnetError> {
        Ok(self.queue.queue_stats(search_id).await?)
    }

    /// Number of physical connections currently open.
    pub async fn connection_count(&self) -> usize {
        self.reconciler.lock().await.connections.len()
    }

    /// Signal the persister workers to stop and await their handles.
    async fn shutdown_persisters(&self) {
        let _ = self.shutdown_tx.send(true);
        let handles: Vec<JoinHandle<()>> =
            std::mem::take(&mut *self.persister_tasks.lock().unwrap());
        for handle in handles {
            let _ = handle.await;
        }
    }

    fn apply_ops(&self, rec: &mut Reconciler, ops: Vec<ConnectionOp>) {
        for op in ops {
            match op {
                ConnectionOp::Open {
                    connection_id,
                    filters,
                } => {
                    let handle = ReconnectSupervisor::spawn(
                        connection_id,
                        self.source.clone(),
                        self.ingestor.clone(),
                        filters,
                        self.policy.clone(),
                    );
                    rec.connections.insert(connection_id, handle);
                }
                ConnectionOp::Refilter {
                    connection_id,
                    filters,
                } => {
                    if let Some(handle) = rec.connections.get(&connection_id) {
                        handle.refilter(filters);
                    }
                }
                ConnectionOp::Close { connection_id } => {
                    if let Some(handle) = rec.connections.remove(&connection_id) {
                        // Close asynchronously; the reconcile lock is held
                        // and the task join must not stall other callers.
                        tokio::spawn(async move { handle.close().await });
                    }
                }
            }
        }
    }
}
