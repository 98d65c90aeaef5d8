use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, warn};

use driftnet_common::DriftnetError;

use crate::backoff::BackoffPolicy;
use crate::ingest::StreamIngestor;
use crate::multiplexer::{combined_terms, ConnectionId, SearchFilter};
use crate::traits::StreamSource;

/// Lifecycle of one physical connection. Owned exclusively by its
/// supervisor task; everyone else observes through a watch channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Streaming,
    Backoff {
        attempt: u32,
        next_retry_at: DateTime<Utc>,
    },
    Closing,
}

/// Handle to a supervised connection task. Dropping the handle without
/// calling `close` also stops the task (its channels close).
pub struct ConnectionHandle {
    pub id: ConnectionId,
    filters_tx: watch::Sender<Vec<SearchFilter>>,
    close_tx: watch::Sender<bool>,
    state_rx: watch::Receiver<ConnectionState>,
    task: JoinHandle<()>,
}

impl ConnectionHandle {
    /// Swap the connection's predicate in place. The supervisor drops the
    /// current stream and reopens with the new terms; the task survives.
    pub fn refilter(&self, filters: Vec<SearchFilter>) {
        let _ = self.filters_tx.send(filters);
    }

    pub fn state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    /// Request close and wait for the task to finish. Prompt: an in-flight
    /// read is abandoned, not waited out.
    pub async fn close(self) {
        let _ = self.close_tx.send(true);
        let _ = self.task.await;
    }
}

/// Owns retry/backoff for one connection and runs its read loop.
pub struct ReconnectSupervisor;

impl ReconnectSupervisor {
    pub fn spawn(
        id: ConnectionId,
        source: Arc<dyn StreamSource>,
        ingestor: StreamIngestor,
        filters: Vec<SearchFilter>,
        policy: BackoffPolicy,
    ) -> ConnectionHandle {
        let (filters_tx, filters_rx) = watch::channel(filters);
        let (close_tx, close_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let task = tokio::spawn(run(id, source, ingestor, filters_rx, close_rx, state_tx, policy));

        ConnectionHandle {
            id,
            filters_tx,
            close_tx,
            state_rx,
            task,
        }
    }
}

enum ReadOutcome {
    CloseRequested,
    FilterChanged,
    Failed(DriftnetError),
}

async fn run(
    id: ConnectionId,
    source: Arc<dyn StreamSource>,
    ingestor: StreamIngestor,
    mut filters_rx: watch::Receiver<Vec<SearchFilter>>,
    mut close_rx: watch::Receiver<bool>,
    state_tx: watch::Sender<ConnectionState>,
    policy: BackoffPolicy,
) {
    let mut attempt: u32 = 0;

    'lifecycle: loop {
        if *close_rx.borrow() {
            break;
        }

        let filters = filters_rx.borrow_and_update().clone();
        let terms = combined_terms(&filters);
        if terms.is_empty() {
            let _ = state_tx.send(ConnectionState::Disconnected);
            tokio::select! {
                changed = filters_rx.changed() => {
                    if changed.is_err() {
                        break 'lifecycle;
                    }
                    continue 'lifecycle;
                }
                _ = close_requested(&mut close_rx) => break 'lifecycle,
            }
        }

        let _ = state_tx.send(ConnectionState::Connecting);
        let opened = tokio::select! {
            opened = source.open(&terms) => opened,
            _ = close_requested(&mut close_rx) => break 'lifecycle,
        };

        let failure = match opened {
            Ok(mut stream) => {
                let _ = state_tx.send(ConnectionState::Streaming);
                info!(connection = %id, terms = terms.len(), "Stream connected");
                let connected_at = Instant::now();

                let outcome =
                    read_loop(&mut stream, &filters, &ingestor, &mut filters_rx, &mut close_rx)
                        .await;

                // Streaming longer than the backoff cap counts as sustained
                // success; the attempt counter starts over.
                if connected_at.elapsed() >= policy.sustained_threshold() {
                    attempt = 0;
                }

                match outcome {
                    ReadOutcome::CloseRequested => break 'lifecycle,
                    ReadOutcome::FilterChanged => {
                        info!(connection = %id, "Filter changed; reopening with current terms");
                        continue 'lifecycle;
                    }
                    ReadOutcome::Failed(err) => err,
                }
            }
            Err(err) => err,
        };

        attempt += 1;
        let delay = policy.delay(attempt, failure.is_rate_limit());
        let next_retry_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
        let _ = state_tx.send(ConnectionState::Backoff {
            attempt,
            next_retry_at,
        });
        warn!(
            connection = %id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %failure,
            "Stream failed, backing off"
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = close_requested(&mut close_rx) => break 'lifecycle,
        }
        // A filter edit during backoff is picked up at the top of the loop,
        // so streaming resumes with the then-current terms.
    }

    let _ = state_tx.send(ConnectionState::Closing);
    info!(connection = %id, "Connection closed");
    let _ = state_tx.send(ConnectionState::Disconnected);
}

async fn read_loop(
    stream: &mut crate::traits::ItemStream,
    filters: &[SearchFilter],
    ingestor: &StreamIngestor,
    filters_rx: &mut watch::Receiver<Vec<SearchFilter>>,
    close_rx: &mut watch::Receiver<bool>,
) -> ReadOutcome {
    use futures::StreamExt;

    loop {
        tokio::select! {
            _ = close_requested(close_rx) => return ReadOutcome::CloseRequested,
            changed = filters_rx.changed() => {
                return match changed {
                    Ok(()) => ReadOutcome::FilterChanged,
                    Err(_) => ReadOutcome::CloseRequested,
                };
            }
            next = stream.next() => match next {
                Some(Ok(item)) => {
                    if let Err(err) = ingestor.ingest(&item, filters).await {
                        error!(upstream_id = %item.upstream_id, error = %err, "Failed to ingest item");
                    }
                }
                Some(Err(err)) => return ReadOutcome::Failed(err),
                // Sources signal termination with an Err item; a bare end
                // still must not look like success.
                None => return ReadOutcome::Failed(DriftnetError::StreamClosed),
            }
        }
    }
}

/// Resolves once close has been requested, or the controller dropped the
/// handle entirely.
async fn close_requested(close_rx: &mut watch::Receiver<bool>) {
    loop {
        if *close_rx.borrow_and_update() {
            return;
        }
        if close_rx.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::time::Duration;

    use tokio::sync::watch;
    use uuid::Uuid;

    use driftnet_common::FilterTerm;

    use crate::dedup::Deduplicator;
    use crate::fixtures::{post, MemoryStore, OpenScript, ScriptedSource};
    use crate::ingest::StreamIngestor;
    use crate::settings::StreamSettings;

    fn spawn_one(
        source: Arc<ScriptedSource>,
        store: Arc<MemoryStore>,
        active: &[Uuid],
        filters: Vec<SearchFilter>,
    ) -> ConnectionHandle {
        let settings = StreamSettings::builder()
            .backoff_base(Duration::from_millis(10))
            .backoff_cap(Duration::from_millis(100))
            .rate_limit_floor(Duration::from_millis(50))
            .backoff_jitter(Duration::from_millis(2))
            .queue_poll_interval(Duration::from_millis(5))
            .build();
        let (_active_tx, active_rx) = watch::channel::<HashSet<Uuid>>(active.iter().copied().collect());
        let ingestor = StreamIngestor::new(
            Deduplicator::new(store.clone()),
            store,
            active_rx,
            &settings,
        );
        ReconnectSupervisor::spawn(
            ConnectionId::new(0),
            source,
            ingestor,
            filters,
            crate::backoff::BackoffPolicy::from_settings(&settings),
        )
    }

    #[tokio::test]
    async fn rate_limit_backs_off_then_streams() {
        let store = Arc::new(MemoryStore::new(5));
        let search_id = Uuid::new_v4();
        let source = Arc::new(ScriptedSource::new(vec![
            OpenScript::Fail(DriftnetError::RateLimited),
            OpenScript::Items(vec![post("1", "obama speech")]),
        ]));
        let filters = vec![SearchFilter {
            search_id,
            terms: vec![FilterTerm::keyword("obama")],
        }];

        let handle = spawn_one(source.clone(), store.clone(), &[search_id], filters);

        let mut saw_backoff = false;
        let waited = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let ConnectionState::Backoff { attempt, .. } = handle.state() {
                    assert_eq!(attempt, 1);
                    saw_backoff = true;
                }
                if source.open_count() >= 2 && store.committed_count(search_id) == 0 {
                    // Item is still in the queue; no persister running here.
                    if store.queue_depth_sync() == 1 {
                        break;
                    }
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await;
        assert!(waited.is_ok(), "supervisor should retry and stream the item");
        assert!(saw_backoff, "backoff state must be observable");
        assert_eq!(handle.state(), ConnectionState::Streaming);

        handle.close().await;
    }

    #[tokio::test]
    async fn close_interrupts_a_blocked_read_promptly() {
        let store = Arc::new(MemoryStore::new(5));
        let search_id = Uuid::new_v4();
        // Empty script: the stream connects and then pends forever.
        let source = Arc::new(ScriptedSource::new(vec![OpenScript::Items(vec![])]));
        let filters = vec![SearchFilter {
            search_id,
            terms: vec![FilterTerm::keyword("obama")],
        }];

        let handle = spawn_one(source, store, &[search_id], filters);

        let closed = tokio::time::timeout(Duration::from_secs(1), handle.close()).await;
        assert!(closed.is_ok(), "close must not wait out a blocked read");
    }
}
