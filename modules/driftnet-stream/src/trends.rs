use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use driftnet_common::TrendSnapshot;

use crate::traits::{TrendSource, TrendStore};

/// Periodic refresher for the trending topics of every place users follow.
///
/// Scheduled independently of the controller: started and stopped alongside
/// it, but sharing none of its locks.
pub struct TrendsWatcher;

pub struct TrendsWatcherHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl TrendsWatcherHandle {
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.task.await;
    }
}

impl TrendsWatcher {
    pub fn spawn(
        store: Arc<dyn TrendStore>,
        source: Arc<dyn TrendSource>,
        interval: Duration,
    ) -> TrendsWatcherHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run(store, source, interval, shutdown_rx));
        TrendsWatcherHandle { shutdown_tx, task }
    }
}

async fn run(
    store: Arc<dyn TrendStore>,
    source: Arc<dyn TrendSource>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!(interval_secs = interval.as_secs(), "Trends watcher started");
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                refresh(store.as_ref(), source.as_ref()).await;
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
    info!("Trends watcher stopped");
}

/// One refresh pass. Fetch failures are logged and skipped; a broken place
/// never stops the others.
async fn refresh(store: &dyn TrendStore, source: &dyn TrendSource) {
    let users = match store.users_with_places().await {
        Ok(users) => users,
        Err(err) => {
            warn!(error = %err, "Failed to list users for trends refresh");
            return;
        }
    };

    let places: HashSet<String> = users.into_iter().flat_map(|u| u.places).collect();
    for place_id in places {
        match source.trends_for_place(&place_id).await {
            Ok((place_name, trends)) => {
                let snapshot = TrendSnapshot {
                    place_id: place_id.clone(),
                    place_name,
                    trends,
                    fetched_at: Utc::now(),
                };
                if let Err(err) = store.save_trend_snapshot(&snapshot).await {
                    warn!(place_id = %place_id, error = %err, "Failed to save trend snapshot");
                } else {
                    debug!(place_id = %place_id, "Trend snapshot saved");
                }
            }
            Err(err) => {
                warn!(place_id = %place_id, error = %err, "Failed to fetch trends");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use anyhow::Result;
    use async_trait::async_trait;

    use driftnet_common::{Trend, User};

    struct FakeTrends {
        store_calls: Mutex<Vec<TrendSnapshot>>,
        users: Vec<User>,
    }

    #[async_trait]
    impl TrendStore for FakeTrends {
        async fn users_with_places(&self) -> Result<Vec<User>> {
            Ok(self.users.clone())
        }

        async fn save_trend_snapshot(&self, snapshot: &TrendSnapshot) -> Result<()> {
            self.store_calls.lock().unwrap().push(snapshot.clone());
            Ok(())
        }
    }

    struct FakeSource;

    #[async_trait]
    impl TrendSource for FakeSource {
        async fn trends_for_place(&self, place_id: &str) -> Result<(String, Vec<Trend>)> {
            if place_id == "broken" {
                anyhow::bail!("upstream unavailable");
            }
            Ok((
                format!("Place {place_id}"),
                vec![Trend {
                    name: "#topic".to_string(),
                    tweet_volume: Some(1200),
                }],
            ))
        }
    }

    #[tokio::test]
    async fn refresh_saves_snapshots_and_survives_failures() {
        let store = FakeTrends {
            store_calls: Mutex::new(Vec::new()),
            users: vec![User {
                id: uuid::Uuid::new_v4(),
                screen_name: "edsu".to_string(),
                bearer_token: "t".to_string(),
                places: vec!["2450022".to_string(), "broken".to_string()],
            }],
        };

        refresh(&store, &FakeSource).await;

        let saved = store.store_calls.lock().unwrap();
        assert_eq!(saved.len(), 1, "broken place skipped, healthy place saved");
        assert_eq!(saved[0].place_id, "2450022");
    }
}
