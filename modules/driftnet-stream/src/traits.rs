// Trait abstractions for the streaming core's dependencies.
//
// StreamSource is the upstream capability boundary: the production
// implementation is TwitterClient, tests use a scripted double.
// ItemStore/IngestQueue/SearchStore/TrendStore cover the storage surface;
// PgStore implements all four. The fixtures crate provides in-memory
// implementations, so the whole pipeline runs under `cargo test` with no
// network and no database.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use futures::stream::BoxStream;
use futures::StreamExt;
use uuid::Uuid;

use driftnet_common::{
    DriftnetError, FilterTerm, IngestedItem, QueueStats, QueuedItem, Search, StreamItem, Trend,
    TrendSnapshot, User,
};
use driftnet_store::{CommitOutcome, NackOutcome, PgStore};
use twitter_client::{TwitterClient, TwitterError};

/// A live item sequence from one upstream connection. Lazy and unbounded
/// while connected; terminates with an `Err` item on any failure, never by
/// running dry silently.
pub type ItemStream = BoxStream<'static, Result<StreamItem, DriftnetError>>;

// ---------------------------------------------------------------------------
// StreamSource: the upstream streaming capability
// ---------------------------------------------------------------------------

#[async_trait]
pub trait StreamSource: Send + Sync {
    /// Submit a filter predicate and start streaming matching items.
    /// Restart with updated terms by calling `open` again; dropping the
    /// returned stream closes the connection.
    async fn open(&self, terms: &[FilterTerm]) -> Result<ItemStream, DriftnetError>;
}

fn map_twitter_err(err: TwitterError) -> DriftnetError {
    match err {
        TwitterError::RateLimited => DriftnetError::RateLimited,
        TwitterError::StreamClosed => DriftnetError::StreamClosed,
        TwitterError::Parse(msg) => DriftnetError::Decode(msg),
        other => DriftnetError::Transport(other.to_string()),
    }
}

#[async_trait]
impl StreamSource for TwitterClient {
    async fn open(&self, terms: &[FilterTerm]) -> Result<ItemStream, DriftnetError> {
        let track: Vec<String> = terms.iter().map(|t| t.track_value()).collect();
        let inner = self.filter_stream(&track).await.map_err(map_twitter_err)?;

        let stream = inner.map(|result| match result {
            Ok(payload) => {
                let upstream_id = payload
                    .get("id_str")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| DriftnetError::Decode("post without id_str".to_string()))?
                    .to_string();
                Ok(StreamItem {
                    upstream_id,
                    payload,
                    received_at: Utc::now(),
                })
            }
            Err(err) => Err(map_twitter_err(err)),
        });
        Ok(stream.boxed())
    }
}

// ---------------------------------------------------------------------------
// Storage capabilities
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Dedup existence check for the (search, item) idempotence pair.
    async fn is_committed(&self, search_id: Uuid, upstream_id: &str) -> Result<bool>;

    /// Durable, idempotent write. Committing marks the pair in the same
    /// transaction, so a crash between write and mark cannot happen.
    async fn commit_item(&self, item: &IngestedItem) -> Result<CommitOutcome>;
}

#[async_trait]
pub trait IngestQueue: Send + Sync {
    async fn enqueue(&self, item: &IngestedItem) -> Result<()>;

    /// Claim up to `max` rows in queue order. Per-connection order is
    /// preserved by serial ids; callers must not assume any cross-search
    /// or cross-connection order.
    async fn dequeue_batch(&self, max: u32) -> Result<Vec<QueuedItem>>;

    async fn ack(&self, queue_id: i64) -> Result<()>;

    async fn nack(&self, queue_id: i64, error: &str) -> Result<NackOutcome>;

    async fn depth(&self) -> Result<u64>;

    async fn queue_stats(&self, search_id: Uuid) -> Result<QueueStats>;
}

#[async_trait]
pub trait SearchStore: Send + Sync {
    async fn get_search(&self, id: Uuid) -> Result<Option<Search>>;

    async fn get_active_searches(&self) -> Result<Vec<Search>>;

    async fn set_search_active(&self, id: Uuid, active: bool) -> Result<()>;

    async fn record_announcement(&self, id: Uuid, post_id: &str) -> Result<()>;
}

#[async_trait]
pub trait TrendStore: Send + Sync {
    async fn users_with_places(&self) -> Result<Vec<User>>;

    async fn save_trend_snapshot(&self, snapshot: &TrendSnapshot) -> Result<()>;
}

#[async_trait]
impl ItemStore for PgStore {
    async fn is_committed(&self, search_id: Uuid, upstream_id: &str) -> Result<bool> {
        PgStore::is_committed(self, search_id, upstream_id).await
    }

    async fn commit_item(&self, item: &IngestedItem) -> Result<CommitOutcome> {
        PgStore::commit_item(self, item).await
    }
}

#[async_trait]
impl IngestQueue for PgStore {
    async fn enqueue(&self, item: &IngestedItem) -> Result<()> {
        PgStore::enqueue(self, item).await
    }

    async fn dequeue_batch(&self, max: u32) -> Result<Vec<QueuedItem>> {
        PgStore::dequeue_batch(self, max).await
    }

    async fn ack(&self, queue_id: i64) -> Result<()> {
        PgStore::ack(self, queue_id).await
    }

    async fn nack(&self, queue_id: i64, error: &str) -> Result<NackOutcome> {
        PgStore::nack(self, queue_id, error).await
    }

    async fn depth(&self) -> Result<u64> {
        PgStore::queue_depth(self).await
    }

    async fn queue_stats(&self, search_id: Uuid) -> Result<QueueStats> {
        PgStore::queue_stats(self, search_id).await
    }
}

#[async_trait]
impl SearchStore for PgStore {
    async fn get_search(&self, id: Uuid) -> Result<Option<Search>> {
        PgStore::get_search(self, id).await
    }

    async fn get_active_searches(&self) -> Result<Vec<Search>> {
        PgStore::get_active_searches(self).await
    }

    async fn set_search_active(&self, id: Uuid, active: bool) -> Result<()> {
        PgStore::set_search_active(self, id, active).await
    }

    async fn record_announcement(&self, id: Uuid, post_id: &str) -> Result<()> {
        PgStore::record_announcement(self, id, post_id).await
    }
}

#[async_trait]
impl TrendStore for PgStore {
    async fn users_with_places(&self) -> Result<Vec<User>> {
        PgStore::users_with_places(self).await
    }

    async fn save_trend_snapshot(&self, snapshot: &TrendSnapshot) -> Result<()> {
        PgStore::save_trend_snapshot(self, snapshot).await
    }
}

// ---------------------------------------------------------------------------
// TrendSource: the upstream trends capability
// ---------------------------------------------------------------------------

#[async_trait]
pub trait TrendSource: Send + Sync {
    /// Current trending topics for a place id, plus the resolved place name.
    async fn trends_for_place(&self, place_id: &str) -> Result<(String, Vec<Trend>)>;
}

#[async_trait]
impl TrendSource for TwitterClient {
    async fn trends_for_place(&self, place_id: &str) -> Result<(String, Vec<Trend>)> {
        let response = TwitterClient::trends_for_place(self, place_id).await?;
        let place_name = response
            .locations
            .first()
            .map(|l| l.name.clone())
            .unwrap_or_default();
        let trends = response
            .trends
            .into_iter()
            .map(|t| Trend {
                name: t.name,
                tweet_volume: t.tweet_volume,
            })
            .collect();
        Ok((place_name, trends))
    }
}
