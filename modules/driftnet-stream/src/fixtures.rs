//! Test doubles for the streaming core: a scripted upstream source and an
//! in-memory implementation of the storage traits. The whole pipeline runs
//! against these with no network and no database.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde_json::json;
use uuid::Uuid;

use driftnet_common::{
    DriftnetError, FilterTerm, IngestedItem, QueueStats, QueuedItem, Search, StreamItem,
    TrendSnapshot, User,
};
use driftnet_store::{CommitOutcome, NackOutcome};

use crate::traits::{IngestQueue, ItemStore, ItemStream, SearchStore, StreamSource, TrendStore};

// ---------------------------------------------------------------------------
// ScriptedSource: replays a scripted item sequence per open() call
// ---------------------------------------------------------------------------

pub enum OpenScript {
    /// Fail the open itself.
    Fail(DriftnetError),
    /// Yield these items, then stay connected until dropped.
    Items(Vec<StreamItem>),
    /// Yield these items, then terminate with the failure.
    ItemsThenFail(Vec<StreamItem>, DriftnetError),
}

pub struct ScriptedSource {
    scripts: Mutex<VecDeque<OpenScript>>,
    opens: Mutex<Vec<Vec<FilterTerm>>>,
}

impl ScriptedSource {
    pub fn new(scripts: Vec<OpenScript>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            opens: Mutex::new(Vec::new()),
        }
    }

    pub fn push_script(&self, script: OpenScript) {
        self.scripts.lock().unwrap().push_back(script);
    }

    /// Term sets submitted to open(), in call order.
    pub fn open_terms(&self) -> Vec<Vec<FilterTerm>> {
        self.opens.lock().unwrap().clone()
    }

    pub fn open_count(&self) -> usize {
        self.opens.lock().unwrap().len()
    }
}

#[async_trait]
impl StreamSource for ScriptedSource {
    async fn open(&self, terms: &[FilterTerm]) -> Result<ItemStream, DriftnetError> {
        self.opens.lock().unwrap().push(terms.to_vec());
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(OpenScript::Items(Vec::new()));

        match script {
            OpenScript::Fail(err) => Err(err),
            OpenScript::Items(items) => Ok(futures::stream::iter(items.into_iter().map(Ok))
                .chain(futures::stream::pending())
                .boxed()),
            OpenScript::ItemsThenFail(items, err) => {
                Ok(futures::stream::iter(items.into_iter().map(Ok).chain(std::iter::once(Err(err))))
                    .boxed())
            }
        }
    }
}

/// A minimal post payload matching the given keyword text.
pub fn post(id: &str, text: &str) -> StreamItem {
    StreamItem {
        upstream_id: id.to_string(),
        payload: json!({
            "id_str": id,
            "text": text,
            "user": {"screen_name": "someone"}
        }),
        received_at: Utc::now(),
    }
}

// ---------------------------------------------------------------------------
// MemoryStore: storage traits backed by process memory
// ---------------------------------------------------------------------------

struct MemRow {
    id: i64,
    item: IngestedItem,
    attempts: u32,
    claimed: bool,
    enqueued_at: DateTime<Utc>,
}

#[derive(Default)]
struct MemInner {
    committed: HashMap<(Uuid, String), IngestedItem>,
    queue: Vec<MemRow>,
    next_queue_id: i64,
    dead_letters: Vec<(IngestedItem, u32, String)>,
    searches: HashMap<Uuid, Search>,
    users: Vec<User>,
    trend_snapshots: Vec<TrendSnapshot>,
    /// upstream_id -> remaining forced commit failures.
    fail_commits: HashMap<String, u32>,
}

pub struct MemoryStore {
    inner: Mutex<MemInner>,
    max_item_attempts: u32,
}

impl MemoryStore {
    pub fn new(max_item_attempts: u32) -> Self {
        Self {
            inner: Mutex::new(MemInner::default()),
            max_item_attempts,
        }
    }

    pub fn insert_search(&self, search: Search) {
        self.inner.lock().unwrap().searches.insert(search.id, search);
    }

    /// Append a new term-group generation, as the storage layer does when a
    /// live search's query is edited.
    pub fn push_search_terms(&self, search_id: Uuid, terms: Vec<FilterTerm>) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(search) = inner.searches.get_mut(&search_id) {
            search.push_query(terms);
        }
    }

    pub fn insert_user(&self, user: User) {
        self.inner.lock().unwrap().users.push(user);
    }

    /// Force the next `times` commits of this upstream id to fail.
    pub fn fail_commits_for(&self, upstream_id: &str, times: u32) {
        self.inner
            .lock()
            .unwrap()
            .fail_commits
            .insert(upstream_id.to_string(), times);
    }

    pub fn committed_count(&self, search_id: Uuid) -> usize {
        self.inner
            .lock()
            .unwrap()
            .committed
            .keys()
            .filter(|(id, _)| *id == search_id)
            .count()
    }

    pub fn dead_letter_count(&self) -> usize {
        self.inner.lock().unwrap().dead_letters.len()
    }

    pub fn queue_depth_sync(&self) -> u64 {
        self.inner.lock().unwrap().queue.len() as u64
    }

    pub fn queued_for(&self, search_id: Uuid) -> usize {
        self.inner
            .lock()
            .unwrap()
            .queue
            .iter()
            .filter(|row| row.item.search_id == search_id)
            .count()
    }

    pub fn enqueue_sync(&self, item: IngestedItem) {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_queue_id;
        inner.next_queue_id += 1;
        inner.queue.push(MemRow {
            id,
            item,
            attempts: 0,
            claimed: false,
            enqueued_at: Utc::now(),
        });
    }

    pub fn trend_snapshot_count(&self) -> usize {
        self.inner.lock().unwrap().trend_snapshots.len()
    }
}

#[async_trait]
impl ItemStore for MemoryStore {
    async fn is_committed(&self, search_id: Uuid, upstream_id: &str) -> Result<bool> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .committed
            .contains_key(&(search_id, upstream_id.to_string())))
    }

    async fn commit_item(&self, item: &IngestedItem) -> Result<CommitOutcome> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(remaining) = inner.fail_commits.get_mut(&item.upstream_id) {
            if *remaining > 0 {
                *remaining -= 1;
                anyhow::bail!("injected persistence failure for {}", item.upstream_id);
            }
        }
        let key = (item.search_id, item.upstream_id.clone());
        if inner.committed.contains_key(&key) {
            return Ok(CommitOutcome::Duplicate);
        }
        inner.committed.insert(key, item.clone());
        Ok(CommitOutcome::Committed)
    }
}

#[async_trait]
impl IngestQueue for MemoryStore {
    async fn enqueue(&self, item: &IngestedItem) -> Result<()> {
        self.enqueue_sync(item.clone());
        Ok(())
    }

    async fn dequeue_batch(&self, max: u32) -> Result<Vec<QueuedItem>> {
        let mut inner = self.inner.lock().unwrap();
        let mut batch = Vec::new();
        for row in inner.queue.iter_mut() {
            if batch.len() as u32 >= max {
                break;
            }
            if row.claimed {
                continue;
            }
            row.claimed = true;
            batch.push(QueuedItem {
                queue_id: row.id,
                item: row.item.clone(),
                attempts: row.attempts,
                enqueued_at: row.enqueued_at,
            });
        }
        Ok(batch)
    }

    async fn ack(&self, queue_id: i64) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .queue
            .retain(|row| row.id != queue_id);
        Ok(())
    }

    async fn nack(&self, queue_id: i64, error: &str) -> Result<NackOutcome> {
        let mut inner = self.inner.lock().unwrap();
        let Some(position) = inner.queue.iter().position(|row| row.id == queue_id) else {
            return Ok(NackOutcome::Requeued { attempts: 0 });
        };
        let attempts = inner.queue[position].attempts + 1;
        if attempts >= self.max_item_attempts {
            let row = inner.queue.remove(position);
            inner
                .dead_letters
                .push((row.item, attempts, error.to_string()));
            Ok(NackOutcome::DeadLettered)
        } else {
            let row = &mut inner.queue[position];
            row.attempts = attempts;
            row.claimed = false;
            Ok(NackOutcome::Requeued { attempts })
        }
    }

    async fn depth(&self) -> Result<u64> {
        Ok(self.queue_depth_sync())
    }

    async fn queue_stats(&self, search_id: Uuid) -> Result<QueueStats> {
        let inner = self.inner.lock().unwrap();
        Ok(QueueStats {
            depth: inner
                .queue
                .iter()
                .filter(|row| row.item.search_id == search_id)
                .count() as u64,
            dead_letters: inner
                .dead_letters
                .iter()
                .filter(|(item, _, _)| item.search_id == search_id)
                .count() as u64,
            committed: inner
                .committed
                .keys()
                .filter(|(id, _)| *id == search_id)
                .count() as u64,
        })
    }
}

#[async_trait]
impl SearchStore for MemoryStore {
    async fn get_search(&self, id: Uuid) -> Result<Option<Search>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .searches
            .get(&id)
            .filter(|s| !s.deleted)
            .cloned())
    }

    async fn get_active_searches(&self) -> Result<Vec<Search>> {
        let inner = self.inner.lock().unwrap();
        let mut active: Vec<Search> = inner
            .searches
            .values()
            .filter(|s| s.active && !s.deleted)
            .cloned()
            .collect();
        active.sort_by_key(|s| s.created_at);
        Ok(active)
    }

    async fn set_search_active(&self, id: Uuid, active: bool) -> Result<()> {
        if let Some(search) = self.inner.lock().unwrap().searches.get_mut(&id) {
            search.active = active;
        }
        Ok(())
    }

    async fn record_announcement(&self, id: Uuid, post_id: &str) -> Result<()> {
        if let Some(search) = self.inner.lock().unwrap().searches.get_mut(&id) {
            search.announcement_post_id = Some(post_id.to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl TrendStore for MemoryStore {
    async fn users_with_places(&self) -> Result<Vec<User>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .users
            .iter()
            .filter(|u| !u.places.is_empty())
            .cloned()
            .collect())
    }

    async fn save_trend_snapshot(&self, snapshot: &TrendSnapshot) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .trend_snapshots
            .push(snapshot.clone());
        Ok(())
    }
}
