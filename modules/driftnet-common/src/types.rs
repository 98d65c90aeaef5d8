use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// --- Filter terms ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TermKind {
    Keyword,
    Hashtag,
    User,
}

impl std::fmt::Display for TermKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TermKind::Keyword => write!(f, "keyword"),
            TermKind::Hashtag => write!(f, "hashtag"),
            TermKind::User => write!(f, "user"),
        }
    }
}

/// One match value inside a term group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilterTerm {
    pub kind: TermKind,
    pub value: String,
}

impl FilterTerm {
    pub fn keyword(value: impl Into<String>) -> Self {
        Self {
            kind: TermKind::Keyword,
            value: value.into(),
        }
    }

    pub fn hashtag(value: impl Into<String>) -> Self {
        Self {
            kind: TermKind::Hashtag,
            value: value.into(),
        }
    }

    pub fn user(value: impl Into<String>) -> Self {
        Self {
            kind: TermKind::User,
            value: value.into(),
        }
    }

    /// Render the term the way the upstream track parameter expects it.
    pub fn track_value(&self) -> String {
        match self.kind {
            TermKind::Keyword => self.value.clone(),
            TermKind::Hashtag => format!("#{}", self.value),
            TermKind::User => format!("@{}", self.value),
        }
    }
}

/// One generation of a search's query: an OR-set of terms. Editing a live
/// search appends a new group; only the newest group streams.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TermGroup {
    pub terms: Vec<FilterTerm>,
    pub created_at: DateTime<Utc>,
}

impl TermGroup {
    pub fn new(terms: Vec<FilterTerm>) -> Self {
        Self {
            terms,
            created_at: Utc::now(),
        }
    }
}

// --- Search ---

/// A user-defined standing search with an activation state. Prior term
/// groups are retained for provenance but never re-streamed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Search {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub queries: Vec<TermGroup>,
    pub active: bool,
    pub archive_started: bool,
    pub deleted: bool,
    /// Post id of the public announcement that accompanied activation,
    /// when one was made.
    pub announcement_post_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Search {
    pub fn new(user_id: Uuid, title: impl Into<String>, terms: Vec<FilterTerm>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            title: title.into(),
            queries: vec![TermGroup::new(terms)],
            active: false,
            archive_started: false,
            deleted: false,
            announcement_post_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The authoritative terms for streaming: the newest group.
    pub fn current_terms(&self) -> &[FilterTerm] {
        self.queries.last().map(|g| g.terms.as_slice()).unwrap_or(&[])
    }

    /// Append a new term-group generation.
    pub fn push_query(&mut self, terms: Vec<FilterTerm>) {
        self.queries.push(TermGroup::new(terms));
        self.updated_at = Utc::now();
    }
}

// --- Ingested items ---

/// An item as it leaves a stream connection, before search matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamItem {
    /// Upstream identifier, unique per upstream item.
    pub upstream_id: String,
    pub payload: serde_json::Value,
    pub received_at: DateTime<Utc>,
}

/// An item bound to one search it matched. The same upstream item may be
/// ingested under several searches; idempotence is keyed on
/// (search_id, upstream_id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestedItem {
    pub search_id: Uuid,
    pub upstream_id: String,
    pub payload: serde_json::Value,
    pub received_at: DateTime<Utc>,
}

impl IngestedItem {
    pub fn from_stream(item: &StreamItem, search_id: Uuid) -> Self {
        Self {
            search_id,
            upstream_id: item.upstream_id.clone(),
            payload: item.payload.clone(),
            received_at: item.received_at,
        }
    }
}

/// A queue row handed to the persister. `attempts` counts failed writes;
/// past the retry budget the row moves to the dead-letter table.
#[derive(Debug, Clone)]
pub struct QueuedItem {
    pub queue_id: i64,
    pub item: IngestedItem,
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
}

// --- Queue observability ---

/// Read-only queue snapshot for UI display.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub depth: u64,
    pub dead_letters: u64,
    pub committed: u64,
}

// --- Trends ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trend {
    pub name: String,
    pub tweet_volume: Option<u64>,
}

/// One refresh of the trending topics for a place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendSnapshot {
    pub place_id: String,
    pub place_name: String,
    pub trends: Vec<Trend>,
    pub fetched_at: DateTime<Utc>,
}

// --- Users ---

/// The slice of a user the streaming core needs: identity plus upstream
/// credentials for opening connections on their behalf.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub screen_name: String,
    pub bearer_token: String,
    /// Place ids whose trends this user follows.
    pub places: Vec<String>,
}
