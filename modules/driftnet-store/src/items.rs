use anyhow::Result;
use sqlx::Row;
use tracing::info;
use uuid::Uuid;

use driftnet_common::IngestedItem;

use crate::PgStore;

/// Result of an idempotent commit attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// The (search_id, upstream_id) pair was already present.
    Duplicate,
}

impl PgStore {
    /// Durably write one item under one search. Idempotent on the
    /// (search_id, upstream_id) pair: a second commit of the same pair is a
    /// no-op reported as `Duplicate`.
    pub async fn commit_item(&self, item: &IngestedItem) -> Result<CommitOutcome> {
        let result = sqlx::query(
            r#"
            INSERT INTO items (search_id, upstream_id, payload, received_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (search_id, upstream_id) DO NOTHING
            "#,
        )
        .bind(item.search_id)
        .bind(&item.upstream_id)
        .bind(&item.payload)
        .bind(item.received_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            Ok(CommitOutcome::Duplicate)
        } else {
            Ok(CommitOutcome::Committed)
        }
    }

    /// Dedup existence check. Storage-backed so a fresh process never
    /// re-emits items persisted in a prior run.
    pub async fn is_committed(&self, search_id: Uuid, upstream_id: &str) -> Result<bool> {
        let row = sqlx::query(
            "SELECT 1 AS one FROM items WHERE search_id = $1 AND upstream_id = $2",
        )
        .bind(search_id)
        .bind(upstream_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    pub async fn item_count(&self, search_id: Uuid) -> Result<u64> {
        let row = sqlx::query("SELECT count(*) AS n FROM items WHERE search_id = $1")
            .bind(search_id)
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.get("n");
        Ok(n as u64)
    }

    /// One-shot historical backfill: commit a page of search-API results
    /// through the same idempotent path the live pipeline uses. Returns how
    /// many were new.
    pub async fn import_page(
        &self,
        search_id: Uuid,
        statuses: &[serde_json::Value],
    ) -> Result<u64> {
        let mut imported = 0;
        for status in statuses {
            let Some(upstream_id) = status.get("id_str").and_then(|v| v.as_str()) else {
                continue;
            };
            let item = IngestedItem {
                search_id,
                upstream_id: upstream_id.to_string(),
                payload: status.clone(),
                received_at: chrono::Utc::now(),
            };
            if self.commit_item(&item).await? == CommitOutcome::Committed {
                imported += 1;
            }
        }
        info!(search_id = %search_id, imported, total = statuses.len(), "Backfill page imported");
        Ok(imported)
    }
}
