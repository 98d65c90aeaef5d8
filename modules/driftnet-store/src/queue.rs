use anyhow::Result;
use sqlx::Row;
use tracing::warn;
use uuid::Uuid;

use driftnet_common::{IngestedItem, QueueStats, QueuedItem};

use crate::PgStore;

/// A claim older than this belongs to a worker that died mid-batch; the row
/// becomes claimable again.
const CLAIM_TIMEOUT_SECS: f64 = 300.0;

/// What happened to a queue row that failed to persist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackOutcome {
    Requeued { attempts: u32 },
    DeadLettered,
}

impl PgStore {
    /// Append one item to the durable queue. Ordering within a connection
    /// is preserved by the serial queue id.
    pub async fn enqueue(&self, item: &IngestedItem) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO ingest_queue (search_id, upstream_id, payload, received_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(item.search_id)
        .bind(&item.upstream_id)
        .bind(&item.payload)
        .bind(item.received_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Claim up to `max` rows in queue order. SKIP LOCKED keeps concurrent
    /// workers from double-claiming; stale claims from dead workers are
    /// reclaimed after the timeout.
    pub async fn dequeue_batch(&self, max: u32) -> Result<Vec<QueuedItem>> {
        let rows = sqlx::query(
            r#"
            UPDATE ingest_queue
            SET claimed_at = now()
            WHERE id IN (
                SELECT id FROM ingest_queue
                WHERE claimed_at IS NULL
                   OR claimed_at < now() - make_interval(secs => $2)
                ORDER BY id
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, search_id, upstream_id, payload, received_at, attempts, enqueued_at
            "#,
        )
        .bind(max as i64)
        .bind(CLAIM_TIMEOUT_SECS)
        .fetch_all(&self.pool)
        .await?;

        let mut batch = Vec::with_capacity(rows.len());
        for row in rows {
            let attempts: i32 = row.get("attempts");
            batch.push(QueuedItem {
                queue_id: row.get("id"),
                item: IngestedItem {
                    search_id: row.get("search_id"),
                    upstream_id: row.get("upstream_id"),
                    payload: row.get("payload"),
                    received_at: row.get("received_at"),
                },
                attempts: attempts as u32,
                enqueued_at: row.get("enqueued_at"),
            });
        }
        batch.sort_by_key(|q| q.queue_id);
        Ok(batch)
    }

    /// Release a row after its item was durably committed.
    pub async fn ack(&self, queue_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM ingest_queue WHERE id = $1")
            .bind(queue_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Record a failed write. The row is requeued for retry until the
    /// attempt budget is spent, then promoted to a dead letter.
    pub async fn nack(&self, queue_id: i64, error: &str) -> Result<NackOutcome> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT search_id, upstream_id, payload, attempts FROM ingest_queue WHERE id = $1 FOR UPDATE",
        )
        .bind(queue_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            // Already acked or dead-lettered by another worker.
            tx.commit().await?;
            return Ok(NackOutcome::Requeued { attempts: 0 });
        };

        let attempts: i32 = row.get("attempts");
        let attempts = attempts as u32 + 1;

        if attempts >= self.max_item_attempts {
            let search_id: Uuid = row.get("search_id");
            let upstream_id: String = row.get("upstream_id");
            sqlx::query(
                r#"
                INSERT INTO dead_letters (search_id, upstream_id, payload, attempts, last_error)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(search_id)
            .bind(&upstream_id)
            .bind(row.get::<serde_json::Value, _>("payload"))
            .bind(attempts as i32)
            .bind(error)
            .execute(&mut *tx)
            .await?;
            sqlx::query("DELETE FROM ingest_queue WHERE id = $1")
                .bind(queue_id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            warn!(queue_id, search_id = %search_id, upstream_id = %upstream_id, "Queue row promoted to dead letter");
            return Ok(NackOutcome::DeadLettered);
        }

        sqlx::query("UPDATE ingest_queue SET attempts = $2, claimed_at = NULL WHERE id = $1")
            .bind(queue_id)
            .bind(attempts as i32)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(NackOutcome::Requeued { attempts })
    }

    pub async fn queue_depth(&self) -> Result<u64> {
        let row = sqlx::query("SELECT count(*) AS n FROM ingest_queue")
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.get("n");
        Ok(n as u64)
    }

    pub async fn queue_depth_for_search(&self, search_id: Uuid) -> Result<u64> {
        let row = sqlx::query("SELECT count(*) AS n FROM ingest_queue WHERE search_id = $1")
            .bind(search_id)
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.get("n");
        Ok(n as u64)
    }

    /// Read-only backlog snapshot for one search, for UI display.
    pub async fn queue_stats(&self, search_id: Uuid) -> Result<QueueStats> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT count(*) FROM ingest_queue WHERE search_id = $1) AS depth,
                (SELECT count(*) FROM dead_letters WHERE search_id = $1) AS dead_letters,
                (SELECT count(*) FROM items WHERE search_id = $1) AS committed
            "#,
        )
        .bind(search_id)
        .fetch_one(&self.pool)
        .await?;

        let depth: i64 = row.get("depth");
        let dead_letters: i64 = row.get("dead_letters");
        let committed: i64 = row.get("committed");
        Ok(QueueStats {
            depth: depth as u64,
            dead_letters: dead_letters as u64,
            committed: committed as u64,
        })
    }
}
