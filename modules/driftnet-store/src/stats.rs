use anyhow::Result;
use serde::Serialize;
use sqlx::Row;

use crate::PgStore;

/// Whole-instance counters for the stats endpoint.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SystemStats {
    pub searches: u64,
    pub active_searches: u64,
    pub items: u64,
    pub queue_depth: u64,
    pub dead_letters: u64,
}

impl PgStore {
    pub async fn system_stats(&self) -> Result<SystemStats> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT count(*) FROM searches WHERE NOT deleted) AS searches,
                (SELECT count(*) FROM searches WHERE active AND NOT deleted) AS active_searches,
                (SELECT count(*) FROM items) AS items,
                (SELECT count(*) FROM ingest_queue) AS queue_depth,
                (SELECT count(*) FROM dead_letters) AS dead_letters
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(SystemStats {
            searches: row.get::<i64, _>("searches") as u64,
            active_searches: row.get::<i64, _>("active_searches") as u64,
            items: row.get::<i64, _>("items") as u64,
            queue_depth: row.get::<i64, _>("queue_depth") as u64,
            dead_letters: row.get::<i64, _>("dead_letters") as u64,
        })
    }
}
