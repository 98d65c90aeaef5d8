use anyhow::Result;
use sqlx::Row;
use uuid::Uuid;

use driftnet_common::{Trend, TrendSnapshot};

use crate::PgStore;

impl PgStore {
    pub async fn save_trend_snapshot(&self, snapshot: &TrendSnapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trend_snapshots (place_id, place_name, trends, fetched_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&snapshot.place_id)
        .bind(&snapshot.place_name)
        .bind(serde_json::to_value(&snapshot.trends)?)
        .bind(snapshot.fetched_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Latest snapshot per place the user follows.
    pub async fn trends_for_user(&self, user_id: Uuid) -> Result<Vec<TrendSnapshot>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT ON (t.place_id)
                t.place_id, t.place_name, t.trends, t.fetched_at
            FROM trend_snapshots t
            JOIN users u ON u.id = $1
            WHERE t.place_id IN (SELECT jsonb_array_elements_text(u.places))
            ORDER BY t.place_id, t.fetched_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut snapshots = Vec::with_capacity(rows.len());
        for row in rows {
            let trends: Vec<Trend> = serde_json::from_value(row.get("trends"))?;
            snapshots.push(TrendSnapshot {
                place_id: row.get("place_id"),
                place_name: row.get("place_name"),
                trends,
                fetched_at: row.get("fetched_at"),
            });
        }
        Ok(snapshots)
    }
}
