use anyhow::Result;
use sqlx::postgres::PgRow;
use sqlx::Row;
use tracing::info;
use uuid::Uuid;

use driftnet_common::{FilterTerm, Search, TermGroup};

use crate::PgStore;

fn search_from_row(row: &PgRow) -> Result<Search> {
    let queries: Vec<TermGroup> = serde_json::from_value(row.get("queries"))?;
    Ok(Search {
        id: row.get("id"),
        user_id: row.get("user_id"),
        title: row.get("title"),
        queries,
        active: row.get("active"),
        archive_started: row.get("archive_started"),
        deleted: row.get("deleted"),
        announcement_post_id: row.get("announcement_post_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

impl PgStore {
    pub async fn create_search(&self, search: &Search) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO searches
                (id, user_id, title, queries, active, archive_started, deleted,
                 announcement_post_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(search.id)
        .bind(search.user_id)
        .bind(&search.title)
        .bind(serde_json::to_value(&search.queries)?)
        .bind(search.active)
        .bind(search.archive_started)
        .bind(search.deleted)
        .bind(&search.announcement_post_id)
        .bind(search.created_at)
        .bind(search.updated_at)
        .execute(&self.pool)
        .await?;

        info!(search_id = %search.id, title = %search.title, "Search created");
        Ok(())
    }

    pub async fn get_search(&self, id: Uuid) -> Result<Option<Search>> {
        let row = sqlx::query("SELECT * FROM searches WHERE id = $1 AND NOT deleted")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(search_from_row).transpose()
    }

    /// All non-deleted searches currently flagged active. Used to resume
    /// streaming after a process restart.
    pub async fn get_active_searches(&self) -> Result<Vec<Search>> {
        let rows =
            sqlx::query("SELECT * FROM searches WHERE active AND NOT deleted ORDER BY created_at")
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(search_from_row).collect()
    }

    /// Persist the full search row, term-group history included.
    pub async fn update_search(&self, search: &Search) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE searches
            SET title = $2, queries = $3, active = $4, archive_started = $5,
                announcement_post_id = $6, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(search.id)
        .bind(&search.title)
        .bind(serde_json::to_value(&search.queries)?)
        .bind(search.active)
        .bind(search.archive_started)
        .bind(&search.announcement_post_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_search_active(&self, id: Uuid, active: bool) -> Result<()> {
        sqlx::query("UPDATE searches SET active = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(active)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Append a new term-group generation to a live search.
    pub async fn push_search_query(&self, id: Uuid, terms: Vec<FilterTerm>) -> Result<()> {
        let mut search = self
            .get_search(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("no such search: {id}"))?;
        search.push_query(terms);
        self.update_search(&search).await
    }

    pub async fn record_announcement(&self, id: Uuid, post_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE searches SET announcement_post_id = $2, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(post_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Soft delete. Referenced items stay on disk.
    pub async fn delete_search(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE searches SET deleted = true, active = false, updated_at = now() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        info!(search_id = %id, "Search soft-deleted");
        Ok(())
    }
}
