use anyhow::Result;
use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

use driftnet_common::User;

use crate::PgStore;

fn user_from_row(row: &PgRow) -> Result<User> {
    let places: Vec<String> = serde_json::from_value(row.get("places"))?;
    Ok(User {
        id: row.get("id"),
        screen_name: row.get("screen_name"),
        bearer_token: row.get("bearer_token"),
        places,
    })
}

impl PgStore {
    pub async fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    pub async fn upsert_user(&self, user: &User) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, screen_name, bearer_token, places)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET screen_name = $2, bearer_token = $3, places = $4
            "#,
        )
        .bind(user.id)
        .bind(&user.screen_name)
        .bind(&user.bearer_token)
        .bind(serde_json::to_value(&user.places)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Upstream credentials for opening connections on a user's behalf.
    pub async fn get_user_token(&self, id: Uuid) -> Result<Option<String>> {
        Ok(self.get_user(id).await?.map(|u| u.bearer_token))
    }

    /// Users with at least one followed place, for the trends watcher.
    pub async fn users_with_places(&self) -> Result<Vec<User>> {
        let rows = sqlx::query("SELECT * FROM users WHERE jsonb_array_length(places) > 0")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(user_from_row).collect()
    }
}
