use sqlx::PgPool;
use tracing::info;

/// Run idempotent schema migrations.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::Error> {
    info!("Running schema migrations...");

    let statements = [
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id UUID PRIMARY KEY,
            screen_name TEXT NOT NULL UNIQUE,
            bearer_token TEXT NOT NULL,
            places JSONB NOT NULL DEFAULT '[]',
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS searches (
            id UUID PRIMARY KEY,
            user_id UUID NOT NULL,
            title TEXT NOT NULL,
            queries JSONB NOT NULL,
            active BOOLEAN NOT NULL DEFAULT false,
            archive_started BOOLEAN NOT NULL DEFAULT false,
            deleted BOOLEAN NOT NULL DEFAULT false,
            announcement_post_id TEXT,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )
        "#,
        // Committed items double as the dedup existence set: the primary key
        // is the idempotence pair.
        r#"
        CREATE TABLE IF NOT EXISTS items (
            search_id UUID NOT NULL,
            upstream_id TEXT NOT NULL,
            payload JSONB NOT NULL,
            received_at TIMESTAMPTZ NOT NULL,
            committed_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            PRIMARY KEY (search_id, upstream_id)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS ingest_queue (
            id BIGSERIAL PRIMARY KEY,
            search_id UUID NOT NULL,
            upstream_id TEXT NOT NULL,
            payload JSONB NOT NULL,
            received_at TIMESTAMPTZ NOT NULL,
            attempts INT NOT NULL DEFAULT 0,
            enqueued_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            claimed_at TIMESTAMPTZ
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS dead_letters (
            id BIGSERIAL PRIMARY KEY,
            search_id UUID NOT NULL,
            upstream_id TEXT NOT NULL,
            payload JSONB NOT NULL,
            attempts INT NOT NULL,
            last_error TEXT,
            failed_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS trend_snapshots (
            id BIGSERIAL PRIMARY KEY,
            place_id TEXT NOT NULL,
            place_name TEXT NOT NULL,
            trends JSONB NOT NULL,
            fetched_at TIMESTAMPTZ NOT NULL
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_searches_active ON searches (active) WHERE NOT deleted",
        "CREATE INDEX IF NOT EXISTS idx_queue_unclaimed ON ingest_queue (id) WHERE claimed_at IS NULL",
        "CREATE INDEX IF NOT EXISTS idx_queue_search ON ingest_queue (search_id)",
        "CREATE INDEX IF NOT EXISTS idx_trends_place ON trend_snapshots (place_id, fetched_at)",
    ];

    for statement in &statements {
        sqlx::query(statement).execute(pool).await?;
    }

    info!("Schema migrations complete");
    Ok(())
}
