use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Thin wrapper around a Postgres pool providing connection setup.
#[derive(Clone)]
pub struct PgStore {
    pub(crate) pool: PgPool,
    /// Write attempts per queued item before dead-letter promotion.
    pub(crate) max_item_attempts: u32,
}

impl PgStore {
    /// Connect to Postgres with the given URL.
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self {
            pool,
            max_item_attempts: 5,
        })
    }

    /// Wrap an existing pool (tests, shared pools).
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            max_item_attempts: 5,
        }
    }

    pub fn with_max_item_attempts(mut self, attempts: u32) -> Self {
        self.max_item_attempts = attempts;
        self
    }

    /// Get a reference to the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
