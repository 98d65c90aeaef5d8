use std::env;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Postgres
    pub database_url: String,

    // Upstream credentials (app-level; per-user tokens come from the store)
    pub twitter_bearer_token: String,

    // Loader daemon
    pub persister_workers: usize,
    pub trends_refresh_secs: u64,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            database_url: required_env("DATABASE_URL"),
            twitter_bearer_token: required_env("TWITTER_BEARER_TOKEN"),
            persister_workers: env::var("PERSISTER_WORKERS")
                .unwrap_or_else(|_| "2".to_string())
                .parse()
                .expect("PERSISTER_WORKERS must be a number"),
            trends_refresh_secs: env::var("TRENDS_REFRESH_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .expect("TRENDS_REFRESH_SECS must be a number"),
        }
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}
