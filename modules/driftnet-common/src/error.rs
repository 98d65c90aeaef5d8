use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DriftnetError {
    /// Socket/connection-level failure on an upstream stream. Retried with
    /// backoff by the connection supervisor, never surfaced to callers of
    /// `start_stream`.
    #[error("Transport failure: {0}")]
    Transport(String),

    /// Upstream rejected the connection for exceeding its rate limits.
    /// Retried with a longer mandatory minimum backoff.
    #[error("Rate limited by upstream")]
    RateLimited,

    /// Upstream ended the stream without an error frame.
    #[error("Stream closed by upstream")]
    StreamClosed,

    /// Every open connection is at its term cap and no connection slot is
    /// free. The activation is parked, not failed.
    #[error("Filter capacity exceeded")]
    FilterCapacityExceeded,

    #[error("Persistence failure: {0}")]
    Persistence(String),

    /// The (search, item) pair is already committed. Not an error in the
    /// pipeline; skipped silently.
    #[error("Duplicate item")]
    DuplicateItem,

    #[error("Malformed upstream payload: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No such search: {0}")]
    UnknownSearch(uuid::Uuid),

    #[error("Queue failed to drain within {0:?} during shutdown")]
    ShutdownTimeout(Duration),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl DriftnetError {
    /// Whether a stream failure should use the rate-limit backoff floor
    /// rather than the generic transport schedule.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, DriftnetError::RateLimited)
    }
}
