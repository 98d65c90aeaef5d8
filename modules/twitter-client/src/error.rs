use thiserror::Error;

pub type Result<T> = std::result::Result<T, TwitterError>;

#[derive(Debug, Error)]
pub enum TwitterError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// HTTP 420/429 on connect, or a rate-limit disconnect mid-stream.
    /// Reconnecting too soon escalates the penalty upstream.
    #[error("Rate limited")]
    RateLimited,

    /// The streaming body ended without an error frame. Upstream does this
    /// on server restarts; callers should treat it as reconnectable.
    #[error("Stream closed by upstream")]
    StreamClosed,

    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for TwitterError {
    fn from(err: reqwest::Error) -> Self {
        TwitterError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for TwitterError {
    fn from(err: serde_json::Error) -> Self {
        TwitterError::Parse(err.to_string())
    }
}
