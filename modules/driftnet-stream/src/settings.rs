use std::time::Duration;

use typed_builder::TypedBuilder;

/// Tuning knobs for the streaming core. Defaults match the upstream
/// provider's published limits and are safe for production.
#[derive(Debug, Clone, TypedBuilder)]
pub struct StreamSettings {
    /// Upstream cap on track terms per streaming connection.
    #[builder(default = 400)]
    pub max_terms_per_connection: usize,

    /// Upstream cap on simultaneous streaming connections per credential.
    #[builder(default = 2)]
    pub max_connections: usize,

    /// First reconnect delay; doubles per consecutive failure.
    #[builder(default = Duration::from_secs(1))]
    pub backoff_base: Duration,

    /// Ceiling on the exponential reconnect delay. Streaming longer than
    /// this also resets the attempt counter.
    #[builder(default = Duration::from_secs(320))]
    pub backoff_cap: Duration,

    /// Minimum delay after a rate-limit rejection, regardless of attempt.
    #[builder(default = Duration::from_secs(60))]
    pub rate_limit_floor: Duration,

    /// Upper bound on the random jitter added to every backoff delay.
    #[builder(default = Duration::from_millis(1000))]
    pub backoff_jitter: Duration,

    /// Queue depth at which enqueueing pauses upstream consumption.
    #[builder(default = 10_000)]
    pub queue_capacity: u64,

    /// How often a paused enqueuer re-checks queue depth.
    #[builder(default = Duration::from_millis(250))]
    pub queue_poll_interval: Duration,

    /// Rows claimed per persister poll.
    #[builder(default = 100)]
    pub persist_batch_size: u32,

    #[builder(default = 2)]
    pub persister_workers: usize,

    /// Idle sleep between empty persister polls.
    #[builder(default = Duration::from_millis(500))]
    pub persist_idle_wait: Duration,

    /// Whether items already queued for a deactivated search still drain to
    /// storage (true) or are discarded unpersisted (false).
    #[builder(default = true)]
    pub drain_on_deactivate: bool,

    /// How long `stop()` waits for the queue to drain before giving up.
    #[builder(default = Duration::from_secs(30))]
    pub shutdown_timeout: Duration,

    #[builder(default = Duration::from_secs(60))]
    pub trends_refresh_interval: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}
