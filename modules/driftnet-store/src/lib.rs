pub mod client;
pub mod items;
pub mod migrate;
pub mod queue;
pub mod searches;
pub mod stats;
pub mod trends;
pub mod users;

pub use client::PgStore;
pub use items::CommitOutcome;
pub use migrate::migrate;
pub use queue::NackOutcome;
pub use stats::SystemStats;
