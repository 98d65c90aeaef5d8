pub mod backoff;
pub mod controller;
pub mod dedup;
pub mod ingest;
pub mod matching;
pub mod multiplexer;
pub mod persister;
pub mod registry;
pub mod settings;
pub mod supervisor;
pub mod traits;
pub mod trends;

#[cfg(any(test, feature = "test-support"))]
pub mod fixtures;

pub use controller::{Activation, StreamController};
pub use multiplexer::{ConnectionId, ConnectionOp, SearchFilter, StreamMultiplexer};
pub use registry::SearchStreamRegistry;
pub use settings::StreamSettings;
pub use supervisor::ConnectionState;
pub use traits::{IngestQueue, ItemStore, ItemStream, SearchStore, StreamSource, TrendSource, TrendStore};
