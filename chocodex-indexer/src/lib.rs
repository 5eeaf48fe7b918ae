//! Event-sourced indexer for the minority wager ledger.
//!
//! Consumes the protocol's ordered but at-least-once event feed,
//! idempotently rebuilds the round ledger in SQLite, and serves the
//! read-side views (rounds, player histories, leaderboards) over HTTP.

pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod leaderboard;
pub mod processor;
pub mod storage;

pub use api::AppState;
pub use config::IndexerConfig;
pub use error::{IndexerError, Result};
pub use events::{EventEnvelope, ProtocolEvent};
pub use leaderboard::LeaderboardAggregator;
pub use processor::{EventProcessor, EventSource, FileSource};
pub use storage::{SqliteLedgerStore, Storage};
