use std::net::SocketAddr;
use std::path::PathBuf;

/// Runtime configuration for the indexer and read API.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// SQLite database path.
    pub db_path: PathBuf,
    /// Read API listen address.
    pub listen: SocketAddr,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            listen: SocketAddr::from(([127, 0, 0, 1], 3001)),
        }
    }
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chocodex")
        .join("chocodex.db")
}
