pub mod ledger_store;

pub use ledger_store::SqliteLedgerStore;

use crate::error::Result;
use rusqlite::Connection;
use std::path::Path;
use tokio::sync::Mutex;

/// SQLite-backed storage. A single connection behind an async mutex keeps
/// the ledger a single logical writer; read-side queries share the same
/// serialization, which is acceptable at mirror scale.
pub struct Storage {
    conn: Mutex<Connection>,
}

impl Storage {
    pub async fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let conn = Connection::open(db_path)?;
        let storage = Self {
            conn: Mutex::new(conn),
        };

        storage.init_schema().await?;
        Ok(storage)
    }

    /// In-memory database for tests.
    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.init_schema().await?;
        Ok(storage)
    }

    async fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().await;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS rounds (
                id TEXT PRIMARY KEY,
                commit_deadline INTEGER NOT NULL,
                reveal_deadline INTEGER NOT NULL,
                stake_per_player INTEGER NOT NULL,
                fee_bps INTEGER NOT NULL,
                count_milk INTEGER NOT NULL,
                count_cacao INTEGER NOT NULL,
                milk_pool INTEGER NOT NULL,
                cacao_pool INTEGER NOT NULL,
                settled INTEGER NOT NULL,
                winner_side TEXT,
                created_at INTEGER NOT NULL,
                settled_at INTEGER
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS player_rounds (
                round_id TEXT NOT NULL,
                player TEXT NOT NULL,
                commitment_hash TEXT NOT NULL,
                tribe TEXT,
                stake INTEGER NOT NULL,
                revealed INTEGER NOT NULL,
                claimed INTEGER NOT NULL,
                committed_at INTEGER NOT NULL,
                revealed_at INTEGER,
                claimed_at INTEGER,
                PRIMARY KEY (round_id, player)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS claims (
                tx_signature TEXT NOT NULL,
                log_index INTEGER NOT NULL,
                slot INTEGER NOT NULL,
                tx_index INTEGER NOT NULL,
                round_id TEXT NOT NULL,
                player TEXT NOT NULL,
                amount INTEGER NOT NULL,
                claimed_at INTEGER NOT NULL,
                PRIMARY KEY (tx_signature, log_index)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS treasury_fees (
                tx_signature TEXT NOT NULL,
                log_index INTEGER NOT NULL,
                slot INTEGER NOT NULL,
                tx_index INTEGER NOT NULL,
                round_id TEXT NOT NULL,
                amount INTEGER NOT NULL,
                collected_at INTEGER NOT NULL,
                PRIMARY KEY (tx_signature, log_index)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS indexer_cursor (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                slot INTEGER NOT NULL,
                tx_index INTEGER NOT NULL,
                log_index INTEGER NOT NULL,
                tx_signature TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_player_rounds_player
             ON player_rounds (player, committed_at)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_claims_player ON claims (player)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_rounds_settled_at ON rounds (settled_at)",
            [],
        )?;

        Ok(())
    }

    pub async fn get_connection(&self) -> tokio::sync::MutexGuard<'_, Connection> {
        self.conn.lock().await
    }
}
