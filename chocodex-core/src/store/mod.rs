//! Storage port for the ledger. The same ledger logic runs against the
//! in-memory map here and the transactional SQLite store in the indexer.

pub mod memory;

pub use memory::MemoryStore;

use crate::error::Result;
use crate::types::{Claim, Cursor, EventCoordinate, PlayerId, PlayerRound, Round, RoundId, TreasuryFee};
use async_trait::async_trait;

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn upsert_round(&self, round: &Round) -> Result<()>;

    async fn round(&self, id: &RoundId) -> Result<Option<Round>>;

    /// Most recently created first.
    async fn recent_rounds(&self, limit: usize) -> Result<Vec<Round>>;

    /// Rounds with `settled_at >= since`.
    async fn rounds_settled_since(&self, since: i64) -> Result<Vec<Round>>;

    async fn upsert_player_round(&self, entry: &PlayerRound) -> Result<()>;

    async fn player_round(&self, round: &RoundId, player: &PlayerId)
        -> Result<Option<PlayerRound>>;

    async fn player_rounds_for_round(&self, round: &RoundId) -> Result<Vec<PlayerRound>>;

    /// Most recently committed first.
    async fn player_rounds_for_player(
        &self,
        player: &PlayerId,
        limit: usize,
    ) -> Result<Vec<PlayerRound>>;

    /// Returns `false` when a claim with the same coordinate already exists;
    /// the receipt is never duplicated or overwritten.
    async fn insert_claim(&self, claim: &Claim) -> Result<bool>;

    async fn insert_fee(&self, fee: &TreasuryFee) -> Result<bool>;

    async fn claims(&self) -> Result<Vec<Claim>>;

    async fn fees_for_round(&self, round: &RoundId) -> Result<Vec<TreasuryFee>>;

    async fn cursor(&self) -> Result<Option<Cursor>>;

    async fn save_cursor(&self, coordinate: &EventCoordinate, updated_at: i64) -> Result<()>;
}
