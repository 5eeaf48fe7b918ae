use crate::error::Result;
use crate::store::LedgerStore;
use crate::types::{
    Claim, Cursor, EventCoordinate, PlayerId, PlayerRound, Round, RoundId, TreasuryFee,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

#[derive(Default)]
struct Inner {
    rounds: HashMap<RoundId, Round>,
    player_rounds: HashMap<(RoundId, PlayerId), PlayerRound>,
    claims: BTreeMap<(u64, u32, u32), Claim>,
    fees: BTreeMap<(u64, u32, u32), TreasuryFee>,
    cursor: Option<Cursor>,
}

/// HashMap-backed store for tests and the simulation harness.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn upsert_round(&self, round: &Round) -> Result<()> {
        self.inner.write().rounds.insert(round.id, round.clone());
        Ok(())
    }

    async fn round(&self, id: &RoundId) -> Result<Option<Round>> {
        Ok(self.inner.read().rounds.get(id).cloned())
    }

    async fn recent_rounds(&self, limit: usize) -> Result<Vec<Round>> {
        let mut rounds: Vec<Round> = self.inner.read().rounds.values().cloned().collect();
        rounds.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        rounds.truncate(limit);
        Ok(rounds)
    }

    async fn rounds_settled_since(&self, since: i64) -> Result<Vec<Round>> {
        Ok(self
            .inner
            .read()
            .rounds
            .values()
            .filter(|r| r.settled && r.settled_at.map_or(false, |t| t >= since))
            .cloned()
            .collect())
    }

    async fn upsert_player_round(&self, entry: &PlayerRound) -> Result<()> {
        self.inner
            .write()
            .player_rounds
            .insert((entry.round_id, entry.player), entry.clone());
        Ok(())
    }

    async fn player_round(
        &self,
        round: &RoundId,
        player: &PlayerId,
    ) -> Result<Option<PlayerRound>> {
        Ok(self
            .inner
            .read()
            .player_rounds
            .get(&(*round, *player))
            .cloned())
    }

    async fn player_rounds_for_round(&self, round: &RoundId) -> Result<Vec<PlayerRound>> {
        let mut entries: Vec<PlayerRound> = self
            .inner
            .read()
            .player_rounds
            .values()
            .filter(|pr| pr.round_id == *round)
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.player.cmp(&b.player));
        Ok(entries)
    }

    async fn player_rounds_for_player(
        &self,
        player: &PlayerId,
        limit: usize,
    ) -> Result<Vec<PlayerRound>> {
        let mut entries: Vec<PlayerRound> = self
            .inner
            .read()
            .player_rounds
            .values()
            .filter(|pr| pr.player == *player)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.committed_at.cmp(&a.committed_at));
        entries.truncate(limit);
        Ok(entries)
    }

    async fn insert_claim(&self, claim: &Claim) -> Result<bool> {
        let mut inner = self.inner.write();
        let key = claim.coordinate.position();
        if inner.claims.contains_key(&key) {
            return Ok(false);
        }
        inner.claims.insert(key, claim.clone());
        Ok(true)
    }

    async fn insert_fee(&self, fee: &TreasuryFee) -> Result<bool> {
        let mut inner = self.inner.write();
        let key = fee.coordinate.position();
        if inner.fees.contains_key(&key) {
            return Ok(false);
        }
        inner.fees.insert(key, fee.clone());
        Ok(true)
    }

    async fn claims(&self) -> Result<Vec<Claim>> {
        Ok(self.inner.read().claims.values().cloned().collect())
    }

    async fn fees_for_round(&self, round: &RoundId) -> Result<Vec<TreasuryFee>> {
        Ok(self
            .inner
            .read()
            .fees
            .values()
            .filter(|f| f.round_id == *round)
            .cloned()
            .collect())
    }

    async fn cursor(&self) -> Result<Option<Cursor>> {
        Ok(self.inner.read().cursor.clone())
    }

    async fn save_cursor(&self, coordinate: &EventCoordinate, updated_at: i64) -> Result<()> {
        self.inner.write().cursor = Some(Cursor {
            slot: coordinate.slot,
            tx_index: coordinate.tx_index,
            log_index: coordinate.log_index,
            tx_signature: coordinate.tx_signature.clone(),
            updated_at,
        });
        Ok(())
    }
}
