use crate::storage::Storage;
use async_trait::async_trait;
use chocodex_core::{
    Claim, Cursor, EventCoordinate, LedgerError, LedgerStore, PlayerId, PlayerRound, Round,
    RoundId, TreasuryFee, Tribe,
};
use rusqlite::{params, Row};
use std::sync::Arc;

type Result<T> = chocodex_core::Result<T>;

/// SQLite implementation of the ledger's storage port. Mutable entities are
/// written with `INSERT OR REPLACE` keyed by their natural idempotency key;
/// receipts are `INSERT OR IGNORE` keyed by event coordinate.
pub struct SqliteLedgerStore {
    storage: Arc<Storage>,
}

impl SqliteLedgerStore {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }
}

fn store_err(e: rusqlite::Error) -> LedgerError {
    LedgerError::store(e.to_string())
}

fn column_err(idx: usize, name: &str) -> rusqlite::Error {
    rusqlite::Error::InvalidColumnType(idx, name.to_string(), rusqlite::types::Type::Text)
}

fn round_from_row(row: &Row) -> rusqlite::Result<Round> {
    let id_hex: String = row.get(0)?;
    let winner: Option<String> = row.get(10)?;
    let winner_side = match winner {
        Some(s) => Some(Tribe::from_str(&s).map_err(|_| column_err(10, "winner_side"))?),
        None => None,
    };

    Ok(Round {
        id: RoundId::from_hex(&id_hex).map_err(|_| column_err(0, "id"))?,
        commit_deadline: row.get(1)?,
        reveal_deadline: row.get(2)?,
        stake_per_player: row.get::<_, i64>(3)? as u64,
        fee_bps: row.get::<_, i64>(4)? as u16,
        count_milk: row.get::<_, i64>(5)? as u32,
        count_cacao: row.get::<_, i64>(6)? as u32,
        milk_pool: row.get::<_, i64>(7)? as u64,
        cacao_pool: row.get::<_, i64>(8)? as u64,
        settled: row.get(9)?,
        winner_side,
        created_at: row.get(11)?,
        settled_at: row.get(12)?,
    })
}

fn player_round_from_row(row: &Row) -> rusqlite::Result<PlayerRound> {
    let round_hex: String = row.get(0)?;
    let player_hex: String = row.get(1)?;
    let hash_hex: String = row.get(2)?;
    let tribe: Option<String> = row.get(3)?;

    let commitment_hash: [u8; 32] = hex::decode(&hash_hex)
        .ok()
        .and_then(|v| v.try_into().ok())
        .ok_or_else(|| column_err(2, "commitment_hash"))?;
    let tribe = match tribe {
        Some(s) => Some(Tribe::from_str(&s).map_err(|_| column_err(3, "tribe"))?),
        None => None,
    };

    Ok(PlayerRound {
        round_id: RoundId::from_hex(&round_hex).map_err(|_| column_err(0, "round_id"))?,
        player: PlayerId::from_hex(&player_hex).map_err(|_| column_err(1, "player"))?,
        commitment_hash,
        tribe,
        stake: row.get::<_, i64>(4)? as u64,
        revealed: row.get(5)?,
        claimed: row.get(6)?,
        committed_at: row.get(7)?,
        revealed_at: row.get(8)?,
        claimed_at: row.get(9)?,
    })
}

fn claim_from_row(row: &Row) -> rusqlite::Result<Claim> {
    let round_hex: String = row.get(4)?;
    let player_hex: String = row.get(5)?;
    Ok(Claim {
        coordinate: EventCoordinate {
            tx_signature: row.get(0)?,
            log_index: row.get::<_, i64>(1)? as u32,
            slot: row.get::<_, i64>(2)? as u64,
            tx_index: row.get::<_, i64>(3)? as u32,
        },
        round_id: RoundId::from_hex(&round_hex).map_err(|_| column_err(4, "round_id"))?,
        player: PlayerId::from_hex(&player_hex).map_err(|_| column_err(5, "player"))?,
        amount: row.get::<_, i64>(6)? as u64,
        claimed_at: row.get(7)?,
    })
}

#[async_trait]
impl LedgerStore for SqliteLedgerStore {
    async fn upsert_round(&self, round: &Round) -> Result<()> {
        let conn = self.storage.get_connection().await;
        conn.execute(
            "INSERT OR REPLACE INTO rounds
             (id, commit_deadline, reveal_deadline, stake_per_player, fee_bps,
              count_milk, count_cacao, milk_pool, cacao_pool, settled,
              winner_side, created_at, settled_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                round.id.to_hex(),
                round.commit_deadline,
                round.reveal_deadline,
                round.stake_per_player as i64,
                round.fee_bps as i64,
                round.count_milk as i64,
                round.count_cacao as i64,
                round.milk_pool as i64,
                round.cacao_pool as i64,
                round.settled,
                round.winner_side.map(|t| t.as_str()),
                round.created_at,
                round.settled_at,
            ],
        )
        .map_err(store_err)?;
        Ok(())
    }

    async fn round(&self, id: &RoundId) -> Result<Option<Round>> {
        let conn = self.storage.get_connection().await;
        let result = conn.query_row(
            "SELECT id, commit_deadline, reveal_deadline, stake_per_player, fee_bps,
                    count_milk, count_cacao, milk_pool, cacao_pool, settled,
                    winner_side, created_at, settled_at
             FROM rounds WHERE id = ?1",
            params![id.to_hex()],
            round_from_row,
        );
        match result {
            Ok(round) => Ok(Some(round)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(store_err(e)),
        }
    }

    async fn recent_rounds(&self, limit: usize) -> Result<Vec<Round>> {
        let conn = self.storage.get_connection().await;
        let mut stmt = conn
            .prepare(
                "SELECT id, commit_deadline, reveal_deadline, stake_per_player, fee_bps,
                        count_milk, count_cacao, milk_pool, cacao_pool, settled,
                        winner_side, created_at, settled_at
                 FROM rounds ORDER BY created_at DESC, id DESC LIMIT ?1",
            )
            .map_err(store_err)?;
        let rounds = stmt
            .query_map(params![limit as i64], round_from_row)
            .map_err(store_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(store_err)?;
        Ok(rounds)
    }

    async fn rounds_settled_since(&self, since: i64) -> Result<Vec<Round>> {
        let conn = self.storage.get_connection().await;
        let mut stmt = conn
            .prepare(
                "SELECT id, commit_deadline, reveal_deadline, stake_per_player, fee_bps,
                        count_milk, count_cacao, milk_pool, cacao_pool, settled,
                        winner_side, created_at, settled_at
                 FROM rounds WHERE settled = 1 AND settled_at >= ?1",
            )
            .map_err(store_err)?;
        let rounds = stmt
            .query_map(params![since], round_from_row)
            .map_err(store_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(store_err)?;
        Ok(rounds)
    }

    async fn upsert_player_round(&self, entry: &PlayerRound) -> Result<()> {
        let conn = self.storage.get_connection().await;
        conn.execute(
            "INSERT OR REPLACE INTO player_rounds
             (round_id, player, commitment_hash, tribe, stake, revealed,
              claimed, committed_at, revealed_at, claimed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                entry.round_id.to_hex(),
                entry.player.to_hex(),
                hex::encode(entry.commitment_hash),
                entry.tribe.map(|t| t.as_str()),
                entry.stake as i64,
                entry.revealed,
                entry.claimed,
                entry.committed_at,
                entry.revealed_at,
                entry.claimed_at,
            ],
        )
        .map_err(store_err)?;
        Ok(())
    }

    async fn player_round(
        &self,
        round: &RoundId,
        player: &PlayerId,
    ) -> Result<Option<PlayerRound>> {
        let conn = self.storage.get_connection().await;
        let result = conn.query_row(
            "SELECT round_id, player, commitment_hash, tribe, stake, revealed,
                    claimed, committed_at, revealed_at, claimed_at
             FROM player_rounds WHERE round_id = ?1 AND player = ?2",
            params![round.to_hex(), player.to_hex()],
            player_round_from_row,
        );
        match result {
            Ok(entry) => Ok(Some(entry)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(store_err(e)),
        }
    }

    async fn player_rounds_for_round(&self, round: &RoundId) -> Result<Vec<PlayerRound>> {
        let conn = self.storage.get_connection().await;
        let mut stmt = conn
            .prepare(
                "SELECT round_id, player, commitment_hash, tribe, stake, revealed,
                        claimed, committed_at, revealed_at, claimed_at
                 FROM player_rounds WHERE round_id = ?1 ORDER BY player ASC",
            )
            .map_err(store_err)?;
        let entries = stmt
            .query_map(params![round.to_hex()], player_round_from_row)
            .map_err(store_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(store_err)?;
        Ok(entries)
    }

    async fn player_rounds_for_player(
        &self,
        player: &PlayerId,
        limit: usize,
    ) -> Result<Vec<PlayerRound>> {
        let conn = self.storage.get_connection().await;
        let mut stmt = conn
            .prepare(
                "SELECT round_id, player, commitment_hash, tribe, stake, revealed,
                        claimed, committed_at, revealed_at, claimed_at
                 FROM player_rounds WHERE player = ?1
                 ORDER BY committed_at DESC LIMIT ?2",
            )
            .map_err(store_err)?;
        let entries = stmt
            .query_map(params![player.to_hex(), limit as i64], player_round_from_row)
            .map_err(store_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(store_err)?;
        Ok(entries)
    }

    async fn insert_claim(&self, claim: &Claim) -> Result<bool> {
        let conn = self.storage.get_connection().await;
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO claims
                 (tx_signature, log_index, slot, tx_index, round_id, player, amount, claimed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    claim.coordinate.tx_signature,
                    claim.coordinate.log_index as i64,
                    claim.coordinate.slot as i64,
                    claim.coordinate.tx_index as i64,
                    claim.round_id.to_hex(),
                    claim.player.to_hex(),
                    claim.amount as i64,
                    claim.claimed_at,
                ],
            )
            .map_err(store_err)?;
        Ok(inserted > 0)
    }

    async fn insert_fee(&self, fee: &TreasuryFee) -> Result<bool> {
        let conn = self.storage.get_connection().await;
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO treasury_fees
                 (tx_signature, log_index, slot, tx_index, round_id, amount, collected_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    fee.coordinate.tx_signature,
                    fee.coordinate.log_index as i64,
                    fee.coordinate.slot as i64,
                    fee.coordinate.tx_index as i64,
                    fee.round_id.to_hex(),
                    fee.amount as i64,
                    fee.collected_at,
                ],
            )
            .map_err(store_err)?;
        Ok(inserted > 0)
    }

    async fn claims(&self) -> Result<Vec<Claim>> {
        let conn = self.storage.get_connection().await;
        let mut stmt = conn
            .prepare(
                "SELECT tx_signature, log_index, slot, tx_index, round_id, player,
                        amount, claimed_at
                 FROM claims ORDER BY slot, tx_index, log_index",
            )
            .map_err(store_err)?;
        let claims = stmt
            .query_map([], claim_from_row)
            .map_err(store_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(store_err)?;
        Ok(claims)
    }

    async fn fees_for_round(&self, round: &RoundId) -> Result<Vec<TreasuryFee>> {
        let conn = self.storage.get_connection().await;
        let mut stmt = conn
            .prepare(
                "SELECT tx_signature, log_index, slot, tx_index, round_id, amount, collected_at
                 FROM treasury_fees WHERE round_id = ?1 ORDER BY slot, tx_index, log_index",
            )
            .map_err(store_err)?;
        let fees = stmt
            .query_map(params![round.to_hex()], |row| {
                let round_hex: String = row.get(4)?;
                Ok(TreasuryFee {
                    coordinate: EventCoordinate {
                        tx_signature: row.get(0)?,
                        log_index: row.get::<_, i64>(1)? as u32,
                        slot: row.get::<_, i64>(2)? as u64,
                        tx_index: row.get::<_, i64>(3)? as u32,
                    },
                    round_id: RoundId::from_hex(&round_hex)
                        .map_err(|_| column_err(4, "round_id"))?,
                    amount: row.get::<_, i64>(5)? as u64,
                    collected_at: row.get(6)?,
                })
            })
            .map_err(store_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(store_err)?;
        Ok(fees)
    }

    async fn cursor(&self) -> Result<Option<Cursor>> {
        let conn = self.storage.get_connection().await;
        let result = conn.query_row(
            "SELECT slot, tx_index, log_index, tx_signature, updated_at
             FROM indexer_cursor WHERE id = 1",
            [],
            |row| {
                Ok(Cursor {
                    slot: row.get::<_, i64>(0)? as u64,
                    tx_index: row.get::<_, i64>(1)? as u32,
                    log_index: row.get::<_, i64>(2)? as u32,
                    tx_signature: row.get(3)?,
                    updated_at: row.get(4)?,
                })
            },
        );
        match result {
            Ok(cursor) => Ok(Some(cursor)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(store_err(e)),
        }
    }

    async fn save_cursor(&self, coordinate: &EventCoordinate, updated_at: i64) -> Result<()> {
        let conn = self.storage.get_connection().await;
        conn.execute(
            "INSERT OR REPLACE INTO indexer_cursor
             (id, slot, tx_index, log_index, tx_signature, updated_at)
             VALUES (1, ?1, ?2, ?3, ?4, ?5)",
            params![
                coordinate.slot as i64,
                coordinate.tx_index as i64,
                coordinate.log_index as i64,
                coordinate.tx_signature,
                updated_at,
            ],
        )
        .map_err(store_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> SqliteLedgerStore {
        let storage = Storage::open_in_memory().await.unwrap();
        SqliteLedgerStore::new(Arc::new(storage))
    }

    fn coordinate(n: u32) -> EventCoordinate {
        EventCoordinate {
            slot: 100 + n as u64,
            tx_index: n,
            log_index: 0,
            tx_signature: format!("sig-{}", n),
        }
    }

    #[tokio::test]
    async fn round_upsert_round_trip() {
        let store = store().await;
        let mut round = Round::new(RoundId::new([1; 32]), 100, 200, 5_000_000_000, 300, 10);
        store.upsert_round(&round).await.unwrap();
        assert_eq!(store.round(&round.id).await.unwrap().unwrap(), round);

        round.settled = true;
        round.winner_side = Some(Tribe::Cacao);
        round.settled_at = Some(250);
        round.count_cacao = 1;
        round.cacao_pool = 5_000_000_000;
        store.upsert_round(&round).await.unwrap();
        assert_eq!(store.round(&round.id).await.unwrap().unwrap(), round);

        assert!(store.round(&RoundId::new([9; 32])).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn player_round_round_trip() {
        let store = store().await;
        let round = RoundId::new([1; 32]);
        let player = PlayerId::new([2; 32]);
        let mut entry = PlayerRound::new(round, player, [7; 32], 5, 50);
        store.upsert_player_round(&entry).await.unwrap();
        assert_eq!(
            store.player_round(&round, &player).await.unwrap().unwrap(),
            entry
        );

        entry.revealed = true;
        entry.tribe = Some(Tribe::Milk);
        entry.revealed_at = Some(150);
        store.upsert_player_round(&entry).await.unwrap();
        assert_eq!(
            store.player_round(&round, &player).await.unwrap().unwrap(),
            entry
        );
        assert_eq!(store.player_rounds_for_round(&round).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn claim_insert_is_idempotent_by_coordinate() {
        let store = store().await;
        let claim = Claim {
            coordinate: coordinate(1),
            round_id: RoundId::new([1; 32]),
            player: PlayerId::new([2; 32]),
            amount: 15,
            claimed_at: 300,
        };
        assert!(store.insert_claim(&claim).await.unwrap());
        assert!(!store.insert_claim(&claim).await.unwrap());
        assert_eq!(store.claims().await.unwrap(), vec![claim]);
    }

    #[tokio::test]
    async fn cursor_round_trip() {
        let store = store().await;
        assert!(store.cursor().await.unwrap().is_none());

        let coord = coordinate(3);
        store.save_cursor(&coord, 999).await.unwrap();
        let cursor = store.cursor().await.unwrap().unwrap();
        assert_eq!(cursor.position(), coord.position());
        assert_eq!(cursor.tx_signature, coord.tx_signature);
        assert_eq!(cursor.updated_at, 999);

        let later = coordinate(4);
        store.save_cursor(&later, 1000).await.unwrap();
        let cursor = store.cursor().await.unwrap().unwrap();
        assert_eq!(cursor.position(), later.position());
    }

    #[tokio::test]
    async fn settled_since_filters_on_settled_at() {
        let store = store().await;
        for (n, settled_at) in [(1u8, Some(100)), (2, Some(500)), (3, None)] {
            let mut round = Round::new(RoundId::new([n; 32]), 10, 20, 5, 250, 1);
            if let Some(t) = settled_at {
                round.settled = true;
                round.settled_at = Some(t);
            }
            store.upsert_round(&round).await.unwrap();
        }
        let since = store.rounds_settled_since(200).await.unwrap();
        assert_eq!(since.len(), 1);
        assert_eq!(since[0].id, RoundId::new([2; 32]));
    }
}
