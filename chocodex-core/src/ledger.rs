//! The round ledger: an authoritative-mirroring state machine over an
//! injected storage port. All mutating operations take `now` explicitly so
//! the event processor can evaluate phases at event block-time and tests
//! need no clock mocking.

use crate::commitment::{self, Salt};
use crate::error::{LedgerError, Result};
use crate::phase::{current_phase, Phase};
use crate::settle::{settle, Settlement};
use crate::store::LedgerStore;
use crate::types::{
    Claim, EventCoordinate, PlayerId, PlayerRound, Round, RoundId, TreasuryFee, Tribe,
};
use std::sync::Arc;

pub struct RoundLedger<S> {
    store: Arc<S>,
}

impl<S: LedgerStore> RoundLedger<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    async fn require_round(&self, id: &RoundId) -> Result<Round> {
        self.store
            .round(id)
            .await?
            .ok_or(LedgerError::NoSuchRound(*id))
    }

    pub async fn create_round(
        &self,
        id: RoundId,
        commit_deadline: i64,
        reveal_deadline: i64,
        stake_per_player: u64,
        fee_bps: u16,
        now: i64,
    ) -> Result<Round> {
        if stake_per_player == 0 {
            return Err(LedgerError::InvalidRound("stake must be positive".into()));
        }
        if reveal_deadline <= commit_deadline {
            return Err(LedgerError::InvalidRound(
                "reveal deadline must follow commit deadline".into(),
            ));
        }
        if self.store.round(&id).await?.is_some() {
            return Err(LedgerError::DuplicateRound(id));
        }

        let round = Round::new(
            id,
            commit_deadline,
            reveal_deadline,
            stake_per_player,
            fee_bps,
            now,
        );
        self.store.upsert_round(&round).await?;
        tracing::info!(round = %id, stake_per_player, fee_bps, "round created");
        Ok(round)
    }

    pub async fn record_commit(
        &self,
        round_id: RoundId,
        player: PlayerId,
        commitment_hash: [u8; 32],
        stake: u64,
        now: i64,
    ) -> Result<PlayerRound> {
        let round = self.require_round(&round_id).await?;

        let phase = current_phase(&round, now);
        if phase != Phase::CommitOpen {
            return Err(LedgerError::PhaseError {
                round: round_id,
                phase,
            });
        }

        // A second commit is rejected, never merged or overwritten.
        if self.store.player_round(&round_id, &player).await?.is_some() {
            return Err(LedgerError::AlreadyCommitted {
                round: round_id,
                player,
            });
        }

        let entry = PlayerRound::new(round_id, player, commitment_hash, stake, now);
        self.store.upsert_player_round(&entry).await?;
        tracing::debug!(round = %round_id, player = %player, stake, "commit recorded");
        Ok(entry)
    }

    /// Full reveal path: verifies `(tribe, salt)` against the stored
    /// commitment. Used by direct callers such as the simulation harness.
    pub async fn record_reveal(
        &self,
        round_id: RoundId,
        player: PlayerId,
        tribe: Tribe,
        salt: &Salt,
        now: i64,
    ) -> Result<PlayerRound> {
        let round = self.require_round(&round_id).await?;
        let entry = self.revealable_entry(&round, &player, now).await?;
        if entry.revealed {
            return Ok(entry);
        }

        if !commitment::verify(&entry.commitment_hash, tribe, salt, &player, &round_id) {
            return Err(LedgerError::InvalidReveal {
                round: round_id,
                player,
            });
        }

        self.apply_reveal(round, entry, tribe, now).await
    }

    /// Mirror reveal path: the feed's reveal event carries no salt because
    /// the authoritative program already verified it. Shares the apply step
    /// with [`record_reveal`] so the two paths cannot diverge.
    pub async fn record_revealed(
        &self,
        round_id: RoundId,
        player: PlayerId,
        tribe: Tribe,
        now: i64,
    ) -> Result<PlayerRound> {
        let round = self.require_round(&round_id).await?;
        let entry = self.revealable_entry(&round, &player, now).await?;
        if entry.revealed {
            return Ok(entry);
        }
        self.apply_reveal(round, entry, tribe, now).await
    }

    async fn revealable_entry(
        &self,
        round: &Round,
        player: &PlayerId,
        now: i64,
    ) -> Result<PlayerRound> {
        let entry = self
            .store
            .player_round(&round.id, player)
            .await?
            .ok_or(LedgerError::NoSuchCommitment {
                round: round.id,
                player: *player,
            })?;
        if entry.revealed {
            return Ok(entry);
        }

        let phase = current_phase(round, now);
        if phase != Phase::RevealOpen {
            return Err(LedgerError::PhaseError {
                round: round.id,
                phase,
            });
        }
        Ok(entry)
    }

    async fn apply_reveal(
        &self,
        mut round: Round,
        mut entry: PlayerRound,
        tribe: Tribe,
        now: i64,
    ) -> Result<PlayerRound> {
        entry.tribe = Some(tribe);
        entry.revealed = true;
        entry.revealed_at = Some(now);

        match tribe {
            Tribe::Milk => {
                round.count_milk += 1;
                round.milk_pool += entry.stake;
            }
            Tribe::Cacao => {
                round.count_cacao += 1;
                round.cacao_pool += entry.stake;
            }
        }

        self.store.upsert_player_round(&entry).await?;
        self.store.upsert_round(&round).await?;
        tracing::debug!(round = %round.id, player = %entry.player, %tribe, "reveal recorded");
        Ok(entry)
    }

    /// Settle a round past its reveal deadline, deriving the winner locally.
    /// Calling again on a settled round is a no-op: the event feed may
    /// redeliver the settlement trigger.
    pub async fn finalize(&self, round_id: RoundId, now: i64) -> Result<Round> {
        let mut round = self.require_round(&round_id).await?;
        if round.settled {
            return Ok(round);
        }
        if now < round.reveal_deadline {
            return Err(LedgerError::TooEarly {
                round: round_id,
                reveal_deadline: round.reveal_deadline,
                now,
            });
        }

        let entries = self.store.player_rounds_for_round(&round_id).await?;
        let settlement = settle(&round, &entries);

        round.winner_side = settlement.winner_side;
        round.settled = true;
        round.settled_at = Some(now);
        self.store.upsert_round(&round).await?;

        match settlement.winner_side {
            Some(winner) => tracing::info!(
                round = %round_id, %winner,
                fee = settlement.fee,
                payout = settlement.payout_per_winner,
                "round settled"
            ),
            None => tracing::info!(round = %round_id, "round settled as a tie"),
        }
        Ok(round)
    }

    /// Settle from the authoritative settlement event, adopting its winner
    /// and pool figures. The locally derived result is cross-checked and a
    /// divergence is logged, never silently resolved: the mirror records
    /// the source's decision.
    #[allow(clippy::too_many_arguments)]
    pub async fn finalize_from_event(
        &self,
        round_id: RoundId,
        winner_side: Option<Tribe>,
        count_milk: u32,
        count_cacao: u32,
        milk_pool: u64,
        cacao_pool: u64,
        now: i64,
    ) -> Result<Round> {
        let mut round = self.require_round(&round_id).await?;
        if round.settled {
            return Ok(round);
        }
        if now < round.reveal_deadline {
            return Err(LedgerError::TooEarly {
                round: round_id,
                reveal_deadline: round.reveal_deadline,
                now,
            });
        }

        let entries = self.store.player_rounds_for_round(&round_id).await?;
        let derived = settle(&round, &entries);
        if derived.winner_side != winner_side {
            tracing::warn!(
                round = %round_id,
                derived = ?derived.winner_side,
                authoritative = ?winner_side,
                "settlement divergence between mirror and authoritative source"
            );
        }

        round.winner_side = winner_side;
        round.count_milk = count_milk;
        round.count_cacao = count_cacao;
        round.milk_pool = milk_pool;
        round.cacao_pool = cacao_pool;
        round.settled = true;
        round.settled_at = Some(now);
        self.store.upsert_round(&round).await?;
        tracing::info!(round = %round_id, winner = ?winner_side, "round settled from event");
        Ok(round)
    }

    /// Recompute the settlement of a round at any time. Pure read; gives the
    /// same answer no matter how often or when it is called.
    pub async fn settlement(&self, round_id: RoundId) -> Result<Settlement> {
        let round = self.require_round(&round_id).await?;
        let entries = self.store.player_rounds_for_round(&round_id).await?;
        Ok(settle(&round, &entries))
    }

    /// Direct claim path (pull payment): validates eligibility and computes
    /// the payout from the settled round state.
    pub async fn record_claim(
        &self,
        round_id: RoundId,
        player: PlayerId,
        coordinate: EventCoordinate,
        now: i64,
    ) -> Result<Claim> {
        let round = self.require_round(&round_id).await?;
        let mut entry = self.store.player_round(&round_id, &player).await?.ok_or(
            LedgerError::NoSuchCommitment {
                round: round_id,
                player,
            },
        )?;

        if !round.settled {
            return Err(LedgerError::NotSettled(round_id));
        }
        if entry.claimed {
            return Err(LedgerError::AlreadyClaimed {
                round: round_id,
                player,
            });
        }
        let winner = round.winner_side.ok_or(LedgerError::NotWinner {
            round: round_id,
            player,
        })?;
        if !entry.revealed || entry.tribe != Some(winner) {
            return Err(LedgerError::NotWinner {
                round: round_id,
                player,
            });
        }

        let entries = self.store.player_rounds_for_round(&round_id).await?;
        let settlement = settle(&round, &entries);

        let claim = Claim {
            coordinate,
            round_id,
            player,
            amount: settlement.payout_per_winner,
            claimed_at: now,
        };
        if !self.store.insert_claim(&claim).await? {
            // coordinate redelivered; the first application already holds
            return Ok(claim);
        }

        entry.claimed = true;
        entry.claimed_at = Some(now);
        self.store.upsert_player_round(&entry).await?;
        tracing::info!(round = %round_id, player = %player, amount = claim.amount, "claim recorded");
        Ok(claim)
    }

    /// Mirror claim path: records the authoritative payout receipt verbatim
    /// (ties refund through the same event kind upstream) and marks the
    /// entry claimed. Returns `false` on a redelivered coordinate.
    pub async fn record_claimed(
        &self,
        round_id: RoundId,
        player: PlayerId,
        amount: u64,
        coordinate: EventCoordinate,
        now: i64,
    ) -> Result<bool> {
        let round = self.require_round(&round_id).await?;
        let mut entry = self.store.player_round(&round_id, &player).await?.ok_or(
            LedgerError::NoSuchCommitment {
                round: round_id,
                player,
            },
        )?;
        if !round.settled {
            return Err(LedgerError::NotSettled(round_id));
        }

        let claim = Claim {
            coordinate,
            round_id,
            player,
            amount,
            claimed_at: now,
        };
        if !self.store.insert_claim(&claim).await? {
            return Ok(false);
        }

        if !entry.claimed {
            entry.claimed = true;
            entry.claimed_at = Some(now);
            self.store.upsert_player_round(&entry).await?;
        }
        tracing::debug!(round = %round_id, player = %player, amount, "claim mirrored");
        Ok(true)
    }

    /// Record the protocol fee receipt. Returns `false` on a redelivered
    /// coordinate.
    pub async fn record_fee(
        &self,
        round_id: RoundId,
        amount: u64,
        coordinate: EventCoordinate,
        now: i64,
    ) -> Result<bool> {
        // fees only exist for rounds the ledger knows about
        self.require_round(&round_id).await?;
        let fee = TreasuryFee {
            coordinate,
            round_id,
            amount,
            collected_at: now,
        };
        let inserted = self.store.insert_fee(&fee).await?;
        if inserted {
            tracing::debug!(round = %round_id, amount, "fee recorded");
        }
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commitment::{commitment, random_salt};
    use crate::store::MemoryStore;

    const COMMIT_END: i64 = 100;
    const REVEAL_END: i64 = 200;
    const STAKE: u64 = 5;

    fn ledger() -> RoundLedger<MemoryStore> {
        RoundLedger::new(Arc::new(MemoryStore::new()))
    }

    fn rid(n: u8) -> RoundId {
        RoundId::new([n; 32])
    }

    fn pid(n: u8) -> PlayerId {
        PlayerId::new([n; 32])
    }

    fn coord(n: u32) -> EventCoordinate {
        EventCoordinate {
            slot: 1000,
            tx_index: n,
            log_index: 0,
            tx_signature: format!("sig-{}", n),
        }
    }

    async fn open_round(ledger: &RoundLedger<MemoryStore>) -> RoundId {
        let id = rid(1);
        ledger
            .create_round(id, COMMIT_END, REVEAL_END, STAKE, 250, 10)
            .await
            .unwrap();
        id
    }

    async fn commit_and_reveal(
        ledger: &RoundLedger<MemoryStore>,
        round: RoundId,
        player: PlayerId,
        tribe: Tribe,
        reveal: bool,
    ) {
        let salt = random_salt();
        let hash = commitment(tribe, &salt, &player, &round);
        ledger
            .record_commit(round, player, hash, STAKE, 50)
            .await
            .unwrap();
        if reveal {
            ledger
                .record_reveal(round, player, tribe, &salt, 150)
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn duplicate_round_is_rejected() {
        let ledger = ledger();
        let id = open_round(&ledger).await;
        let err = ledger
            .create_round(id, COMMIT_END, REVEAL_END, STAKE, 250, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateRound(_)));
    }

    #[tokio::test]
    async fn invalid_round_parameters_are_rejected() {
        let ledger = ledger();
        assert!(matches!(
            ledger.create_round(rid(1), 200, 100, STAKE, 250, 10).await,
            Err(LedgerError::InvalidRound(_))
        ));
        assert!(matches!(
            ledger.create_round(rid(2), 100, 200, 0, 250, 10).await,
            Err(LedgerError::InvalidRound(_))
        ));
    }

    #[tokio::test]
    async fn second_commit_never_touches_the_first() {
        let ledger = ledger();
        let round = open_round(&ledger).await;
        let player = pid(1);

        let first = ledger
            .record_commit(round, player, [1; 32], STAKE, 50)
            .await
            .unwrap();
        let err = ledger
            .record_commit(round, player, [2; 32], STAKE, 60)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::AlreadyCommitted { .. }));

        let stored = ledger
            .store()
            .player_round(&round, &player)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored, first);
    }

    #[tokio::test]
    async fn commit_outside_commit_phase_fails() {
        let ledger = ledger();
        let round = open_round(&ledger).await;
        let err = ledger
            .record_commit(round, pid(1), [1; 32], STAKE, COMMIT_END)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::PhaseError {
                phase: Phase::RevealOpen,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn reveal_verifies_the_commitment() {
        let ledger = ledger();
        let round = open_round(&ledger).await;
        let player = pid(1);
        let salt = random_salt();
        let hash = commitment(Tribe::Milk, &salt, &player, &round);
        ledger
            .record_commit(round, player, hash, STAKE, 50)
            .await
            .unwrap();

        // wrong tribe and wrong salt both fail
        assert!(matches!(
            ledger
                .record_reveal(round, player, Tribe::Cacao, &salt, 150)
                .await,
            Err(LedgerError::InvalidReveal { .. })
        ));
        assert!(matches!(
            ledger
                .record_reveal(round, player, Tribe::Milk, &random_salt(), 150)
                .await,
            Err(LedgerError::InvalidReveal { .. })
        ));

        let entry = ledger
            .record_reveal(round, player, Tribe::Milk, &salt, 150)
            .await
            .unwrap();
        assert!(entry.revealed);
        assert_eq!(entry.tribe, Some(Tribe::Milk));

        let stored = ledger.store().round(&round).await.unwrap().unwrap();
        assert_eq!(stored.count_milk, 1);
        assert_eq!(stored.milk_pool, STAKE);
    }

    #[tokio::test]
    async fn reveal_without_commit_fails() {
        let ledger = ledger();
        let round = open_round(&ledger).await;
        let err = ledger
            .record_revealed(round, pid(9), Tribe::Milk, 150)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NoSuchCommitment { .. }));
    }

    #[tokio::test]
    async fn mirror_reveal_matches_verified_reveal() {
        let verified = ledger();
        let mirrored = ledger();
        for l in [&verified, &mirrored] {
            open_round(l).await;
        }
        let round = rid(1);
        let player = pid(1);
        let salt = random_salt();
        let hash = commitment(Tribe::Cacao, &salt, &player, &round);

        for l in [&verified, &mirrored] {
            l.record_commit(round, player, hash, STAKE, 50).await.unwrap();
        }
        verified
            .record_reveal(round, player, Tribe::Cacao, &salt, 150)
            .await
            .unwrap();
        mirrored
            .record_revealed(round, player, Tribe::Cacao, 150)
            .await
            .unwrap();

        assert_eq!(
            verified.store().round(&round).await.unwrap(),
            mirrored.store().round(&round).await.unwrap()
        );
        assert_eq!(
            verified.store().player_round(&round, &player).await.unwrap(),
            mirrored.store().player_round(&round, &player).await.unwrap()
        );
    }

    #[tokio::test]
    async fn finalize_is_gated_and_idempotent() {
        let ledger = ledger();
        let round = open_round(&ledger).await;
        commit_and_reveal(&ledger, round, pid(1), Tribe::Milk, true).await;
        commit_and_reveal(&ledger, round, pid(2), Tribe::Milk, true).await;
        commit_and_reveal(&ledger, round, pid(3), Tribe::Cacao, true).await;

        assert!(matches!(
            ledger.finalize(round, REVEAL_END - 1).await,
            Err(LedgerError::TooEarly { .. })
        ));

        let settled = ledger.finalize(round, REVEAL_END).await.unwrap();
        assert!(settled.settled);
        assert_eq!(settled.winner_side, Some(Tribe::Cacao));
        assert_eq!(settled.settled_at, Some(REVEAL_END));

        // redelivered settlement trigger is a no-op, not an error
        let again = ledger.finalize(round, REVEAL_END + 50).await.unwrap();
        assert_eq!(again, settled);
    }

    #[tokio::test]
    async fn tie_round_settles_without_winner_and_rejects_claims() {
        let ledger = ledger();
        let round = open_round(&ledger).await;
        commit_and_reveal(&ledger, round, pid(1), Tribe::Milk, true).await;
        commit_and_reveal(&ledger, round, pid(2), Tribe::Cacao, true).await;

        let settled = ledger.finalize(round, REVEAL_END).await.unwrap();
        assert!(settled.settled);
        assert_eq!(settled.winner_side, None);

        for p in [pid(1), pid(2)] {
            let err = ledger
                .record_claim(round, p, coord(p.as_bytes()[0] as u32), 300)
                .await
                .unwrap_err();
            assert!(matches!(err, LedgerError::NotWinner { .. }));
        }
    }

    #[tokio::test]
    async fn claims_are_exactly_once() {
        let ledger = ledger();
        let round = open_round(&ledger).await;
        commit_and_reveal(&ledger, round, pid(1), Tribe::Milk, true).await;
        commit_and_reveal(&ledger, round, pid(2), Tribe::Milk, true).await;
        commit_and_reveal(&ledger, round, pid(3), Tribe::Cacao, true).await;

        // unsettled round rejects claims outright
        assert!(matches!(
            ledger.record_claim(round, pid(3), coord(1), 150).await,
            Err(LedgerError::NotSettled(_))
        ));

        ledger.finalize(round, REVEAL_END).await.unwrap();

        let claim = ledger
            .record_claim(round, pid(3), coord(1), 300)
            .await
            .unwrap();
        assert_eq!(claim.amount, 15); // 3 * 5 staked, fee floors to zero

        let err = ledger
            .record_claim(round, pid(3), coord(2), 301)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::AlreadyClaimed { .. }));

        // losers cannot claim
        let err = ledger
            .record_claim(round, pid(1), coord(3), 302)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotWinner { .. }));

        assert_eq!(ledger.store().claims().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unrevealed_commit_cannot_claim() {
        let ledger = ledger();
        let round = open_round(&ledger).await;
        commit_and_reveal(&ledger, round, pid(1), Tribe::Milk, true).await;
        commit_and_reveal(&ledger, round, pid(2), Tribe::Milk, true).await;
        commit_and_reveal(&ledger, round, pid(3), Tribe::Cacao, true).await;
        // committed Cacao but never revealed; Cacao still wins 1 v 2
        commit_and_reveal(&ledger, round, pid(4), Tribe::Cacao, false).await;

        let settled = ledger.finalize(round, REVEAL_END).await.unwrap();
        assert_eq!(settled.winner_side, Some(Tribe::Cacao));

        let err = ledger
            .record_claim(round, pid(4), coord(1), 300)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotWinner { .. }));
    }

    #[tokio::test]
    async fn mirrored_claim_redelivery_is_a_noop() {
        let ledger = ledger();
        let round = open_round(&ledger).await;
        commit_and_reveal(&ledger, round, pid(1), Tribe::Milk, true).await;
        commit_and_reveal(&ledger, round, pid(2), Tribe::Milk, true).await;
        commit_and_reveal(&ledger, round, pid(3), Tribe::Cacao, true).await;
        ledger.finalize(round, REVEAL_END).await.unwrap();

        let c = coord(7);
        assert!(ledger
            .record_claimed(round, pid(3), 15, c.clone(), 300)
            .await
            .unwrap());
        assert!(!ledger
            .record_claimed(round, pid(3), 15, c, 301)
            .await
            .unwrap());

        assert_eq!(ledger.store().claims().await.unwrap().len(), 1);
        let entry = ledger
            .store()
            .player_round(&round, &pid(3))
            .await
            .unwrap()
            .unwrap();
        assert!(entry.claimed);
        assert_eq!(entry.claimed_at, Some(300));
    }

    #[tokio::test]
    async fn fee_receipts_are_coordinate_keyed() {
        let ledger = ledger();
        let round = open_round(&ledger).await;
        let c = coord(9);
        assert!(ledger.record_fee(round, 450, c.clone(), 300).await.unwrap());
        assert!(!ledger.record_fee(round, 450, c, 300).await.unwrap());
        assert_eq!(
            ledger.store().fees_for_round(&round).await.unwrap().len(),
            1
        );
    }
}
