//! Read-side ranked views, derived on demand from the ledger's claim and
//! round history. One implementation over the storage port serves both the
//! in-memory and SQLite stores, so the views can never drift between them,
//! and nothing here persists state of its own.

use chocodex_core::{LedgerStore, PlayerId, Tribe};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::Result;

/// Default floor carried over from the original ranking: players with fewer
/// qualifying rounds than this are hidden from the win-rate view.
pub const DEFAULT_MIN_ROUNDS: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PayoutEntry {
    pub player: PlayerId,
    pub total_payout: u64,
    pub total_claims: u32,
    pub last_claim: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WinRateEntry {
    pub player: PlayerId,
    pub wins: u32,
    pub total: u32,
    pub rate: f64,
}

pub struct LeaderboardAggregator<S> {
    store: Arc<S>,
}

impl<S: LedgerStore> LeaderboardAggregator<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Cumulative claimed payout per player, descending, with a stable
    /// tie-break on player id so repeated queries page consistently.
    pub async fn top_payout(&self, limit: usize, offset: usize) -> Result<Vec<PayoutEntry>> {
        let claims = self.store.claims().await?;

        let mut totals: BTreeMap<PlayerId, PayoutEntry> = BTreeMap::new();
        for claim in claims {
            let entry = totals.entry(claim.player).or_insert(PayoutEntry {
                player: claim.player,
                total_payout: 0,
                total_claims: 0,
                last_claim: claim.claimed_at,
            });
            entry.total_payout += claim.amount;
            entry.total_claims += 1;
            entry.last_claim = entry.last_claim.max(claim.claimed_at);
        }

        let mut ranked: Vec<PayoutEntry> = totals.into_values().collect();
        ranked.sort_by(|a, b| {
            b.total_payout
                .cmp(&a.total_payout)
                .then(a.player.cmp(&b.player))
        });
        Ok(ranked.into_iter().skip(offset).take(limit).collect())
    }

    /// Win rate over rounds settled at or after `window_start`. A win is a
    /// revealed entry on the winning side; tie rounds count toward the
    /// denominator only. Unrevealed commits never qualify.
    pub async fn win_rate(
        &self,
        window_start: i64,
        min_total: u32,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<WinRateEntry>> {
        let rounds = self.store.rounds_settled_since(window_start).await?;

        let mut tallies: BTreeMap<PlayerId, (u32, u32)> = BTreeMap::new();
        for round in rounds {
            let entries = self.store.player_rounds_for_round(&round.id).await?;
            for entry in entries {
                if !entry.revealed {
                    continue;
                }
                let tally = tallies.entry(entry.player).or_insert((0, 0));
                tally.1 += 1;
                if let (Some(winner), Some(tribe)) = (round.winner_side, entry.tribe) {
                    if winner == tribe {
                        tally.0 += 1;
                    }
                }
            }
        }

        let mut ranked: Vec<WinRateEntry> = tallies
            .into_iter()
            .filter(|(_, (_, total))| *total >= min_total)
            .map(|(player, (wins, total))| WinRateEntry {
                player,
                wins,
                total,
                rate: wins as f64 / total as f64,
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.rate
                .partial_cmp(&a.rate)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.total.cmp(&a.total))
                .then(b.wins.cmp(&a.wins))
                .then(a.player.cmp(&b.player))
        });
        Ok(ranked.into_iter().skip(offset).take(limit).collect())
    }
}
