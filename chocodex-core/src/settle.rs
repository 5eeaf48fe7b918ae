//! Settlement of a finalized round: minority side, protocol fee, per-winner
//! payout. Pure over `Round` + its `PlayerRound` set so it can be re-derived
//! at any time with the same answer, independent of processing order.

use crate::types::{PlayerRound, Round, Tribe};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settlement {
    /// `None` means tie: no payouts, no fee.
    pub winner_side: Option<Tribe>,
    pub fee: u64,
    pub payout_per_winner: u64,
    /// Sum of revealed stakes. Unrevealed commits forfeit their stake to the
    /// authoritative program and count toward neither tribe nor this pool.
    pub total_pool: u64,
    pub winner_count: u32,
}

pub fn settle(round: &Round, entries: &[PlayerRound]) -> Settlement {
    let mut count_milk: u32 = 0;
    let mut count_cacao: u32 = 0;
    let mut pool_milk: u64 = 0;
    let mut pool_cacao: u64 = 0;

    for entry in entries {
        if !entry.revealed {
            continue;
        }
        match entry.tribe {
            Some(Tribe::Milk) => {
                count_milk += 1;
                pool_milk += entry.stake;
            }
            Some(Tribe::Cacao) => {
                count_cacao += 1;
                pool_cacao += entry.stake;
            }
            None => {}
        }
    }

    let total_pool = pool_milk + pool_cacao;

    let winner_side = if count_milk == count_cacao {
        None
    } else if count_milk < count_cacao {
        Some(Tribe::Milk)
    } else {
        Some(Tribe::Cacao)
    };

    let Some(winner) = winner_side else {
        return Settlement {
            winner_side: None,
            fee: 0,
            payout_per_winner: 0,
            total_pool,
            winner_count: 0,
        };
    };

    let winner_count = match winner {
        Tribe::Milk => count_milk,
        Tribe::Cacao => count_cacao,
    };

    let fee = (total_pool as u128 * round.fee_bps as u128 / 10_000) as u64;
    let distributable = total_pool - fee;
    // an empty minority (e.g. 0 revealed vs 2) wins with nobody to pay
    let payout_per_winner = if winner_count == 0 {
        0
    } else {
        distributable / winner_count as u64
    };

    Settlement {
        winner_side,
        fee,
        payout_per_winner,
        total_pool,
        winner_count,
    }
}
