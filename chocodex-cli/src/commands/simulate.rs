//! Simulation harness: strategy-driven players play full rounds through
//! the real ledger on a virtual clock. Useful for seeding a database to
//! demo the read API and for exercising the whole commit/reveal/settle/
//! claim path end to end.

use chocodex_core::commitment::{commitment, random_salt, Salt};
use chocodex_core::{EventCoordinate, LedgerStore, PlayerId, RoundId, RoundLedger, Tribe};
use chocodex_indexer::{LeaderboardAggregator, SqliteLedgerStore, Storage};
use chrono::Utc;
use comfy_table::{presets::UTF8_FULL, Table};
use dialoguer::Confirm;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::path::Path;
use std::sync::Arc;

const STAKE_LAMPORTS: u64 = 5_000_000_000;
const FEE_BPS: u16 = 250;
const COMMIT_WINDOW_SECS: i64 = 30;
const REVEAL_WINDOW_SECS: i64 = 30;
const REVEAL_RATE: f64 = 0.9;

#[derive(Debug, Clone, Copy)]
enum Strategy {
    Random,
    MinoritySeeker,
    MajorityFollower,
    Contrarian,
}

const STRATEGIES: [Strategy; 4] = [
    Strategy::Random,
    Strategy::MinoritySeeker,
    Strategy::MajorityFollower,
    Strategy::Contrarian,
];

impl Strategy {
    /// Pick a side given the committed counts so far this round.
    fn choose(self, rng: &mut StdRng, milk: u32, cacao: u32) -> Tribe {
        match self {
            Strategy::MinoritySeeker if milk != cacao => {
                if milk < cacao {
                    Tribe::Milk
                } else {
                    Tribe::Cacao
                }
            }
            Strategy::MajorityFollower if milk != cacao => {
                if milk > cacao {
                    Tribe::Milk
                } else {
                    Tribe::Cacao
                }
            }
            Strategy::Contrarian if milk != cacao => {
                if milk > cacao {
                    Tribe::Cacao
                } else {
                    Tribe::Milk
                }
            }
            // Random, or any strategy facing even counts, flips a coin
            _ => {
                if rng.gen_bool(0.5) {
                    Tribe::Milk
                } else {
                    Tribe::Cacao
                }
            }
        }
    }
}

struct SimPlayer {
    id: PlayerId,
    strategy: Strategy,
    play_rate: f64,
}

fn sim_coordinate(round_index: u32, seq: u32) -> EventCoordinate {
    EventCoordinate {
        slot: 1_000 + round_index as u64,
        tx_index: seq,
        log_index: 0,
        tx_signature: format!("sim-{}-{}", round_index, seq),
    }
}

pub async fn handle_simulate(
    db_path: &Path,
    rounds: u32,
    player_count: u32,
    seed: Option<u64>,
    wipe: bool,
) -> anyhow::Result<()> {
    if wipe && db_path.exists() {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Delete existing database at {}?",
                db_path.display()
            ))
            .default(false)
            .interact()?;
        if !confirmed {
            println!("Aborted.");
            return Ok(());
        }
        tokio::fs::remove_file(db_path).await?;
    }

    let storage = Arc::new(Storage::new(db_path).await?);
    let store = Arc::new(SqliteLedgerStore::new(storage));
    let ledger = RoundLedger::new(store.clone());

    let seed = seed.unwrap_or_else(rand::random);
    let mut rng = StdRng::seed_from_u64(seed);
    println!(
        "Simulating {} rounds with {} players (seed {})",
        rounds, player_count, seed
    );

    let players: Vec<SimPlayer> = (0..player_count)
        .map(|i| {
            let mut bytes = [0u8; 32];
            rng.fill(&mut bytes[..]);
            SimPlayer {
                id: PlayerId::new(bytes),
                strategy: STRATEGIES[i as usize % STRATEGIES.len()],
                play_rate: rng.gen_range(0.5..1.0),
            }
        })
        .collect();

    // virtual clock: each phase is entered by advancing `now`, not sleeping
    let mut now = Utc::now().timestamp();
    let mut coord_seq: u32 = 0;

    for round_index in 0..rounds {
        let mut id_bytes = [0u8; 32];
        rng.fill(&mut id_bytes[..]);
        let round_id = RoundId::new(id_bytes);
        let commit_deadline = now + COMMIT_WINDOW_SECS;
        let reveal_deadline = commit_deadline + REVEAL_WINDOW_SECS;

        ledger
            .create_round(
                round_id,
                commit_deadline,
                reveal_deadline,
                STAKE_LAMPORTS,
                FEE_BPS,
                now,
            )
            .await?;

        let mut committed: Vec<(PlayerId, Tribe, Salt)> = Vec::new();
        let (mut milk, mut cacao) = (0u32, 0u32);
        for player in &players {
            if rng.gen::<f64>() > player.play_rate {
                continue;
            }
            let tribe = player.strategy.choose(&mut rng, milk, cacao);
            let salt = random_salt();
            let hash = commitment(tribe, &salt, &player.id, &round_id);
            ledger
                .record_commit(round_id, player.id, hash, STAKE_LAMPORTS, now + 1)
                .await?;
            match tribe {
                Tribe::Milk => milk += 1,
                Tribe::Cacao => cacao += 1,
            }
            committed.push((player.id, tribe, salt));
        }

        let reveal_time = commit_deadline + 1;
        let mut skipped_reveals = 0u32;
        for (player, tribe, salt) in &committed {
            // some players commit and never show up again
            if rng.gen::<f64>() > REVEAL_RATE {
                skipped_reveals += 1;
                continue;
            }
            ledger
                .record_reveal(round_id, *player, *tribe, salt, reveal_time)
                .await?;
        }

        let settled = ledger.finalize(round_id, reveal_deadline).await?;
        let settlement = ledger.settlement(round_id).await?;

        if settlement.fee > 0 {
            coord_seq += 1;
            ledger
                .record_fee(
                    round_id,
                    settlement.fee,
                    sim_coordinate(round_index, coord_seq),
                    reveal_deadline + 1,
                )
                .await?;
        }

        let mut claimed_total = 0u64;
        let mut claimers = 0u32;
        if let Some(winner) = settled.winner_side {
            for (player, tribe, _) in &committed {
                if *tribe != winner {
                    continue;
                }
                let entry = store.player_round(&round_id, player).await?;
                if !entry.map_or(false, |e| e.revealed) {
                    continue;
                }
                coord_seq += 1;
                let claim = ledger
                    .record_claim(
                        round_id,
                        *player,
                        sim_coordinate(round_index, coord_seq),
                        reveal_deadline + 2,
                    )
                    .await?;
                claimed_total += claim.amount;
                claimers += 1;
            }
        }

        // every lamport paid out must come from the revealed pool
        debug_assert!(claimed_total + settlement.fee <= settlement.total_pool);

        let outcome = match settled.winner_side {
            Some(winner) => format!("{} wins", winner),
            None => "tie".to_string(),
        };
        println!(
            "Round {:>3}: {} committed ({} milk / {} cacao), {} silent, {} -> {} claims of {} each",
            round_index + 1,
            committed.len(),
            settled.count_milk,
            settled.count_cacao,
            skipped_reveals,
            outcome,
            claimers,
            settlement.payout_per_winner,
        );

        now = reveal_deadline + 10;
    }

    let aggregator = LeaderboardAggregator::new(store);
    let top = aggregator.top_payout(10, 0).await?;
    if !top.is_empty() {
        println!("\nTop earners:");
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_header(vec!["#", "Player", "Total payout", "Claims"]);
        for (rank, entry) in top.iter().enumerate() {
            table.add_row(vec![
                (rank + 1).to_string(),
                format!("{}..", &entry.player.to_hex()[..8]),
                entry.total_payout.to_string(),
                entry.total_claims.to_string(),
            ]);
        }
        println!("{table}");
    }

    Ok(())
}
