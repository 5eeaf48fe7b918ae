use chocodex_core::{current_phase, LedgerStore, Round};
use chocodex_indexer::{LeaderboardAggregator, SqliteLedgerStore, Storage};
use chrono::Utc;
use clap::Subcommand;
use comfy_table::{presets::UTF8_FULL, Table};
use std::path::Path;
use std::sync::Arc;

#[derive(Subcommand)]
pub enum LeaderboardCommands {
    /// Top cumulative payout
    TopPayout {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Win rate over a time window (defaults to the past week)
    Winrate {
        /// Window start as a unix timestamp
        #[arg(long)]
        from: Option<i64>,
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
}

async fn open_store(db_path: &Path) -> anyhow::Result<Arc<SqliteLedgerStore>> {
    let storage = Arc::new(Storage::new(db_path).await?);
    Ok(Arc::new(SqliteLedgerStore::new(storage)))
}

fn short_id(hex: &str) -> String {
    format!("{}..", &hex[..8.min(hex.len())])
}

fn describe_winner(round: &Round) -> String {
    match (round.settled, round.winner_side) {
        (false, _) => "-".to_string(),
        (true, None) => "tie".to_string(),
        (true, Some(t)) => t.to_string(),
    }
}

pub async fn handle_rounds(db_path: &Path, limit: usize) -> anyhow::Result<()> {
    let store = open_store(db_path).await?;
    let rounds = store.recent_rounds(limit).await?;

    if rounds.is_empty() {
        println!("No rounds recorded yet.");
        return Ok(());
    }

    let now = Utc::now().timestamp();
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "Round", "Phase", "Milk", "Cacao", "Pool", "Winner", "Settled at",
    ]);
    for round in &rounds {
        table.add_row(vec![
            short_id(&round.id.to_hex()),
            current_phase(round, now).to_string(),
            round.count_milk.to_string(),
            round.count_cacao.to_string(),
            round.total_pool().to_string(),
            describe_winner(round),
            round
                .settled_at
                .map(|t| t.to_string())
                .unwrap_or_else(|| "-".to_string()),
        ]);
    }
    println!("{table}");
    Ok(())
}

pub async fn handle_leaderboard(db_path: &Path, cmd: LeaderboardCommands) -> anyhow::Result<()> {
    let store = open_store(db_path).await?;
    let aggregator = LeaderboardAggregator::new(store);

    match cmd {
        LeaderboardCommands::TopPayout { limit } => {
            let entries = aggregator.top_payout(limit, 0).await?;
            if entries.is_empty() {
                println!("No claims recorded yet.");
                return Ok(());
            }

            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_header(vec!["#", "Player", "Total payout", "Claims", "Last claim"]);
            for (rank, entry) in entries.iter().enumerate() {
                table.add_row(vec![
                    (rank + 1).to_string(),
                    short_id(&entry.player.to_hex()),
                    entry.total_payout.to_string(),
                    entry.total_claims.to_string(),
                    entry.last_claim.to_string(),
                ]);
            }
            println!("{table}");
        }

        LeaderboardCommands::Winrate { from, limit } => {
            let from = from.unwrap_or_else(|| Utc::now().timestamp() - 7 * 24 * 60 * 60);
            let entries = aggregator
                .win_rate(from, chocodex_indexer::leaderboard::DEFAULT_MIN_ROUNDS, limit, 0)
                .await?;
            if entries.is_empty() {
                println!("No qualifying players in the window.");
                return Ok(());
            }

            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_header(vec!["#", "Player", "Wins", "Rounds", "Rate"]);
            for (rank, entry) in entries.iter().enumerate() {
                table.add_row(vec![
                    (rank + 1).to_string(),
                    short_id(&entry.player.to_hex()),
                    entry.wins.to_string(),
                    entry.total.to_string(),
                    format!("{:.1}%", entry.rate * 100.0),
                ]);
            }
            println!("{table}");
        }
    }
    Ok(())
}
