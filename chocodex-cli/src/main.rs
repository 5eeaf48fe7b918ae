mod commands;

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "chocodex")]
#[command(about = "Off-chain ledger, indexer and read API for the minority wager game")]
#[command(version)]
struct Cli {
    /// SQLite database path
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the read API over an existing database
    Serve {
        /// Listen address
        #[arg(short, long, default_value = "127.0.0.1:3001")]
        listen: SocketAddr,
    },

    /// Apply an event feed dump (JSON lines), resuming from the cursor
    Ingest {
        /// Feed file path
        feed: PathBuf,
    },

    /// Show recent rounds
    Rounds {
        /// Maximum rounds to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Leaderboard views
    #[command(subcommand)]
    Leaderboard(commands::LeaderboardCommands),

    /// Play simulated rounds through the ledger
    Simulate {
        /// Number of rounds to play
        #[arg(long, default_value_t = 5)]
        rounds: u32,

        /// Number of simulated players
        #[arg(long, default_value_t = 20)]
        players: u32,

        /// RNG seed for reproducible runs
        #[arg(long)]
        seed: Option<u64>,

        /// Delete an existing database first (asks for confirmation)
        #[arg(long)]
        wipe: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(format!(
            "chocodex={0},chocodex_core={0},chocodex_indexer={0}",
            log_level
        )))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let db_path = cli
        .db
        .unwrap_or_else(chocodex_indexer::config::default_db_path);

    let result = match cli.command {
        Commands::Serve { listen } => commands::handle_serve(&db_path, listen).await,
        Commands::Ingest { feed } => commands::handle_ingest(&db_path, &feed).await,
        Commands::Rounds { limit } => commands::handle_rounds(&db_path, limit).await,
        Commands::Leaderboard(cmd) => commands::handle_leaderboard(&db_path, cmd).await,
        Commands::Simulate {
            rounds,
            players,
            seed,
            wipe,
        } => commands::handle_simulate(&db_path, rounds, players, seed, wipe).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
