mod ingest;
mod serve;
mod simulate;
mod view;

pub use ingest::handle_ingest;
pub use serve::handle_serve;
pub use simulate::handle_simulate;
pub use view::{handle_leaderboard, handle_rounds, LeaderboardCommands};
