//! Core ledger for the commit–reveal minority wager game.
//!
//! Pure domain logic: the commitment scheme, the round phase machine, the
//! settlement engine, and the `RoundLedger` state store over an injected
//! storage port. Nothing in this crate performs I/O beyond the store it is
//! handed; the event-sourced indexer and read API live in
//! `chocodex-indexer`.

pub mod commitment;
pub mod error;
pub mod ledger;
pub mod phase;
pub mod settle;
pub mod store;
pub mod types;

pub use error::{LedgerError, Result};
pub use ledger::RoundLedger;
pub use phase::{current_phase, Phase};
pub use settle::{settle, Settlement};
pub use store::{LedgerStore, MemoryStore};
pub use types::{
    Claim, Cursor, EventCoordinate, PlayerId, PlayerRound, Round, RoundId, TreasuryFee, Tribe,
};
