use crate::phase::Phase;
use crate::types::{PlayerId, RoundId};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LedgerError>;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("round already exists: {0}")]
    DuplicateRound(RoundId),

    #[error("round not found: {0}")]
    NoSuchRound(RoundId),

    #[error("invalid round parameters: {0}")]
    InvalidRound(String),

    #[error("operation not allowed for round {round} in phase {phase}")]
    PhaseError { round: RoundId, phase: Phase },

    #[error("player {player} already committed to round {round}")]
    AlreadyCommitted { round: RoundId, player: PlayerId },

    #[error("no commitment from player {player} in round {round}")]
    NoSuchCommitment { round: RoundId, player: PlayerId },

    #[error("reveal by {player} does not match the stored commitment for round {round}")]
    InvalidReveal { round: RoundId, player: PlayerId },

    #[error("round {round} settlement attempted at {now}, before reveal deadline {reveal_deadline}")]
    TooEarly {
        round: RoundId,
        reveal_deadline: i64,
        now: i64,
    },

    #[error("round not settled: {0}")]
    NotSettled(RoundId),

    #[error("player {player} is not on the winning side of round {round}")]
    NotWinner { round: RoundId, player: PlayerId },

    #[error("player {player} already claimed for round {round}")]
    AlreadyClaimed { round: RoundId, player: PlayerId },

    #[error("invalid tribe tag: {0}")]
    InvalidTribe(u8),

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("storage error: {0}")]
    Store(String),
}

impl LedgerError {
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Protocol violations are caller errors, never retried; everything else
    /// is infrastructure and may be transient.
    pub fn is_protocol_violation(&self) -> bool {
        !matches!(self, LedgerError::Store(_))
    }
}
