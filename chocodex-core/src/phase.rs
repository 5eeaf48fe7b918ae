use crate::types::Round;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a round, in non-decreasing order. `RevealClosed` is the
/// window past the reveal deadline while the settlement event is pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Created,
    CommitOpen,
    RevealOpen,
    RevealClosed,
    Settled,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Created => "created",
            Phase::CommitOpen => "commit_open",
            Phase::RevealOpen => "reveal_open",
            Phase::RevealClosed => "reveal_closed",
            Phase::Settled => "settled",
        };
        f.write_str(s)
    }
}

/// The single source of phase truth. Every ledger operation gates on this;
/// phase logic must never be re-derived at call sites.
pub fn current_phase(round: &Round, now: i64) -> Phase {
    if round.settled {
        Phase::Settled
    } else if now < round.created_at {
        Phase::Created
    } else if now < round.commit_deadline {
        Phase::CommitOpen
    } else if now < round.reveal_deadline {
        Phase::RevealOpen
    } else {
        Phase::RevealClosed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RoundId;

    fn round() -> Round {
        Round::new(RoundId::new([1; 32]), 100, 200, 5, 250, 10)
    }

    #[test]
    fn phases_follow_deadlines() {
        let r = round();
        assert_eq!(current_phase(&r, 10), Phase::CommitOpen);
        assert_eq!(current_phase(&r, 99), Phase::CommitOpen);
        assert_eq!(current_phase(&r, 100), Phase::RevealOpen);
        assert_eq!(current_phase(&r, 199), Phase::RevealOpen);
        assert_eq!(current_phase(&r, 200), Phase::RevealClosed);
    }

    #[test]
    fn settled_wins_over_time() {
        let mut r = round();
        r.settled = true;
        assert_eq!(current_phase(&r, 10), Phase::Settled);
    }

    #[test]
    fn phase_order_is_monotonic() {
        let r = round();
        let mut last = Phase::Created;
        for now in [0, 50, 100, 150, 200, 250] {
            let phase = current_phase(&r, now);
            assert!(phase >= last, "phase went backwards at {}", now);
            last = phase;
        }
    }
}
