//! Hash commitment binding a hidden tribe choice to a player and round.
//!
//! The preimage layout is a fixed-width contract shared with the
//! authoritative program: `tag(1) || salt(32) || player(32) || round(32)`.
//! Changing any field width silently invalidates previously issued
//! commitments, so the widths here are not an implementation detail.

use crate::types::{PlayerId, RoundId, Tribe};
use rand::RngCore;
use sha2::{Digest, Sha256};

pub const SALT_LEN: usize = 32;

pub type Salt = [u8; SALT_LEN];

/// Compute the commitment hash for a hidden choice.
pub fn commitment(tribe: Tribe, salt: &Salt, player: &PlayerId, round: &RoundId) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update([tribe.tag()]);
    hasher.update(salt);
    hasher.update(player.as_bytes());
    hasher.update(round.as_bytes());
    hasher.finalize().into()
}

/// Recompute and compare. Plain equality: the off-chain mirror trusts the
/// authoritative source for acceptance and only mirrors the decision.
pub fn verify(
    expected: &[u8; 32],
    tribe: Tribe,
    salt: &Salt,
    player: &PlayerId,
    round: &RoundId,
) -> bool {
    commitment(tribe, salt, player, round) == *expected
}

/// Random salt, generated client-side and kept secret until reveal.
pub fn random_salt() -> Salt {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}
