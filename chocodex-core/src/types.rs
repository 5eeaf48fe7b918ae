use crate::error::LedgerError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// The two mutually exclusive choices a player can commit to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tribe {
    Milk,
    Cacao,
}

impl Tribe {
    /// Wire tag used in the commitment preimage. Tag 0 is reserved.
    pub fn tag(self) -> u8 {
        match self {
            Tribe::Milk => 1,
            Tribe::Cacao => 2,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self, LedgerError> {
        match tag {
            1 => Ok(Tribe::Milk),
            2 => Ok(Tribe::Cacao),
            other => Err(LedgerError::InvalidTribe(other)),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tribe::Milk => "milk",
            Tribe::Cacao => "cacao",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, LedgerError> {
        match s {
            "milk" => Ok(Tribe::Milk),
            "cacao" => Ok(Tribe::Cacao),
            other => Err(LedgerError::InvalidId(format!("unknown tribe: {}", other))),
        }
    }
}

impl fmt::Display for Tribe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! id_type {
    ($name:ident, $label:literal) => {
        /// Protocol-assigned 32-byte identifier, hex-encoded on the wire.
        /// The width is part of the commitment contract.
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name([u8; 32]);

        impl $name {
            pub fn new(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            pub fn from_hex(s: &str) -> Result<Self, LedgerError> {
                let raw = hex::decode(s.trim_start_matches("0x"))
                    .map_err(|e| LedgerError::InvalidId(format!("{}: {}", $label, e)))?;
                let bytes: [u8; 32] = raw.try_into().map_err(|_| {
                    LedgerError::InvalidId(format!("{} must be 32 bytes", $label))
                })?;
                Ok(Self(bytes))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "({}..)"), &self.to_hex()[..8])
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Self::from_hex(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

id_type!(RoundId, "RoundId");
id_type!(PlayerId, "PlayerId");

/// Hex (de)serialization for 32-byte hashes.
pub mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(deserializer)?;
        let raw = hex::decode(s.trim_start_matches("0x")).map_err(serde::de::Error::custom)?;
        raw.try_into()
            .map_err(|_| serde::de::Error::custom("expected 32 bytes"))
    }
}

/// Unique position of an event in the feed: block/slot, transaction index
/// within the block, and log index within the transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCoordinate {
    pub slot: u64,
    pub tx_index: u32,
    pub log_index: u32,
    pub tx_signature: String,
}

impl EventCoordinate {
    /// Total order over the feed; the signature is carried for audit only.
    pub fn position(&self) -> (u64, u32, u32) {
        (self.slot, self.tx_index, self.log_index)
    }
}

/// One instance of the game. Never deleted; sealed once settled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Round {
    pub id: RoundId,
    pub commit_deadline: i64,
    pub reveal_deadline: i64,
    pub stake_per_player: u64,
    pub fee_bps: u16,
    /// Revealed entries only; unrevealed commits count toward neither tribe.
    pub count_milk: u32,
    pub count_cacao: u32,
    pub milk_pool: u64,
    pub cacao_pool: u64,
    pub settled: bool,
    /// `None` while unsettled, and `None` with `settled = true` on a tie.
    pub winner_side: Option<Tribe>,
    pub created_at: i64,
    pub settled_at: Option<i64>,
}

impl Round {
    pub fn new(
        id: RoundId,
        commit_deadline: i64,
        reveal_deadline: i64,
        stake_per_player: u64,
        fee_bps: u16,
        created_at: i64,
    ) -> Self {
        Self {
            id,
            commit_deadline,
            reveal_deadline,
            stake_per_player,
            fee_bps,
            count_milk: 0,
            count_cacao: 0,
            milk_pool: 0,
            cacao_pool: 0,
            settled: false,
            winner_side: None,
            created_at,
            settled_at: None,
        }
    }

    /// Revealed stakes only.
    pub fn total_pool(&self) -> u64 {
        self.milk_pool + self.cacao_pool
    }

    pub fn revealed_count(&self, tribe: Tribe) -> u32 {
        match tribe {
            Tribe::Milk => self.count_milk,
            Tribe::Cacao => self.count_cacao,
        }
    }
}

/// A player's participation record; at most one per `(round, player)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRound {
    pub round_id: RoundId,
    pub player: PlayerId,
    #[serde(with = "hex_bytes")]
    pub commitment_hash: [u8; 32],
    /// Hidden until reveal.
    pub tribe: Option<Tribe>,
    pub stake: u64,
    pub revealed: bool,
    pub claimed: bool,
    pub committed_at: i64,
    pub revealed_at: Option<i64>,
    pub claimed_at: Option<i64>,
}

impl PlayerRound {
    pub fn new(
        round_id: RoundId,
        player: PlayerId,
        commitment_hash: [u8; 32],
        stake: u64,
        committed_at: i64,
    ) -> Self {
        Self {
            round_id,
            player,
            commitment_hash,
            tribe: None,
            stake,
            revealed: false,
            claimed: false,
            committed_at,
            revealed_at: None,
            claimed_at: None,
        }
    }
}

/// Append-only payout receipt, keyed by event coordinate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub coordinate: EventCoordinate,
    pub round_id: RoundId,
    pub player: PlayerId,
    pub amount: u64,
    pub claimed_at: i64,
}

/// Append-only protocol fee receipt, keyed by event coordinate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreasuryFee {
    pub coordinate: EventCoordinate,
    pub round_id: RoundId,
    pub amount: u64,
    pub collected_at: i64,
}

/// Last successfully applied event coordinate; singleton per deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub slot: u64,
    pub tx_index: u32,
    pub log_index: u32,
    pub tx_signature: String,
    pub updated_at: i64,
}

impl Cursor {
    pub fn position(&self) -> (u64, u32, u32) {
        (self.slot, self.tx_index, self.log_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tribe_tags_round_trip() {
        assert_eq!(Tribe::from_tag(Tribe::Milk.tag()).unwrap(), Tribe::Milk);
        assert_eq!(Tribe::from_tag(Tribe::Cacao.tag()).unwrap(), Tribe::Cacao);
        assert!(Tribe::from_tag(0).is_err());
        assert!(Tribe::from_tag(3).is_err());
    }

    #[test]
    fn id_hex_round_trip() {
        let id = RoundId::new([7u8; 32]);
        let parsed = RoundId::from_hex(&id.to_hex()).unwrap();
        assert_eq!(id, parsed);
        assert!(RoundId::from_hex("abcd").is_err());
    }

    #[test]
    fn coordinate_order_ignores_signature() {
        let a = EventCoordinate {
            slot: 5,
            tx_index: 1,
            log_index: 0,
            tx_signature: "zzz".into(),
        };
        let b = EventCoordinate {
            slot: 5,
            tx_index: 2,
            log_index: 0,
            tx_signature: "aaa".into(),
        };
        assert!(a.position() < b.position());
    }
}
