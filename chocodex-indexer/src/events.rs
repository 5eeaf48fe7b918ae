//! Decoded protocol events. The feed is represented as a closed variant
//! type so the processor's dispatch is exhaustive by construction; an
//! unknown or malformed payload is a `DecodeError`, never silently dropped
//! into a catch-all.

use crate::error::{IndexerError, Result};
use chocodex_core::types::hex_bytes;
use chocodex_core::{EventCoordinate, PlayerId, RoundId, Tribe};
use serde::{Deserialize, Serialize};

/// One record from the event feed: coordinate plus the raw payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub slot: u64,
    pub tx_index: u32,
    pub tx_signature: String,
    pub log_index: u32,
    pub block_time: i64,
    pub event: serde_json::Value,
}

impl EventEnvelope {
    pub fn coordinate(&self) -> EventCoordinate {
        EventCoordinate {
            slot: self.slot,
            tx_index: self.tx_index,
            log_index: self.log_index,
            tx_signature: self.tx_signature.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ProtocolEvent {
    #[serde(rename_all = "camelCase")]
    RoundCreated {
        round_id: RoundId,
        commit_deadline: i64,
        reveal_deadline: i64,
        stake_per_player: u64,
        fee_bps: u16,
    },
    #[serde(rename_all = "camelCase")]
    MeowCommitted {
        round_id: RoundId,
        player: PlayerId,
        #[serde(with = "hex_bytes")]
        commitment_hash: [u8; 32],
        stake: u64,
    },
    #[serde(rename_all = "camelCase")]
    MeowRevealed {
        round_id: RoundId,
        player: PlayerId,
        tribe: Tribe,
    },
    /// Settlement; `winner_side: None` is a tie.
    #[serde(rename_all = "camelCase")]
    RoundMeowed {
        round_id: RoundId,
        winner_side: Option<Tribe>,
        revealed_milk_count: u32,
        revealed_cacao_count: u32,
        milk_pool: u64,
        cacao_pool: u64,
    },
    #[serde(rename_all = "camelCase")]
    TreatClaimed {
        round_id: RoundId,
        player: PlayerId,
        amount: u64,
    },
    #[serde(rename_all = "camelCase")]
    FeeCollected { round_id: RoundId, amount: u64 },
}

impl ProtocolEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ProtocolEvent::RoundCreated { .. } => "RoundCreated",
            ProtocolEvent::MeowCommitted { .. } => "MeowCommitted",
            ProtocolEvent::MeowRevealed { .. } => "MeowRevealed",
            ProtocolEvent::RoundMeowed { .. } => "RoundMeowed",
            ProtocolEvent::TreatClaimed { .. } => "TreatClaimed",
            ProtocolEvent::FeeCollected { .. } => "FeeCollected",
        }
    }
}

/// Decode an envelope's payload. Failure is non-fatal to ingestion: the
/// processor logs, skips and still advances the cursor past the event.
pub fn decode(envelope: &EventEnvelope) -> Result<ProtocolEvent> {
    serde_json::from_value(envelope.event.clone())
        .map_err(|e| IndexerError::decode(format!("{} ({})", e, envelope.tx_signature)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(event: serde_json::Value) -> EventEnvelope {
        EventEnvelope {
            slot: 10,
            tx_index: 0,
            tx_signature: "sig".into(),
            log_index: 0,
            block_time: 1_700_000_000,
            event,
        }
    }

    #[test]
    fn decodes_round_created() {
        let id = RoundId::new([1; 32]).to_hex();
        let event = decode(&envelope(json!({
            "kind": "RoundCreated",
            "roundId": id,
            "commitDeadline": 100,
            "revealDeadline": 200,
            "stakePerPlayer": 5_000_000_000u64,
            "feeBps": 250,
        })))
        .unwrap();
        assert!(matches!(
            event,
            ProtocolEvent::RoundCreated {
                stake_per_player: 5_000_000_000,
                fee_bps: 250,
                ..
            }
        ));
    }

    #[test]
    fn decodes_settlement_with_null_winner_as_tie() {
        let id = RoundId::new([1; 32]).to_hex();
        let event = decode(&envelope(json!({
            "kind": "RoundMeowed",
            "roundId": id,
            "winnerSide": null,
            "revealedMilkCount": 2,
            "revealedCacaoCount": 2,
            "milkPool": 10,
            "cacaoPool": 10,
        })))
        .unwrap();
        assert!(matches!(
            event,
            ProtocolEvent::RoundMeowed {
                winner_side: None,
                ..
            }
        ));
    }

    #[test]
    fn unknown_kind_is_a_decode_error() {
        let err = decode(&envelope(json!({"kind": "MeowPurred"}))).unwrap_err();
        assert!(matches!(err, IndexerError::Decode(_)));
    }

    #[test]
    fn malformed_payload_is_a_decode_error() {
        let err = decode(&envelope(json!({
            "kind": "MeowRevealed",
            "roundId": "not-hex",
            "player": "also-not-hex",
            "tribe": "milk",
        })))
        .unwrap_err();
        assert!(matches!(err, IndexerError::Decode(_)));
    }

    #[test]
    fn envelope_json_round_trip() {
        let id = RoundId::new([2; 32]).to_hex();
        let env = envelope(json!({
            "kind": "FeeCollected",
            "roundId": id,
            "amount": 450,
        }));
        let line = serde_json::to_string(&env).unwrap();
        let back: EventEnvelope = serde_json::from_str(&line).unwrap();
        assert_eq!(back.coordinate(), env.coordinate());
        assert_eq!(decode(&back).unwrap(), decode(&env).unwrap());
    }
}
