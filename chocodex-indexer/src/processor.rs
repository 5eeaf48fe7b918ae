//! Turns the at-least-once, possibly redelivered event feed into
//! exactly-once mutations of the round ledger. Every handler checks its
//! preconditions defensively and fails closed: a bad event is logged and
//! skipped, never allowed to corrupt state or halt ingestion.

use crate::error::{IndexerError, Result};
use crate::events::{self, EventEnvelope, ProtocolEvent};
use async_trait::async_trait;
use chocodex_core::{LedgerError, LedgerStore, RoundLedger};
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::sync::watch;

const DEFAULT_MAX_RETRIES: u32 = 5;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1000);

/// Ordered feed of event envelopes. Only the processor blocks on I/O; the
/// live subscription transport behind this trait is out of scope here.
#[async_trait]
pub trait EventSource: Send {
    async fn next(&mut self) -> Result<Option<EventEnvelope>>;
}

/// JSON-lines feed dump, used for backfill and replay.
pub struct FileSource {
    lines: Lines<BufReader<File>>,
}

impl FileSource {
    pub async fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).await?;
        Ok(Self {
            lines: BufReader::new(file).lines(),
        })
    }
}

#[async_trait]
impl EventSource for FileSource {
    async fn next(&mut self) -> Result<Option<EventEnvelope>> {
        loop {
            let Some(line) = self.lines.next_line().await? else {
                return Ok(None);
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(envelope) => return Ok(Some(envelope)),
                Err(e) => {
                    // no coordinate to advance past; drop the line
                    tracing::warn!(error = %e, "skipping malformed feed line");
                }
            }
        }
    }
}

pub struct EventProcessor<S> {
    ledger: RoundLedger<S>,
    max_retries: u32,
    retry_delay: Duration,
}

fn is_transient(err: &IndexerError) -> bool {
    matches!(
        err,
        IndexerError::Storage(_) | IndexerError::Io(_) | IndexerError::Ledger(LedgerError::Store(_))
    )
}

impl<S: LedgerStore> EventProcessor<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            ledger: RoundLedger::new(store),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn ledger(&self) -> &RoundLedger<S> {
        &self.ledger
    }

    /// Consume a source until it is exhausted or shutdown is requested.
    /// An in-flight apply always completes, and its cursor advance is
    /// persisted, before the loop exits. Returns the number of events
    /// applied (skipped-by-policy events count as applied).
    pub async fn run<E: EventSource>(
        &self,
        source: &mut E,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<u64> {
        // an unreadable cursor is fatal: guessing a resume position risks
        // permanent divergence from the authoritative source
        let resume_after = self
            .ledger
            .store()
            .cursor()
            .await
            .map_err(|e| IndexerError::CorruptCursor(e.to_string()))?
            .map(|c| c.position());
        if let Some((slot, tx_index, log_index)) = resume_after {
            tracing::info!(slot, tx_index, log_index, "resuming after persisted cursor");
        }

        let mut applied = 0u64;
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = shutdown.changed() => {
                    tracing::info!("shutdown requested, stopping event intake");
                    break;
                }
                next = source.next() => {
                    let Some(envelope) = next? else { break };
                    if let Some(position) = resume_after {
                        if envelope.coordinate().position() <= position {
                            tracing::trace!(slot = envelope.slot, "event at or before cursor, ignoring");
                            continue;
                        }
                    }
                    self.apply_with_retry(&envelope).await?;
                    applied += 1;
                }
            }
        }
        Ok(applied)
    }

    async fn apply_with_retry(&self, envelope: &EventEnvelope) -> Result<()> {
        let mut attempt = 0u32;
        loop {
            match self.apply(envelope).await {
                Ok(()) => return Ok(()),
                Err(err) if is_transient(&err) && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.retry_delay * (1 << (attempt - 1).min(4));
                    tracing::warn!(
                        error = %err,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "transient storage fault, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Apply one envelope. Redelivery of any previously applied event is a
    /// no-op. The cursor only advances after the mutation is durable;
    /// a crash in between re-applies the event, which the upserts absorb.
    pub async fn apply(&self, envelope: &EventEnvelope) -> Result<()> {
        match events::decode(envelope) {
            Ok(event) => {
                tracing::debug!(
                    kind = event.kind(),
                    slot = envelope.slot,
                    signature = %envelope.tx_signature,
                    "processing event"
                );
                if let Err(err) = self.dispatch(event, envelope).await {
                    match &err {
                        IndexerError::Ledger(violation) if violation.is_protocol_violation() => {
                            tracing::warn!(
                                error = %violation,
                                signature = %envelope.tx_signature,
                                "event failed precondition checks, skipping"
                            );
                        }
                        _ => return Err(err),
                    }
                }
            }
            Err(IndexerError::Decode(msg)) => {
                // a single corrupt event must not halt ingestion
                tracing::warn!(%msg, slot = envelope.slot, "skipping undecodable event payload");
            }
            Err(other) => return Err(other),
        }

        self.ledger
            .store()
            .save_cursor(&envelope.coordinate(), Utc::now().timestamp())
            .await?;
        Ok(())
    }

    async fn dispatch(&self, event: ProtocolEvent, envelope: &EventEnvelope) -> Result<()> {
        let now = envelope.block_time;
        let coordinate = envelope.coordinate();

        match event {
            ProtocolEvent::RoundCreated {
                round_id,
                commit_deadline,
                reveal_deadline,
                stake_per_player,
                fee_bps,
            } => {
                match self
                    .ledger
                    .create_round(
                        round_id,
                        commit_deadline,
                        reveal_deadline,
                        stake_per_player,
                        fee_bps,
                        now,
                    )
                    .await
                {
                    Err(LedgerError::DuplicateRound(_)) => {
                        tracing::debug!(round = %round_id, "round creation redelivered");
                        Ok(())
                    }
                    other => other.map(|_| ()).map_err(Into::into),
                }
            }

            ProtocolEvent::MeowCommitted {
                round_id,
                player,
                commitment_hash,
                stake,
            } => {
                match self
                    .ledger
                    .record_commit(round_id, player, commitment_hash, stake, now)
                    .await
                {
                    Err(LedgerError::AlreadyCommitted { .. }) => {
                        let existing = self.ledger.store().player_round(&round_id, &player).await?;
                        match existing {
                            Some(entry) if entry.commitment_hash == commitment_hash => {
                                tracing::debug!(round = %round_id, player = %player, "commit redelivered");
                            }
                            _ => {
                                // never merged or overwritten; the first commit stands
                                tracing::warn!(
                                    round = %round_id,
                                    player = %player,
                                    "conflicting second commit ignored"
                                );
                            }
                        }
                        Ok(())
                    }
                    other => other.map(|_| ()).map_err(Into::into),
                }
            }

            ProtocolEvent::MeowRevealed {
                round_id,
                player,
                tribe,
            } => {
                match self
                    .ledger
                    .record_revealed(round_id, player, tribe, now)
                    .await
                {
                    Err(e @ (LedgerError::NoSuchRound(_) | LedgerError::NoSuchCommitment { .. })) => {
                        tracing::warn!(
                            error = %e,
                            signature = %envelope.tx_signature,
                            out_of_causal_order = true,
                            "reveal without prior commit, skipping"
                        );
                        Ok(())
                    }
                    other => other.map(|_| ()).map_err(Into::into),
                }
            }

            ProtocolEvent::RoundMeowed {
                round_id,
                winner_side,
                revealed_milk_count,
                revealed_cacao_count,
                milk_pool,
                cacao_pool,
            } => self
                .ledger
                .finalize_from_event(
                    round_id,
                    winner_side,
                    revealed_milk_count,
                    revealed_cacao_count,
                    milk_pool,
                    cacao_pool,
                    now,
                )
                .await
                .map(|_| ())
                .map_err(Into::into),

            ProtocolEvent::TreatClaimed {
                round_id,
                player,
                amount,
            } => {
                match self
                    .ledger
                    .record_claimed(round_id, player, amount, coordinate, now)
                    .await
                {
                    Ok(false) => {
                        tracing::debug!(round = %round_id, player = %player, "claim redelivered");
                        Ok(())
                    }
                    Err(e @ (LedgerError::NoSuchRound(_) | LedgerError::NoSuchCommitment { .. })) => {
                        tracing::warn!(
                            error = %e,
                            signature = %envelope.tx_signature,
                            out_of_causal_order = true,
                            "claim without prior participation, skipping"
                        );
                        Ok(())
                    }
                    other => other.map(|_| ()).map_err(Into::into),
                }
            }

            ProtocolEvent::FeeCollected { round_id, amount } => {
                match self.ledger.record_fee(round_id, amount, coordinate, now).await {
                    Ok(_) => Ok(()),
                    Err(e @ LedgerError::NoSuchRound(_)) => {
                        tracing::warn!(
                            error = %e,
                            signature = %envelope.tx_signature,
                            out_of_causal_order = true,
                            "fee for unknown round, skipping"
                        );
                        Ok(())
                    }
                    Err(other) => Err(other.into()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chocodex_core::commitment::{commitment, random_salt};
    use chocodex_core::{MemoryStore, PlayerId, RoundId, Tribe};
    use serde_json::json;
    use std::io::Write;

    const COMMIT_END: i64 = 1_000_100;
    const REVEAL_END: i64 = 1_000_200;

    fn rid() -> RoundId {
        RoundId::new([1; 32])
    }

    fn pid(n: u8) -> PlayerId {
        PlayerId::new([n; 32])
    }

    fn envelope(slot: u64, tx_index: u32, block_time: i64, event: serde_json::Value) -> EventEnvelope {
        EventEnvelope {
            slot,
            tx_index,
            tx_signature: format!("sig-{}-{}", slot, tx_index),
            log_index: 0,
            block_time,
            event,
        }
    }

    fn feed() -> Vec<EventEnvelope> {
        let round = rid();
        let mut events = vec![envelope(
            10,
            0,
            1_000_000,
            json!({
                "kind": "RoundCreated",
                "roundId": round.to_hex(),
                "commitDeadline": COMMIT_END,
                "revealDeadline": REVEAL_END,
                "stakePerPlayer": 5u64,
                "feeBps": 250,
            }),
        )];

        let sides = [(1u8, Tribe::Milk), (2, Tribe::Milk), (3, Tribe::Cacao)];
        for (i, (n, tribe)) in sides.iter().enumerate() {
            let player = pid(*n);
            let salt = random_salt();
            let hash = commitment(*tribe, &salt, &player, &round);
            events.push(envelope(
                11,
                i as u32,
                1_000_010,
                json!({
                    "kind": "MeowCommitted",
                    "roundId": round.to_hex(),
                    "player": player.to_hex(),
                    "commitmentHash": hex::encode(hash),
                    "stake": 5u64,
                }),
            ));
        }
        for (i, (n, tribe)) in sides.iter().enumerate() {
            events.push(envelope(
                12,
                i as u32,
                COMMIT_END + 10,
                json!({
                    "kind": "MeowRevealed",
                    "roundId": round.to_hex(),
                    "player": pid(*n).to_hex(),
                    "tribe": tribe.as_str(),
                }),
            ));
        }
        events.push(envelope(
            13,
            0,
            REVEAL_END + 10,
            json!({
                "kind": "RoundMeowed",
                "roundId": round.to_hex(),
                "winnerSide": "cacao",
                "revealedMilkCount": 2,
                "revealedCacaoCount": 1,
                "milkPool": 10u64,
                "cacaoPool": 5u64,
            }),
        ));
        events.push(envelope(
            14,
            0,
            REVEAL_END + 20,
            json!({
                "kind": "TreatClaimed",
                "roundId": round.to_hex(),
                "player": pid(3).to_hex(),
                "amount": 15u64,
            }),
        ));
        events.push(envelope(
            14,
            1,
            REVEAL_END + 20,
            json!({
                "kind": "FeeCollected",
                "roundId": round.to_hex(),
                "amount": 0u64,
            }),
        ));
        events
    }

    async fn processor() -> EventProcessor<MemoryStore> {
        EventProcessor::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn full_lifecycle_rebuilds_round_state() {
        let processor = processor().await;
        for event in feed() {
            processor.apply(&event).await.unwrap();
        }

        let store = processor.ledger().store();
        let round = store.round(&rid()).await.unwrap().unwrap();
        assert!(round.settled);
        assert_eq!(round.winner_side, Some(Tribe::Cacao));
        assert_eq!(round.count_milk, 2);
        assert_eq!(round.count_cacao, 1);
        assert_eq!(round.total_pool(), 15);

        let winner = store.player_round(&rid(), &pid(3)).await.unwrap().unwrap();
        assert!(winner.revealed && winner.claimed);

        let claims = store.claims().await.unwrap();
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].amount, 15);

        let cursor = store.cursor().await.unwrap().unwrap();
        assert_eq!(cursor.position(), (14, 1, 0));
    }

    #[tokio::test]
    async fn replaying_every_event_twice_changes_nothing() {
        let events = feed();
        let replayed = processor().await;
        for event in &events {
            replayed.apply(event).await.unwrap();
            replayed.apply(event).await.unwrap();
        }
        let once = processor().await;
        for event in &events {
            once.apply(event).await.unwrap();
        }

        let a = replayed.ledger().store();
        let b = once.ledger().store();
        assert_eq!(
            a.round(&rid()).await.unwrap(),
            b.round(&rid()).await.unwrap()
        );
        assert_eq!(
            a.player_rounds_for_round(&rid()).await.unwrap(),
            b.player_rounds_for_round(&rid()).await.unwrap()
        );
        assert_eq!(a.claims().await.unwrap(), b.claims().await.unwrap());
    }

    #[tokio::test]
    async fn out_of_causal_order_reveal_is_skipped_but_cursor_advances() {
        let processor = processor().await;
        let events = feed();
        processor.apply(&events[0]).await.unwrap();

        // reveal for a player that never committed
        let stray = envelope(
            20,
            0,
            COMMIT_END + 10,
            json!({
                "kind": "MeowRevealed",
                "roundId": rid().to_hex(),
                "player": pid(99).to_hex(),
                "tribe": "milk",
            }),
        );
        processor.apply(&stray).await.unwrap();

        let store = processor.ledger().store();
        assert!(store
            .player_round(&rid(), &pid(99))
            .await
            .unwrap()
            .is_none());
        assert_eq!(
            store.cursor().await.unwrap().unwrap().position(),
            (20, 0, 0)
        );
    }

    #[tokio::test]
    async fn undecodable_payload_is_skipped_but_cursor_advances() {
        let processor = processor().await;
        let garbage = envelope(30, 0, 1_000_000, json!({"kind": "MeowExploded", "boom": true}));
        processor.apply(&garbage).await.unwrap();

        let cursor = processor.ledger().store().cursor().await.unwrap().unwrap();
        assert_eq!(cursor.position(), (30, 0, 0));
    }

    #[tokio::test]
    async fn conflicting_second_commit_keeps_the_first() {
        let processor = processor().await;
        let events = feed();
        processor.apply(&events[0]).await.unwrap();
        processor.apply(&events[1]).await.unwrap();

        let original = processor
            .ledger()
            .store()
            .player_round(&rid(), &pid(1))
            .await
            .unwrap()
            .unwrap();

        let conflicting = envelope(
            11,
            5,
            1_000_020,
            json!({
                "kind": "MeowCommitted",
                "roundId": rid().to_hex(),
                "player": pid(1).to_hex(),
                "commitmentHash": hex::encode([0xAAu8; 32]),
                "stake": 9u64,
            }),
        );
        processor.apply(&conflicting).await.unwrap();

        let stored = processor
            .ledger()
            .store()
            .player_round(&rid(), &pid(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored, original);
    }

    #[tokio::test]
    async fn run_resumes_strictly_after_the_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feed.jsonl");
        let mut file = std::fs::File::create(&path).unwrap();
        for event in feed() {
            writeln!(file, "{}", serde_json::to_string(&event).unwrap()).unwrap();
        }
        drop(file);

        let processor = processor().await;
        let (_tx, rx) = watch::channel(false);

        let mut source = FileSource::open(&path).await.unwrap();
        let applied = processor.run(&mut source, rx.clone()).await.unwrap();
        assert_eq!(applied, feed().len() as u64);

        let mut source = FileSource::open(&path).await.unwrap();
        let applied = processor.run(&mut source, rx).await.unwrap();
        assert_eq!(applied, 0);
    }
}
