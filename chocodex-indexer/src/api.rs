//! Read-only HTTP API over the ledger. Unknown rounds are 404, a backend
//! that cannot reach storage is 503, and legitimately empty histories are
//! empty lists, never errors. Amounts serialize as strings: they are
//! lamport-scale u64s and JSON numbers are not safe carriers for them.

use crate::error::Result;
use crate::leaderboard::{LeaderboardAggregator, DEFAULT_MIN_ROUNDS};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chocodex_core::{current_phase, LedgerStore, PlayerRound, Round, RoundId, PlayerId};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;

const DEFAULT_PAGE_LIMIT: usize = 50;
const WEEK_SECS: i64 = 7 * 24 * 60 * 60;

pub struct AppState<S> {
    store: Arc<S>,
    aggregator: LeaderboardAggregator<S>,
    started_at: Instant,
}

impl<S: LedgerStore> AppState<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            aggregator: LeaderboardAggregator::new(store.clone()),
            store,
            started_at: Instant::now(),
        }
    }
}

pub fn router<S: LedgerStore + 'static>(state: Arc<AppState<S>>) -> Router {
    Router::new()
        .route("/health", get(health::<S>))
        .route("/ready", get(ready::<S>))
        .route("/leaderboard/top-payout", get(top_payout::<S>))
        .route("/leaderboard/weekly-winrate", get(weekly_winrate::<S>))
        .route("/rounds", get(recent_rounds::<S>))
        .route("/rounds/:id", get(round_detail::<S>))
        .route("/player/:id/rounds", get(player_rounds::<S>))
        .with_state(state)
}

pub async fn serve<S: LedgerStore + 'static>(
    addr: SocketAddr,
    state: Arc<AppState<S>>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "read API listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await?;
    Ok(())
}

// ---- responses ----

#[derive(Debug, Serialize)]
struct ErrorResp {
    error: String,
}

type ApiError = (StatusCode, Json<ErrorResp>);

fn internal_error(err: impl std::fmt::Display) -> ApiError {
    tracing::error!(error = %err, "API query failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResp {
            error: "internal server error".into(),
        }),
    )
}

fn not_found(what: &str) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResp {
            error: format!("{} not found", what),
        }),
    )
}

fn bad_request(msg: impl Into<String>) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(ErrorResp { error: msg.into() }))
}

#[derive(Debug, Serialize)]
struct HealthResp {
    status: &'static str,
    uptime_secs: u64,
}

#[derive(Debug, Serialize)]
struct ReadyResp {
    status: &'static str,
    storage: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RoundResp {
    id: String,
    phase: String,
    commit_deadline: i64,
    reveal_deadline: i64,
    stake_per_player: String,
    fee_bps: u16,
    count_milk: u32,
    count_cacao: u32,
    milk_pool: String,
    cacao_pool: String,
    total_pool: String,
    settled: bool,
    winner_side: Option<&'static str>,
    created_at: i64,
    settled_at: Option<i64>,
}

impl RoundResp {
    fn from_round(round: &Round, now: i64) -> Self {
        Self {
            id: round.id.to_hex(),
            phase: current_phase(round, now).to_string(),
            commit_deadline: round.commit_deadline,
            reveal_deadline: round.reveal_deadline,
            stake_per_player: round.stake_per_player.to_string(),
            fee_bps: round.fee_bps,
            count_milk: round.count_milk,
            count_cacao: round.count_cacao,
            milk_pool: round.milk_pool.to_string(),
            cacao_pool: round.cacao_pool.to_string(),
            total_pool: round.total_pool().to_string(),
            settled: round.settled,
            winner_side: round.winner_side.map(|t| t.as_str()),
            created_at: round.created_at,
            settled_at: round.settled_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RoundDetailResp {
    #[serde(flatten)]
    round: RoundResp,
    total_players: usize,
    revealed_players: usize,
    fee_collected: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PlayerRoundResp {
    round_id: String,
    player: String,
    commitment_hash: String,
    tribe: Option<&'static str>,
    stake: String,
    revealed: bool,
    claimed: bool,
    committed_at: i64,
    revealed_at: Option<i64>,
    claimed_at: Option<i64>,
}

impl PlayerRoundResp {
    fn from_entry(entry: &PlayerRound) -> Self {
        Self {
            round_id: entry.round_id.to_hex(),
            player: entry.player.to_hex(),
            commitment_hash: hex::encode(entry.commitment_hash),
            tribe: entry.tribe.map(|t| t.as_str()),
            stake: entry.stake.to_string(),
            revealed: entry.revealed,
            claimed: entry.claimed,
            committed_at: entry.committed_at,
            revealed_at: entry.revealed_at,
            claimed_at: entry.claimed_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PayoutResp {
    player: String,
    total_payout: String,
    total_claims: u32,
    last_claim: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WinRateResp {
    player: String,
    wins: u32,
    total: u32,
    rate: f64,
}

// ---- queries ----

#[derive(Debug, Deserialize)]
struct PageQuery {
    limit: Option<usize>,
    offset: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct WinRateQuery {
    from: Option<i64>,
    min_rounds: Option<u32>,
    limit: Option<usize>,
    offset: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct LimitQuery {
    limit: Option<usize>,
}

// ---- handlers ----

async fn health<S: LedgerStore>(State(state): State<Arc<AppState<S>>>) -> Json<HealthResp> {
    Json(HealthResp {
        status: "ok",
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

async fn ready<S: LedgerStore>(
    State(state): State<Arc<AppState<S>>>,
) -> std::result::Result<Json<ReadyResp>, ApiError> {
    // alive is not the same as able to make progress: probe storage
    match state.store.recent_rounds(1).await {
        Ok(_) => Ok(Json(ReadyResp {
            status: "ready",
            storage: "connected",
        })),
        Err(err) => {
            tracing::warn!(error = %err, "readiness probe failed");
            Err((
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorResp {
                    error: "storage unreachable".into(),
                }),
            ))
        }
    }
}

async fn top_payout<S: LedgerStore>(
    State(state): State<Arc<AppState<S>>>,
    Query(page): Query<PageQuery>,
) -> std::result::Result<Json<Vec<PayoutResp>>, ApiError> {
    let entries = state
        .aggregator
        .top_payout(
            page.limit.unwrap_or(DEFAULT_PAGE_LIMIT),
            page.offset.unwrap_or(0),
        )
        .await
        .map_err(internal_error)?;

    Ok(Json(
        entries
            .iter()
            .map(|e| PayoutResp {
                player: e.player.to_hex(),
                total_payout: e.total_payout.to_string(),
                total_claims: e.total_claims,
                last_claim: e.last_claim,
            })
            .collect(),
    ))
}

async fn weekly_winrate<S: LedgerStore>(
    State(state): State<Arc<AppState<S>>>,
    Query(query): Query<WinRateQuery>,
) -> std::result::Result<Json<Vec<WinRateResp>>, ApiError> {
    let from = query
        .from
        .unwrap_or_else(|| Utc::now().timestamp() - WEEK_SECS);
    let entries = state
        .aggregator
        .win_rate(
            from,
            query.min_rounds.unwrap_or(DEFAULT_MIN_ROUNDS),
            query.limit.unwrap_or(DEFAULT_PAGE_LIMIT),
            query.offset.unwrap_or(0),
        )
        .await
        .map_err(internal_error)?;

    Ok(Json(
        entries
            .iter()
            .map(|e| WinRateResp {
                player: e.player.to_hex(),
                wins: e.wins,
                total: e.total,
                rate: e.rate,
            })
            .collect(),
    ))
}

async fn recent_rounds<S: LedgerStore>(
    State(state): State<Arc<AppState<S>>>,
    Query(query): Query<LimitQuery>,
) -> std::result::Result<Json<Vec<RoundResp>>, ApiError> {
    let rounds = state
        .store
        .recent_rounds(query.limit.unwrap_or(DEFAULT_PAGE_LIMIT))
        .await
        .map_err(internal_error)?;

    let now = Utc::now().timestamp();
    Ok(Json(
        rounds
            .iter()
            .map(|r| RoundResp::from_round(r, now))
            .collect(),
    ))
}

async fn round_detail<S: LedgerStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> std::result::Result<Json<RoundDetailResp>, ApiError> {
    let round_id = RoundId::from_hex(&id).map_err(|_| bad_request("malformed round id"))?;
    let round = state
        .store
        .round(&round_id)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| not_found("round"))?;

    let entries = state
        .store
        .player_rounds_for_round(&round_id)
        .await
        .map_err(internal_error)?;
    let fees = state
        .store
        .fees_for_round(&round_id)
        .await
        .map_err(internal_error)?;

    let now = Utc::now().timestamp();
    Ok(Json(RoundDetailResp {
        round: RoundResp::from_round(&round, now),
        total_players: entries.len(),
        revealed_players: entries.iter().filter(|e| e.revealed).count(),
        fee_collected: fees.iter().map(|f| f.amount).sum::<u64>().to_string(),
    }))
}

async fn player_rounds<S: LedgerStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Query(query): Query<LimitQuery>,
) -> std::result::Result<Json<Vec<PlayerRoundResp>>, ApiError> {
    let player = PlayerId::from_hex(&id).map_err(|_| bad_request("malformed player id"))?;
    // an unknown player simply has no history yet
    let entries = state
        .store
        .player_rounds_for_player(&player, query.limit.unwrap_or(DEFAULT_PAGE_LIMIT))
        .await
        .map_err(internal_error)?;

    Ok(Json(
        entries.iter().map(PlayerRoundResp::from_entry).collect(),
    ))
}
