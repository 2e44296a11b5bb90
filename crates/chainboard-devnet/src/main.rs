//! Chainboard Devnet Node
//!
//! A local ledger node for development: serves one in-memory event log per
//! board over HTTP so several clients can share a board without a real chain.
//!
//! ## Routes
//!
//! ```text
//! GET  /health
//! GET  /boards
//! POST /boards                              { "name": "demo" }
//! GET  /boards/{board}/checkpoint
//! GET  /boards/{board}/events/{stream}?from=0&to=42
//! GET  /boards/{board}/objects/{id}
//! POST /boards/{board}/commands             { "sender": "0xab..", "command": { "command": "move", ... } }
//! ```

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chainboard_core::{
    Checkpoint, Command, EventStream, Ledger, LedgerError, LedgerEvent, MemoryLedger, ObjectAttributes, ObjectId,
    ParticipantId, Receipt,
};
use dashmap::{mapref::entry::Entry, DashMap};
use serde::{Deserialize, Serialize};
use std::{env, net::SocketAddr, sync::Arc};
use thiserror::Error;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

/// Environment variable holding the listen address.
const ADDR_ENV: &str = "CHAINBOARD_DEVNET_ADDR";
const DEFAULT_PORT: u16 = 8545;
/// Signer of the per-board root handle; commands are always re-signed by
/// their sender.
const OPERATOR: &str = "0x0000000000000000000000000000000000000000";

#[derive(Debug, Error)]
enum ApiError {
    #[error("Unknown board: {0}")]
    UnknownBoard(String),
    #[error("Board already exists: {0}")]
    BoardExists(String),
    #[error("Invalid board name")]
    InvalidName,
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::UnknownBoard(_) => StatusCode::NOT_FOUND,
            ApiError::BoardExists(_) => StatusCode::CONFLICT,
            ApiError::InvalidName => StatusCode::BAD_REQUEST,
            ApiError::Ledger(LedgerError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Ledger(LedgerError::UnknownObject(_)) => StatusCode::NOT_FOUND,
            ApiError::Ledger(LedgerError::Rejected(_)) => StatusCode::UNPROCESSABLE_ENTITY,
        };
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct CreateBoard {
    name: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
struct BoardSummary {
    name: String,
    checkpoint: Checkpoint,
    events: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointBody {
    checkpoint: Checkpoint,
}

#[derive(Debug, Default, Deserialize)]
struct RangeQuery {
    from: Option<Checkpoint>,
    to: Option<Checkpoint>,
}

#[derive(Debug, Deserialize)]
struct SubmitRequest {
    sender: ParticipantId,
    command: Command,
}

/// Shared application state
struct AppState {
    /// Event log per board
    boards: DashMap<String, MemoryLedger>,
}

impl AppState {
    fn new() -> Self {
        Self { boards: DashMap::new() }
    }

    /// Handle on a board's log. Cloned out so no map guard is held across
    /// an await.
    fn board(&self, name: &str) -> Result<MemoryLedger, ApiError> {
        self.boards
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ApiError::UnknownBoard(name.to_string()))
    }
}

async fn summarize(name: String, ledger: &MemoryLedger) -> Result<BoardSummary, ApiError> {
    Ok(BoardSummary {
        name,
        checkpoint: ledger.current_checkpoint().await?,
        events: ledger.event_count(),
    })
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chainboard_devnet=info,tower_http=info".into()),
        )
        .init();

    let state = Arc::new(AppState::new());
    let app = router(state);

    let addr = bind_addr();
    info!("Chainboard devnet listening on {}", addr);
    info!("Create a board with: POST http://{}/boards {{\"name\": \"...\"}}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/boards", get(list_boards).post(create_board))
        .route("/boards/{board}/checkpoint", get(current_checkpoint))
        .route("/boards/{board}/events/{stream}", get(query_events))
        .route("/boards/{board}/objects/{id}", get(object_attributes))
        .route("/boards/{board}/commands", post(submit_command))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn bind_addr() -> SocketAddr {
    let default = SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT));
    match env::var(ADDR_ENV) {
        Ok(value) => value.parse().unwrap_or_else(|e| {
            warn!("Ignoring {}={:?}: {}", ADDR_ENV, value, e);
            default
        }),
        Err(_) => default,
    }
}

/// Index page
async fn index() -> &'static str {
    "Chainboard devnet node - see /boards"
}

/// Health check
async fn health() -> &'static str {
    "ok"
}

async fn list_boards(State(state): State<Arc<AppState>>) -> Result<Json<Vec<BoardSummary>>, ApiError> {
    let mut boards: Vec<(String, MemoryLedger)> = state
        .boards
        .iter()
        .map(|entry| (entry.key().clone(), entry.value().clone()))
        .collect();
    boards.sort_by(|a, b| a.0.cmp(&b.0));

    let mut summaries = Vec::with_capacity(boards.len());
    for (name, ledger) in boards {
        summaries.push(summarize(name, &ledger).await?);
    }
    Ok(Json(summaries))
}

async fn create_board(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateBoard>,
) -> Result<(StatusCode, Json<BoardSummary>), ApiError> {
    let name = request.name.trim().to_string();
    if name.is_empty() || name.contains('/') {
        return Err(ApiError::InvalidName);
    }

    let ledger = match state.boards.entry(name.clone()) {
        Entry::Occupied(_) => return Err(ApiError::BoardExists(name)),
        Entry::Vacant(slot) => slot.insert(MemoryLedger::new(OPERATOR)).value().clone(),
    };
    info!("Created board {}", name);
    Ok((StatusCode::CREATED, Json(summarize(name, &ledger).await?)))
}

async fn current_checkpoint(
    State(state): State<Arc<AppState>>,
    Path(board): Path<String>,
) -> Result<Json<CheckpointBody>, ApiError> {
    let ledger = state.board(&board)?;
    Ok(Json(CheckpointBody {
        checkpoint: ledger.current_checkpoint().await?,
    }))
}

async fn query_events(
    State(state): State<Arc<AppState>>,
    Path((board, stream)): Path<(String, EventStream)>,
    Query(range): Query<RangeQuery>,
) -> Result<Json<Vec<LedgerEvent>>, ApiError> {
    let ledger = state.board(&board)?;
    let to = match range.to {
        Some(to) => to,
        None => ledger.current_checkpoint().await?,
    };
    let events = ledger.query_events(stream, range.from.unwrap_or(0), to).await?;
    Ok(Json(events))
}

async fn object_attributes(
    State(state): State<Arc<AppState>>,
    Path((board, id)): Path<(String, i64)>,
) -> Result<Json<ObjectAttributes>, ApiError> {
    let ledger = state.board(&board)?;
    Ok(Json(ledger.object_attributes(ObjectId(id)).await?))
}

async fn submit_command(
    State(state): State<Arc<AppState>>,
    Path(board): Path<String>,
    Json(request): Json<SubmitRequest>,
) -> Result<Json<Receipt>, ApiError> {
    let ledger = state.board(&board)?.with_signer(request.sender);
    match ledger.submit(request.command).await {
        Ok(receipt) => {
            info!(
                "Board {}: checkpoint {} from {}",
                board,
                receipt.checkpoint,
                ledger.signer()
            );
            Ok(Json(receipt))
        }
        Err(e) => {
            warn!("Board {}: command from {} rejected: {}", board, ledger.signer(), e);
            Err(e.into())
        }
    }
}
