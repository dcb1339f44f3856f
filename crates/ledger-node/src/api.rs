//! Local HTTP control API used by `ledger-cli`.

use crate::{message::Message, p2p::Broadcaster};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use ledger_core::{chain::ChainStore, Block, BlockOutcome, Ledger, MineResult, Transaction};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub struct AppState<S: ChainStore> {
    ledger: Arc<Ledger<S>>,
    broadcaster: Broadcaster,
    parallel_mining: bool,
    // One local mining run at a time.
    mining: Arc<Mutex<()>>,
}

impl<S: ChainStore> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            ledger: Arc::clone(&self.ledger),
            broadcaster: self.broadcaster.clone(),
            parallel_mining: self.parallel_mining,
            mining: Arc::clone(&self.mining),
        }
    }
}

impl<S: ChainStore> AppState<S> {
    pub fn new(ledger: Arc<Ledger<S>>, broadcaster: Broadcaster, parallel_mining: bool) -> Self {
        Self {
            ledger,
            broadcaster,
            parallel_mining,
            mining: Arc::new(Mutex::new(())),
        }
    }
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
}

#[derive(Serialize, Deserialize)]
pub struct Head {
    pub height: u64,
    pub hash: String,
    pub forks: usize,
    pub pending: usize,
}

#[derive(Deserialize)]
pub struct TxIn {
    pub from: String,
    pub to: String,
    pub amount: f64,
}

#[derive(Serialize)]
struct TxAccepted {
    accepted: bool,
    tx: Transaction,
}

#[derive(Serialize, Deserialize)]
pub struct Balance {
    pub id: String,
    pub balance: f64,
}

pub struct ApiError(anyhow::Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        warn!("api error: {:#}", self.0);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": format!("{:#}", self.0) })),
        )
            .into_response()
    }
}

impl<E: Into<anyhow::Error>> From<E> for ApiError {
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

pub fn router<S: ChainStore + 'static>(state: AppState<S>) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(Health { status: "ok" }) }))
        .route("/chain", get(chain::<S>))
        .route("/chain/head", get(head::<S>))
        .route("/forks", get(forks::<S>))
        .route("/pending", get(pending::<S>))
        .route("/balance/{id}", get(balance::<S>))
        .route("/tx", post(submit_tx::<S>))
        .route("/mine", post(mine::<S>))
        .with_state(state)
}

async fn chain<S: ChainStore + 'static>(State(state): State<AppState<S>>) -> Json<Vec<Block>> {
    Json(state.ledger.current_chain())
}

async fn head<S: ChainStore + 'static>(State(state): State<AppState<S>>) -> Json<Head> {
    let tip = state.ledger.tip();
    Json(Head {
        height: tip.index,
        hash: tip.hash,
        forks: state.ledger.active_forks().len(),
        pending: state.ledger.pending_transactions().len(),
    })
}

async fn forks<S: ChainStore + 'static>(State(state): State<AppState<S>>) -> Json<Vec<Vec<Block>>> {
    Json(state.ledger.active_forks())
}

async fn pending<S: ChainStore + 'static>(
    State(state): State<AppState<S>>,
) -> Json<Vec<Transaction>> {
    Json(state.ledger.pending_transactions())
}

async fn balance<S: ChainStore + 'static>(
    State(state): State<AppState<S>>,
    Path(id): Path<String>,
) -> Json<Balance> {
    let balance = state.ledger.balance_of(&id);
    Json(Balance { id, balance })
}

async fn submit_tx<S: ChainStore + 'static>(
    State(state): State<AppState<S>>,
    Json(tx): Json<TxIn>,
) -> Json<TxAccepted> {
    let tx = Transaction::new(tx.from, tx.to, tx.amount);
    let accepted = state.ledger.submit_transaction(tx.clone());
    if accepted {
        let broadcaster = state.broadcaster.clone();
        let msg = Message::Tx(tx.clone());
        tokio::spawn(async move {
            broadcaster.broadcast(&msg).await;
        });
    }
    Json(TxAccepted { accepted, tx })
}

async fn mine<S: ChainStore + 'static>(
    State(state): State<AppState<S>>,
) -> Result<Json<MineResult>, ApiError> {
    let _running = state.mining.lock().await;
    let ledger = Arc::clone(&state.ledger);
    let parallel = state.parallel_mining;
    let result = tokio::task::spawn_blocking(move || {
        let job = ledger.prepare_mining();
        let block = if parallel {
            job.run_parallel()
        } else {
            job.run()
        };
        let outcome = ledger.commit_mined(block.clone());
        MineResult { block, outcome }
    })
    .await?;

    info!(index = result.block.index, outcome = ?result.outcome, "local mining finished");
    if matches!(
        result.outcome,
        BlockOutcome::Appended { .. } | BlockOutcome::Forked { .. }
    ) {
        let broadcaster = state.broadcaster.clone();
        let msg = Message::Block(result.block.clone());
        tokio::spawn(async move {
            broadcaster.broadcast(&msg).await;
        });
    }
    Ok(Json(result))
}
