//! HTTP Status Reporter
//!
//! Small read-only surface over the state store:
//! - `GET /hello` - liveness probe
//! - `GET /deposit?btc_tx_id=…&sender=…` - look up one deposit's mint record
//!
//! Responses are JSON `{"data": …}` on success and `{"error": …}` on
//! failure; 400 for bad parameters, 404 for unknown deposits, 500 for
//! store trouble.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info};

use crate::state::StateStore;
use alloy_primitives::B256;

/// Shared state for API handlers
pub type AppState = Arc<StateStore>;

#[derive(Debug, Deserialize)]
pub struct DepositQuery {
    pub btc_tx_id: Option<String>,
    pub sender: Option<String>,
}

/// Mint record as reported over HTTP
#[derive(Debug, Serialize)]
pub struct DepositView {
    pub btc_tx_id: String,
    pub receiver: String,
    pub amount: u64,
    pub mint_tx_hash: Option<String>,
    pub status: String,
}

#[derive(Debug, Serialize)]
struct DataResponse<T: Serialize> {
    data: T,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> axum::response::Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

/// GET /hello
async fn handle_hello() -> impl IntoResponse {
    Json(DataResponse { data: "hello" })
}

/// GET /deposit?btc_tx_id=…&sender=…
async fn handle_deposit(
    State(store): State<AppState>,
    Query(query): Query<DepositQuery>,
) -> axum::response::Response {
    let Some(btc_tx_id) = query.btc_tx_id else {
        return error_response(StatusCode::BAD_REQUEST, "missing btc_tx_id");
    };

    let btc_txid = match parse_txid(&btc_tx_id) {
        Some(txid) => txid,
        None => {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("malformed btc_tx_id: {}", btc_tx_id),
            )
        }
    };

    if let Some(sender) = &query.sender {
        debug!(target: "bridge::reporter", sender = %sender, "deposit lookup");
    }

    match store.get_mint(&btc_txid) {
        Ok(Some(mint)) => {
            let view = DepositView {
                btc_tx_id: hex::encode(mint.btc_txid),
                receiver: hex::encode(mint.receiver),
                amount: mint.amount,
                mint_tx_hash: mint.mint_tx_hash.map(hex::encode),
                status: mint.status.to_string(),
            };
            (StatusCode::OK, Json(DataResponse { data: view })).into_response()
        }
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            format!("deposit {} not found", btc_tx_id),
        ),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

fn parse_txid(s: &str) -> Option<B256> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(s).ok()?;
    if bytes.len() != 32 {
        return None;
    }
    Some(B256::from_slice(&bytes))
}

/// Create the reporter router
pub fn create_router(store: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/hello", get(handle_hello))
        .route("/deposit", get(handle_deposit))
        .layer(cors)
        .with_state(store)
}

/// Serve the reporter until shutdown
pub async fn start_server(
    store: AppState,
    port: u16,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), std::io::Error> {
    let app = create_router(store);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(
        target: "bridge::reporter",
        addr = %listener.local_addr()?,
        "status reporter listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await
}
