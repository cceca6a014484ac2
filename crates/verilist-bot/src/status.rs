//! Health and status endpoints served while watching.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::{routing::get, Json, Router};
use serde_json::{json, Value};
use verilist_ledger::{CheckpointStore, Ledger};

pub struct StatusState {
    pub ledger: Ledger,
    pub checkpoint: CheckpointStore,
}

/// Returns `200 OK` while the process is up.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Checkpoint position and ledger counts.
async fn status(State(state): State<Arc<StatusState>>) -> (StatusCode, Json<Value>) {
    let checkpoint = state.checkpoint.load().await;
    let counts = state.ledger.counts().await;
    match (checkpoint, counts) {
        (Ok(position), Ok(counts)) => (
            StatusCode::OK,
            Json(json!({
                "stream": state.checkpoint.stream(),
                "checkpoint": position,
                "effects": counts.effects,
                "verifications": counts.verifications,
            })),
        ),
        (Err(e), _) | (_, Err(e)) => {
            tracing::error!(error = %e, "status query failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
        }
    }
}

/// Builds the router with all routes.
pub fn app(state: Arc<StatusState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .with_state(state)
}
