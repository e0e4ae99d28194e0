//! Request handlers for the API endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;

use super::AppState;
use super::types::{ErrorResponse, NetworksResponse};
use crate::sim::status::StatusSnapshot;

/// `GET /status` → 200 + `StatusSnapshot` JSON
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusSnapshot> {
    Json(state.status.snapshot())
}

/// `GET /networks` → 200 + every network with its rank
pub async fn get_networks(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let ranks = state
        .networks
        .iter()
        .map(|n| n.rank + 1)
        .max()
        .unwrap_or(0);
    Json(NetworksResponse {
        ranks,
        networks: &state.networks,
    })
    .into_response()
}

/// `GET /networks/{id}` → 200 + `NetworkSummary`, or 404 + `ErrorResponse`
pub async fn get_network(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.networks.iter().find(|n| n.id == id) {
        Some(network) => Ok(Json(network.clone())),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("unknown network `{id}`"),
            }),
        )),
    }
}
