//! Read-only REST API over a running simulation.
//!
//! Provides three GET endpoints:
//! - `/status` (state, progress, status code and description)
//! - `/networks` (identity of every network)
//! - `/networks/{id}` (one network, 404 when unknown)

mod handlers;
mod types;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tracing::info;

use crate::error::SimResult;
use crate::sim::status::SimulationStatus;
use crate::simulation::NetworkSummary;

pub use types::ErrorResponse;

/// State shared across all request handlers.
///
/// The network list is fixed once the simulation is built; the status is
/// read live while the run progresses.
pub struct AppState {
    pub status: Arc<SimulationStatus>,
    pub networks: Vec<NetworkSummary>,
}

/// Builds the axum router with all API routes.
///
/// # Arguments
///
/// * `state` - Shared application state
///
/// # Returns
///
/// Configured `Router` ready to serve.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/status", get(handlers::get_status))
        .route("/networks", get(handlers::get_networks))
        .route("/networks/{id}", get(handlers::get_network))
        .with_state(state)
}

/// Binds to the given address and serves the API until the process exits.
///
/// # Arguments
///
/// * `state` - Shared application state
/// * `addr` - Socket address to bind to
///
/// # Errors
///
/// Returns [`crate::error::SimError::Io`] if the listener cannot bind or
/// the server fails.
pub async fn serve(state: Arc<AppState>, addr: SocketAddr) -> SimResult<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "status API listening");
    axum::serve(listener, app).await?;
    Ok(())
}
