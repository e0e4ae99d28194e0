//! API response types not shared with the library.

use serde::Serialize;

/// Error response body for 4xx errors.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Human-readable error message.
    pub error: String,
}

/// Network list with the rank count, so clients can tell ordering depth.
#[derive(Debug, Serialize)]
pub struct NetworksResponse<'a> {
    pub ranks: usize,
    pub networks: &'a [crate::simulation::NetworkSummary],
}
