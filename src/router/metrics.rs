//! Prometheus exposition.

use axum::extract::State;

use crate::AppState;
use crate::error::{Result, ServerError};

/// Render every metric in Prometheus text format.
pub async fn handler(State(state): State<AppState>) -> Result<String> {
    state
        .metrics
        .as_ref()
        .map(|handle| handle.render())
        .ok_or(ServerError::Unavailable("metrics"))
}
