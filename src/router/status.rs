//! Public instance status.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};

use crate::config::Configuration;

/// Structured configuration.
#[derive(Debug, Serialize, Deserialize)]
pub struct Status {
    pub version: String,
    pub name: String,
    pub url: String,
    /// Whether an identity provider is configured.
    pub federation: bool,
}

/// Public server status (configuration).
pub async fn status(State(config): State<Arc<Configuration>>) -> Json<Status> {
    Json(Status {
        version: config.version().to_owned(),
        name: config.name.clone(),
        url: config.url.clone(),
        federation: config.federation.is_some(),
    })
}
