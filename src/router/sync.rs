use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, header};
use subtle::ConstantTimeEq;

use crate::AppState;
use crate::error::{Result, ServerError};
use crate::reconcile::ReconcileSummary;

const BEARER: &str = "Bearer ";

/// Handler to import the federated roster now.
///
/// When `federation.sync_key` is set, callers must send it as a bearer
/// token.
pub async fn handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ReconcileSummary>> {
    let sync_key = state
        .config
        .federation
        .as_ref()
        .and_then(|federation| federation.sync_key.as_deref());

    if let Some(sync_key) = sync_key {
        let supplied = headers
            .get(header::AUTHORIZATION)
            .and_then(|header| header.to_str().ok())
            .and_then(|header| header.strip_prefix(BEARER));

        let authorized = supplied.is_some_and(|supplied| {
            supplied.as_bytes().ct_eq(sync_key.as_bytes()).into()
        });
        if !authorized {
            return Err(ServerError::Unauthorized);
        }
    }

    Ok(Json(state.reconciler.sync().await?))
}
