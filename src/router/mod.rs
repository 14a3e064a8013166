//! HTTP API.
pub mod login;
pub mod metrics;
pub mod profile;
pub mod register;
pub mod status;
pub mod sync;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Request};
use serde::de::DeserializeOwned;
use validator::Validate;

use crate::ServerError;

/// JSON body checked with [`Validate`] before reaching the handler.
///
/// Bodies use `#[serde(default)]` on required fields so that an absent
/// field fails validation like an empty one.
#[derive(Debug, Clone, Copy, Default)]
pub struct Valid<T>(pub T);

impl<T, S> FromRequest<S> for Valid<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
{
    type Rejection = ServerError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        value.validate()?;
        Ok(Valid(value))
    }
}

/// State backed by the in-memory store.
#[cfg(test)]
pub fn state() -> crate::AppState {
    state_with(crate::config::Configuration::default(), None)
}

#[cfg(test)]
pub fn state_with(
    config: crate::config::Configuration,
    provider: Option<std::sync::Arc<dyn crate::federation::IdentityProvider>>,
) -> crate::AppState {
    crate::AppState::new(
        std::sync::Arc::new(config),
        std::sync::Arc::new(crate::account::MemoryCredentialStore::new()),
        crate::crypto::test_manager(),
        provider,
    )
}
