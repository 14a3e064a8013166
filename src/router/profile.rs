//! Account lifecycle HTTP API.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use validator::Validate;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::AppState;
use crate::account::{AccountId, AccountView, Secret};
use crate::error::Result;
use crate::router::Valid;

#[derive(Debug, Default, Serialize, Deserialize, Validate, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct PasswordBody {
    #[serde(default)]
    #[validate(length(min = 1, message = "Current password is required."))]
    pub current_password: String,
    #[serde(default)]
    #[validate(length(min = 1, message = "New password is required."))]
    pub new_password: String,
}

#[derive(Debug, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ImageBody {
    #[serde(alias = "profile_image")]
    pub profile_image: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        // `GET /profile/{id}` goes to `get_profile`.
        // `DELETE /profile/{id}` goes to `delete_account`.
        .route("/{id}", get(get_profile).delete(delete_account))
        // `PUT /profile/{id}/password` goes to `change_password`.
        .route("/{id}/password", put(change_password))
        // `PUT /profile/{id}/image` goes to `set_profile_image`.
        .route("/{id}/image", put(set_profile_image))
}

async fn get_profile(
    State(state): State<AppState>,
    Path(id): Path<AccountId>,
) -> Result<Json<AccountView>> {
    Ok(Json(state.accounts.get_profile(id).await?))
}

async fn delete_account(
    State(state): State<AppState>,
    Path(id): Path<AccountId>,
) -> Result<StatusCode> {
    state.accounts.delete_account(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn change_password(
    State(state): State<AppState>,
    Path(id): Path<AccountId>,
    Valid(mut body): Valid<PasswordBody>,
) -> Result<StatusCode> {
    let current = Secret::new(std::mem::take(&mut body.current_password));
    let new = Secret::new(std::mem::take(&mut body.new_password));

    state.accounts.change_password(id, current, new).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn set_profile_image(
    State(state): State<AppState>,
    Path(id): Path<AccountId>,
    Valid(body): Valid<ImageBody>,
) -> Result<StatusCode> {
    state
        .accounts
        .set_profile_image(id, body.profile_image)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
