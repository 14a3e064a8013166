use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use validator::Validate;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::AppState;
use crate::account::{AccountId, Secret};
use crate::auth::Registration;
use crate::error::Result;
use crate::router::Valid;

#[derive(Debug, Default, Serialize, Deserialize, Validate, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct Body {
    #[serde(default)]
    #[validate(length(min = 1, message = "Email is required."))]
    pub email: String,
    #[serde(default)]
    #[validate(length(min = 1, message = "Password is required."))]
    pub password: String,
    pub name: Option<String>,
    pub surname: Option<String>,
    #[serde(alias = "profile_image")]
    pub profile_image: Option<String>,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: AccountId,
}

/// Handler to open a local-password account.
pub async fn handler(
    State(state): State<AppState>,
    Valid(mut body): Valid<Body>,
) -> Result<(StatusCode, Json<Response>)> {
    let registration = Registration {
        email: std::mem::take(&mut body.email),
        password: Secret::new(std::mem::take(&mut body.password)),
        name: body.name.take(),
        surname: body.surname.take(),
        profile_image: body.profile_image.take(),
    };

    let id = state.auth.register(registration).await?;
    Ok((StatusCode::CREATED, Json(Response { id })))
}
