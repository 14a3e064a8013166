use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};
use validator::Validate;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::AppState;
use crate::account::{AccountId, Secret};
use crate::error::Result;
use crate::router::Valid;

#[derive(Debug, Default, Serialize, Deserialize, Validate, Zeroize, ZeroizeOnDrop)]
pub struct Body {
    #[serde(default)]
    #[validate(length(min = 1, message = "Email is required."))]
    pub email: String,
    #[serde(default)]
    #[validate(length(min = 1, message = "Password is required."))]
    pub password: String,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub user_id: AccountId,
    pub name: Option<String>,
    pub surname: Option<String>,
    /// `password` or `federated`.
    pub method: String,
}

/// Handler to authenticate an account.
pub async fn handler(
    State(state): State<AppState>,
    Valid(mut body): Valid<Body>,
) -> Result<Json<Response>> {
    let secret = Secret::new(std::mem::take(&mut body.password));
    let result = state.auth.login(&body.email, secret).await?;

    let (name, surname) = match result.display_name {
        Some(name) => (Some(name.given), Some(name.family)),
        None => (None, None),
    };

    Ok(Json(Response {
        user_id: result.id,
        name,
        surname,
        method: result.method.to_owned(),
    }))
}

#[cfg(test)]
pub(super) mod tests {
    use super::*;
    use crate::federation::{FederatedIdentity, StaticRoster};
    use crate::*;
    use axum::http::StatusCode;
    use http_body_util::BodyExt;
    use serde_json::json;

    #[tokio::test]
    async fn test_login_handler() {
        let state = router::state();
        let app = app(state.clone());

        let response = make_request(
            app.clone(),
            Method::POST,
            "/register",
            json!({"email": "alice@x.com", "password": "pw1", "name": "Alice"})
                .to_string(),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = make_request(
            app.clone(),
            Method::POST,
            "/login",
            json!({"email": "alice@x.com", "password": "pw1"}).to_string(),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body: Response = serde_json::from_slice(&body).unwrap();
        assert_eq!(body.method, "password");
        assert_eq!(body.name.as_deref(), Some("Alice"));
        assert_eq!(body.surname.as_deref(), Some(""));

        let response = make_request(
            app.clone(),
            Method::POST,
            "/login",
            json!({"email": "alice@x.com", "password": "pw2"}).to_string(),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = make_request(
            app.clone(),
            Method::POST,
            "/login",
            json!({"email": "ghost@x.com", "password": "pw1"}).to_string(),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = make_request(
            app,
            Method::POST,
            "/login",
            json!({"email": "alice@x.com"}).to_string(),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_federated_login_handler() {
        let provider = StaticRoster::new(vec![FederatedIdentity::new(
            "bob@x.com",
            Some("Bob Lee"),
        )]);
        let state = router::state_with(
            config::Configuration::default(),
            Some(std::sync::Arc::new(provider)),
        );
        state.reconciler.sync().await.unwrap();
        let app = app(state);

        let response = make_request(
            app,
            Method::POST,
            "/login",
            json!({"email": "bob@x.com", "password": "whatever"}).to_string(),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body: Response = serde_json::from_slice(&body).unwrap();
        assert_eq!(body.method, "federated");
        assert_eq!(body.name.as_deref(), Some("Bob"));
        assert_eq!(body.surname.as_deref(), Some("Lee"));
    }
}
