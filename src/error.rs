//! Error handler for the account service.

use axum::extract::rejection::JsonRejection;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use sqlx::Error as SQLxError;
use thiserror::Error;
use validator::ValidationErrors;

use crate::crypto::CryptoError;
use crate::federation::ProviderError;

pub type Result<T> = std::result::Result<T, ServerError>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Enum representing server-side errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("missing or invalid fields")]
    MissingFields(#[from] ValidationErrors),

    #[error(transparent)]
    Axum(#[from] JsonRejection),

    #[error("an account already uses this email")]
    DuplicateEmail,

    #[error("account not found")]
    AccountNotFound,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("account is managed by the identity provider")]
    FederatedAccountImmutable,

    #[error("reconciliation failed: {0}")]
    ReconciliationFailed(#[source] Box<ServerError>),

    #[error("SQL request failed: {0}")]
    Sql(#[from] SQLxError),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("invalid 'Authorization' header")]
    Unauthorized,

    #[error("{0} is not configured")]
    Unavailable(&'static str),

    #[error("internal server error, {details}")]
    Internal {
        details: String,
        source: Option<BoxError>,
    },
}

impl ServerError {
    /// Wrap any failure as an [`ServerError::Internal`].
    pub fn internal<E>(details: impl Into<String>, err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Internal {
            details: details.into(),
            source: Some(Box::new(err)),
        }
    }

    /// [`ServerError::MissingFields`] for a single field.
    pub fn missing_field(field: &'static str) -> Self {
        let mut errors = ValidationErrors::new();
        errors.add(field, validator::ValidationError::new("required"));
        Self::MissingFields(errors)
    }

    /// Stable identifier exposed as problem `type`.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerError::MissingFields(_) => "missing_fields",
            ServerError::Axum(_) => "invalid_body",
            ServerError::DuplicateEmail => "duplicate_email",
            ServerError::AccountNotFound => "account_not_found",
            ServerError::InvalidCredentials => "invalid_credentials",
            ServerError::FederatedAccountImmutable => {
                "federated_account_immutable"
            },
            ServerError::ReconciliationFailed(_) => "reconciliation_failed",
            ServerError::Unauthorized => "unauthorized",
            ServerError::Unavailable(_) => "unavailable",
            ServerError::Sql(_)
            | ServerError::Migration(_)
            | ServerError::Crypto(_)
            | ServerError::Provider(_)
            | ServerError::Internal { .. } => "internal",
        }
    }
}

/// Structure for detailed error responses.
#[derive(Debug, Serialize)]
pub struct ResponseError {
    r#type: Option<String>,
    title: String,
    status: u16,
    detail: String,
    instance: Option<String>,
    errors: Option<Vec<FieldError>>,
}

impl ResponseError {
    /// Update error status code.
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code.as_u16();
        self
    }

    /// Update `type` field.
    pub fn kind(mut self, kind: &str) -> Self {
        self.r#type = Some(kind.into());
        self
    }

    /// Update `title` field.
    pub fn title(mut self, title: &str) -> Self {
        self.title = title.into();
        self
    }

    /// Add detailed error.
    pub fn details(mut self, description: &str) -> Self {
        self.detail = description.into();
        self
    }

    /// Automatically add errors field.
    pub fn errors(mut self, errors: &ValidationErrors) -> Self {
        self.errors = Some(parse_validation_errors(errors));
        self
    }

    /// Transform [`ResponseError`] into axum [`Response`].
    pub fn into_response(
        self,
    ) -> std::result::Result<Response, axum::http::Error> {
        if let Ok(body) = serde_json::to_string(&self) {
            Response::builder()
                .status(self.status)
                .header(header::CONTENT_TYPE, "application/problem+json")
                .body(body.into())
        } else {
            Ok(internal_server_error())
        }
    }
}

impl Default for ResponseError {
    fn default() -> Self {
        Self {
            r#type: None,
            title: "Internal server error.".to_owned(),
            status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            detail: String::default(),
            instance: None,
            errors: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct FieldError {
    field: String,
    message: String,
}

fn parse_validation_errors(errors: &ValidationErrors) -> Vec<FieldError> {
    errors
        .field_errors()
        .iter()
        .flat_map(|(field, issues)| {
            issues.iter().map(move |issue| FieldError {
                field: field.to_string(),
                message: issue
                    .message
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| issue.code.to_string()),
            })
        })
        .collect()
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let response = ResponseError::default()
            .kind(self.kind())
            .details(&self.to_string());

        let response = match &self {
            ServerError::MissingFields(validation_errors) => response
                .title("Missing fields.")
                .status(StatusCode::BAD_REQUEST)
                .errors(validation_errors),

            ServerError::Axum(_) => response
                .title("Request body could not be parsed.")
                .status(StatusCode::BAD_REQUEST),

            ServerError::DuplicateEmail => response
                .title("User already exists.")
                .status(StatusCode::CONFLICT),

            ServerError::AccountNotFound => response
                .title("User not found.")
                .status(StatusCode::NOT_FOUND),

            ServerError::InvalidCredentials => response
                .title("Invalid credentials.")
                .status(StatusCode::UNAUTHORIZED),

            ServerError::FederatedAccountImmutable => response
                .title("Account is managed by the identity provider.")
                .status(StatusCode::FORBIDDEN),

            ServerError::ReconciliationFailed(cause) => {
                tracing::error!(error = %cause, "reconciliation returned 502");

                response
                    .title("Reconciliation failed, no account was imported.")
                    .status(StatusCode::BAD_GATEWAY)
            },

            ServerError::Unauthorized => response
                .title("Missing or invalid 'Authorization' header.")
                .status(StatusCode::UNAUTHORIZED),

            ServerError::Unavailable(_) => response
                .title("Service unavailable.")
                .status(StatusCode::SERVICE_UNAVAILABLE),

            ServerError::Internal { details, source } => {
                tracing::error!(err = ?source, %details, "server returned 500 status");

                ResponseError::default().kind(self.kind())
            },

            _ => {
                tracing::error!(error = %self, "server returned 500 status");

                ResponseError::default().kind(self.kind())
            },
        };

        response
            .into_response()
            .unwrap_or_else(|_| internal_server_error())
    }
}

fn internal_server_error() -> Response {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header(header::CONTENT_TYPE, "application/problem+json")
        .body(
            serde_json::json!({
                "type": "internal",
                "title": "Internal server error.",
                "status": StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                "detail": null,
                "instance": null,
                "errors": null,
            })
            .to_string()
            .into(),
        )
        .unwrap_or_else(|_| Response::new("Internal server error".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let cases = [
            (ServerError::DuplicateEmail, StatusCode::CONFLICT),
            (ServerError::AccountNotFound, StatusCode::NOT_FOUND),
            (ServerError::InvalidCredentials, StatusCode::UNAUTHORIZED),
            (ServerError::FederatedAccountImmutable, StatusCode::FORBIDDEN),
            (
                ServerError::ReconciliationFailed(Box::new(
                    ServerError::AccountNotFound,
                )),
                StatusCode::BAD_GATEWAY,
            ),
            (
                ServerError::MissingFields(ValidationErrors::new()),
                StatusCode::BAD_REQUEST,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }

    #[test]
    fn test_kinds_are_distinct() {
        let kinds = [
            ServerError::DuplicateEmail.kind(),
            ServerError::AccountNotFound.kind(),
            ServerError::InvalidCredentials.kind(),
            ServerError::FederatedAccountImmutable.kind(),
            ServerError::MissingFields(ValidationErrors::new()).kind(),
            ServerError::ReconciliationFailed(Box::new(
                ServerError::Unauthorized,
            ))
            .kind(),
        ];

        let unique: std::collections::HashSet<_> = kinds.iter().collect();
        assert_eq!(unique.len(), kinds.len());
    }
}
