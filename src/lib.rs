//! Account service reconciling local password accounts with a federated
//! identity provider.

#![forbid(unsafe_code)]
pub mod account;
pub mod auth;
pub mod config;
pub mod crypto;
pub mod error;
pub mod federation;
pub mod lifecycle;
pub mod reconcile;
mod router;
pub mod telemetry;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{Method, StatusCode, header};
use axum::routing::{get, post};
use axum::{Router, middleware as AxumMiddleware};
use metrics_exporter_prometheus::PrometheusHandle;
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::cors::{Any, CorsLayer};
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{
    DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer,
};

pub use error::ServerError;

use account::{CredentialStore, MemoryCredentialStore, PgCredentialStore};
use auth::Authenticator;
use crypto::PasswordManager;
use federation::{HttpRosterProvider, IdentityProvider};
use lifecycle::AccountService;
use reconcile::Reconciler;

/// Timeout of every route but `POST /federation/sync`, in seconds.
pub const REQUEST_TIMEOUT: u64 = 10;

/// MUST NEVER be used in production.
#[cfg(test)]
pub async fn make_request(
    app: Router,
    method: Method,
    path: &str,
    body: String,
    authorization: Option<&str>,
) -> axum::http::Response<axum::body::Body> {
    use axum::extract::Request;
    use tower::util::ServiceExt;

    let mut request = Request::builder()
        .method(method)
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(authorization) = authorization {
        request = request.header(header::AUTHORIZATION, authorization);
    }

    app.oneshot(request.body(axum::body::Body::from(body)).unwrap())
        .await
        .unwrap()
}

/// State sharing between routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::Configuration>,
    pub auth: Authenticator,
    pub reconciler: Reconciler,
    pub accounts: AccountService,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Wire services around one credential store.
    pub fn new(
        config: Arc<config::Configuration>,
        store: Arc<dyn CredentialStore>,
        passwords: PasswordManager,
        provider: Option<Arc<dyn IdentityProvider>>,
    ) -> Self {
        Self {
            config,
            auth: Authenticator::new(Arc::clone(&store), passwords.clone()),
            reconciler: Reconciler::new(Arc::clone(&store), provider),
            accounts: AccountService::new(store, passwords),
            metrics: None,
        }
    }

    /// Expose `handle` on `GET /metrics`.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

/// Create router.
pub fn app(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(|chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                    tracing::trace!(size_bytes = chunk.len(), latency = ?latency, "sending body chunk")
                })
                .make_span_with(DefaultMakeSpan::new().include_headers(true).level(tracing::Level::INFO))
                .on_request(DefaultOnRequest::new())
                .on_response(DefaultOnResponse::new().include_headers(true).latency_unit(LatencyUnit::Micros)),
        )
        // Remove senstive headers from trace.
        .layer(SetSensitiveHeadersLayer::new([header::AUTHORIZATION, header::COOKIE]))
        // Add CORS preflight support.
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
                .allow_headers(Any)
                .vary([header::AUTHORIZATION]),
        );

    let sync_timeout = state
        .config
        .federation
        .as_ref()
        .map_or(config::DEFAULT_SYNC_TIMEOUT, |federation| federation.sync_timeout);

    // A roster import runs longer than any other request.
    let sync = Router::new()
        // `POST /federation/sync` goes to `sync`.
        .route("/federation/sync", post(router::sync::handler))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(sync_timeout),
        ));

    Router::new()
        // `GET /status.json` goes to `status`.
        .route("/status.json", get(router::status::status))
        // `GET /metrics` goes to `metrics`.
        .route("/metrics", get(router::metrics::handler))
        // `POST /register` goes to `register`.
        .route("/register", post(router::register::handler))
        // `POST /login` goes to `login`.
        .route("/login", post(router::login::handler))
        .nest("/profile", router::profile::router())
        // Set a timeout.
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, Duration::from_secs(REQUEST_TIMEOUT)))
        .merge(sync)
        .with_state(state)
        .route_layer(AxumMiddleware::from_fn(telemetry::track))
        .layer(middleware)
}

/// Initialize the application state.
pub async fn initialize_state() -> Result<AppState, Box<dyn std::error::Error>>
{
    // read configuration file. let it in memory.
    let config = config::Configuration::default()
        .path(
            std::env::var("CONFIG_PATH")
                .map(PathBuf::from)
                .unwrap_or_default(),
        )
        .read()?;

    let store: Arc<dyn CredentialStore> = match config.postgres {
        Some(ref config) => {
            let store = PgCredentialStore::connect(
                &config.address,
                &config
                    .username
                    .clone()
                    .unwrap_or(account::DEFAULT_CREDENTIALS.into()),
                &config
                    .password
                    .clone()
                    .unwrap_or(account::DEFAULT_CREDENTIALS.into()),
                &config
                    .database
                    .clone()
                    .unwrap_or(account::DEFAULT_DATABASE_NAME.into()),
                config.pool_size.unwrap_or(account::DEFAULT_POOL_SIZE),
            )
            .await?;

            // execute migrations scripts on start.
            store.migrate().await?;
            Arc::new(store)
        },
        None => {
            tracing::warn!(
                "missing `postgres` entry on `config.yaml` file, accounts are kept in memory"
            );
            Arc::new(MemoryCredentialStore::new())
        },
    };

    let passwords = PasswordManager::new(config.argon2.clone())?;

    let provider: Option<Arc<dyn IdentityProvider>> = match &config.federation {
        Some(federation) => {
            Some(Arc::new(HttpRosterProvider::from_env(federation)?))
        },
        None => {
            tracing::info!("no `federation` entry, roster synchronization is disabled");
            None
        },
    };

    Ok(AppState::new(config, store, passwords, provider))
}
