//! Federated identity provider port.
//!
//! The provider authenticates its users on its own. This service only reads
//! the roster of identities it vouches for.

mod http;

pub use http::*;

use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};

/// An identity as listed by the provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FederatedIdentity {
    pub email: Option<String>,
    pub display_name: Option<String>,
}

impl FederatedIdentity {
    pub fn new(email: impl Into<String>, display_name: Option<&str>) -> Self {
        Self {
            email: Some(email.into()),
            display_name: display_name.map(ToOwned::to_owned),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider answered {status} on {url}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },
    #[error("roster could not be read: {0}")]
    Roster(String),
}

/// Source of federated identities.
pub trait IdentityProvider: Send + Sync {
    /// Lazy roster. Pages are fetched as the stream is polled.
    fn roster(&self) -> BoxStream<'_, Result<FederatedIdentity, ProviderError>>;
}

/// Roster kept in process memory.
#[derive(Debug, Clone, Default)]
pub struct StaticRoster {
    identities: Vec<FederatedIdentity>,
}

impl StaticRoster {
    pub fn new(identities: Vec<FederatedIdentity>) -> Self {
        Self { identities }
    }
}

impl IdentityProvider for StaticRoster {
    fn roster(&self) -> BoxStream<'_, Result<FederatedIdentity, ProviderError>> {
        stream::iter(self.identities.iter().cloned().map(Ok)).boxed()
    }
}
