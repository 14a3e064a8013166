//! Paged HTTP client for an Identity Toolkit style `accounts:batchGet`.

use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use reqwest::Client;
use serde::Deserialize;
use zeroize::Zeroizing;

use super::{FederatedIdentity, IdentityProvider, ProviderError};
use crate::config::Federation;

/// One page of `accounts:batchGet`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterPage {
    #[serde(default)]
    pub users: Vec<FederatedIdentity>,
    pub next_page_token: Option<String>,
}

impl RosterPage {
    /// Token of the following page, if any.
    fn next(&self) -> Option<String> {
        self.next_page_token
            .as_ref()
            .filter(|token| !token.is_empty())
            .cloned()
    }
}

enum Cursor {
    Start,
    Next(String),
    Done,
}

/// Provider reached over HTTP.
pub struct HttpRosterProvider {
    client: Client,
    endpoint: String,
    page_size: u32,
    token: Option<Zeroizing<String>>,
}

impl HttpRosterProvider {
    /// Create a new [`HttpRosterProvider`].
    pub fn new(
        config: &Federation,
        token: Option<String>,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .user_agent(format!(
                "{}/{}",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION")
            ))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            page_size: config.page_size,
            token: token.map(Zeroizing::new),
        })
    }

    /// Same as [`HttpRosterProvider::new`], reading the bearer credential
    /// from the environment variable named in `config`.
    pub fn from_env(config: &Federation) -> Result<Self, ProviderError> {
        let token = std::env::var(&config.token_env).ok();
        if token.is_none() {
            tracing::warn!(
                variable = %config.token_env,
                "no provider credential found, roster requests are anonymous"
            );
        }

        Self::new(config, token)
    }

    async fn fetch_page(
        &self,
        page_token: Option<&str>,
    ) -> Result<RosterPage, ProviderError> {
        let mut request = self
            .client
            .get(&self.endpoint)
            .query(&[("maxResults", self.page_size.to_string())]);

        if let Some(page_token) = page_token {
            request = request.query(&[("nextPageToken", page_token)]);
        }
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.as_str());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("Unknown error"));
            return Err(ProviderError::Status {
                url: self.endpoint.clone(),
                status: status.as_u16(),
                body,
            });
        }

        let page = response.json::<RosterPage>().await?;
        tracing::debug!(
            users = page.users.len(),
            last = page.next().is_none(),
            "roster page fetched"
        );

        Ok(page)
    }
}

impl IdentityProvider for HttpRosterProvider {
    fn roster(&self) -> BoxStream<'_, Result<FederatedIdentity, ProviderError>> {
        stream::try_unfold(Cursor::Start, move |cursor| async move {
            let (page, previous) = match cursor {
                Cursor::Start => (self.fetch_page(None).await?, None),
                Cursor::Next(token) => {
                    (self.fetch_page(Some(&token)).await?, Some(token))
                },
                Cursor::Done => return Ok(None),
            };

            // Empty pages may still carry a token: keep following it.
            let cursor = match page.next() {
                Some(token) if previous.as_deref() == Some(token.as_str()) => {
                    return Err(ProviderError::Roster(format!(
                        "page token {token:?} returned twice"
                    )));
                },
                Some(token) => Cursor::Next(token),
                None => Cursor::Done,
            };

            Ok::<_, ProviderError>(Some((page.users, cursor)))
        })
        .map_ok(|users| {
            stream::iter(users.into_iter().map(Ok::<_, ProviderError>))
        })
        .try_flatten()
        .boxed()
    }
}
