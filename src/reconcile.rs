//! Import of the federated roster into the credential store.

use std::sync::Arc;

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::account::{
    AccountBuilder, CredentialStore, DisplayName, EmailAddress,
    StoreTransaction,
};
use crate::error::{Result, ServerError};
use crate::federation::{FederatedIdentity, IdentityProvider, ProviderError};
use crate::telemetry;

/// Outcome of one reconciliation pass.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize,
)]
pub struct ReconcileSummary {
    /// Accounts created by this pass.
    pub created: u64,
    /// Entries whose email was already known.
    pub skipped: u64,
    /// Entries without a usable email.
    pub ignored: u64,
}

/// Reconciliation service.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn CredentialStore>,
    provider: Option<Arc<dyn IdentityProvider>>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        provider: Option<Arc<dyn IdentityProvider>>,
    ) -> Self {
        Self { store, provider }
    }

    /// Whether an identity provider is configured.
    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }

    /// Pull the roster from the configured provider and reconcile it.
    pub async fn sync(&self) -> Result<ReconcileSummary> {
        let provider = self
            .provider
            .as_ref()
            .ok_or(ServerError::Unavailable("federation"))?;

        self.reconcile(provider.roster()).await
    }

    /// Create a federated account for every unknown email of `roster`.
    ///
    /// The pass runs in one store transaction: on any store or roster
    /// error, accounts created so far are rolled back and the cause is
    /// returned as [`ServerError::ReconciliationFailed`].
    pub async fn reconcile<S>(&self, roster: S) -> Result<ReconcileSummary>
    where
        S: Stream<Item = std::result::Result<FederatedIdentity, ProviderError>>
            + Send,
    {
        let mut tx = self
            .store
            .begin()
            .await
            .map_err(|err| ServerError::ReconciliationFailed(Box::new(err)))?;

        let summary = match merge(&mut *tx, roster).await {
            Ok(summary) => summary,
            Err(err) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::error!(error = %rollback, "reconciliation rollback failed");
                }
                tracing::warn!(error = %err, "reconciliation aborted, nothing imported");
                return Err(ServerError::ReconciliationFailed(Box::new(err)));
            },
        };

        tx.commit()
            .await
            .map_err(|err| ServerError::ReconciliationFailed(Box::new(err)))?;

        tracing::info!(
            created = summary.created,
            skipped = summary.skipped,
            ignored = summary.ignored,
            "reconciliation done"
        );
        telemetry::record_reconciliation(&summary);

        Ok(summary)
    }
}

async fn merge<S>(
    tx: &mut dyn StoreTransaction,
    roster: S,
) -> Result<ReconcileSummary>
where
    S: Stream<Item = std::result::Result<FederatedIdentity, ProviderError>>
        + Send,
{
    let mut roster = std::pin::pin!(roster);
    let mut summary = ReconcileSummary::default();

    while let Some(identity) = roster.next().await {
        let identity = identity?;

        let Some(email) = identity.email.and_then(EmailAddress::parse) else {
            summary.ignored += 1;
            continue;
        };

        if tx.find_by_email(&email).await?.is_some() {
            summary.skipped += 1;
            continue;
        }

        let account = AccountBuilder::new()
            .email(email)
            .federated()
            .display_name(
                identity
                    .display_name
                    .as_deref()
                    .and_then(DisplayName::from_full_name),
            )
            .build();

        match tx.create(account).await {
            Ok(account) => {
                tracing::debug!(account_id = %account.id, "federated account created");
                summary.created += 1;
            },
            // Lost a race against a concurrent registration.
            Err(ServerError::DuplicateEmail) => summary.skipped += 1,
            Err(err) => return Err(err),
        }
    }

    Ok(summary)
}
