//! Account lifecycle: password change, profile image, profile read and
//! deletion.

use std::sync::Arc;

use crate::account::{
    Account, AccountId, AccountView, AuthMarker, CredentialStore, Secret,
};
use crate::crypto::PasswordManager;
use crate::error::{Result, ServerError};

/// Account lifecycle service.
#[derive(Clone)]
pub struct AccountService {
    store: Arc<dyn CredentialStore>,
    passwords: PasswordManager,
}

impl AccountService {
    pub fn new(store: Arc<dyn CredentialStore>, passwords: PasswordManager) -> Self {
        Self { store, passwords }
    }

    async fn find(&self, id: AccountId) -> Result<Account> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or(ServerError::AccountNotFound)
    }

    /// Replace the password of a local account.
    ///
    /// Federated accounts are refused before any secret is looked at. Only
    /// the hash is written, and only if it is still the one `current` was
    /// checked against.
    pub async fn change_password(
        &self,
        id: AccountId,
        current: Secret,
        new: Secret,
    ) -> Result<()> {
        let account = self.find(id).await?;

        let hash = match account.auth {
            AuthMarker::FederatedDelegate => {
                return Err(ServerError::FederatedAccountImmutable);
            },
            AuthMarker::LocalHash(hash) => hash,
        };

        if !self.passwords.verify(current, hash.clone()).await? {
            tracing::info!(account_id = %id, "password change refused");
            return Err(ServerError::InvalidCredentials);
        }
        if new.expose().is_empty() {
            return Err(ServerError::missing_field("newPassword"));
        }

        let replacement = self.passwords.hash(new).await?;
        self.store
            .update_password(id, &hash, &replacement)
            .await
            .inspect_err(|err| {
                if matches!(err, ServerError::InvalidCredentials) {
                    tracing::info!(
                        account_id = %id,
                        "password changed concurrently, change refused"
                    );
                }
            })?;

        tracing::info!(account_id = %id, "password changed");
        Ok(())
    }

    /// Remove an account permanently.
    pub async fn delete_account(&self, id: AccountId) -> Result<()> {
        self.store.delete(id).await?;
        tracing::info!(account_id = %id, "account deleted");
        Ok(())
    }

    /// Overwrite the profile image reference. `None` or empty clears it.
    pub async fn set_profile_image(
        &self,
        id: AccountId,
        image: Option<String>,
    ) -> Result<()> {
        let mut account = self.find(id).await?;
        account.profile_image = image.filter(|image| !image.is_empty());
        self.store.save(&account).await
    }

    /// Public view of an account.
    pub async fn get_profile(&self, id: AccountId) -> Result<AccountView> {
        Ok(self.find(id).await?.view())
    }
}
