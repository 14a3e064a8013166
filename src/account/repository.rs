//! Credential store port.

use async_trait::async_trait;

use crate::account::{Account, AccountId, EmailAddress, NewAccount, PasswordHash};
use crate::error::Result;

/// Port for account persistence.
///
/// Lookups match `email` exactly. `create` checks uniqueness and inserts
/// atomically: of two concurrent creators for one email, exactly one gets
/// the account and the other gets [`crate::ServerError::DuplicateEmail`].
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Find an account by email.
    async fn find_by_email(&self, email: &EmailAddress) -> Result<Option<Account>>;

    /// Find an account by identifier.
    async fn find_by_id(&self, id: AccountId) -> Result<Option<Account>>;

    /// Insert a new account and assign its identifier.
    async fn create(&self, account: NewAccount) -> Result<Account>;

    /// Overwrite the profile fields of an existing account: display name
    /// and profile image. Email, marker and hash are never written here.
    async fn save(&self, account: &Account) -> Result<()>;

    /// Swap the hash of a local account from `current` to `new`.
    ///
    /// Fails with [`crate::ServerError::InvalidCredentials`] when the stored
    /// hash is no longer `current`, and with
    /// [`crate::ServerError::FederatedAccountImmutable`] on a federated
    /// account. No other column is written.
    async fn update_password(
        &self,
        id: AccountId,
        current: &PasswordHash,
        new: &PasswordHash,
    ) -> Result<()>;

    /// Remove an account.
    async fn delete(&self, id: AccountId) -> Result<()>;

    /// Open a write batch. Dropping it without [`StoreTransaction::commit`]
    /// rolls it back.
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>>;
}

/// A batch of account creations committed or discarded as a whole.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Find an account by email, including ones created in this batch.
    async fn find_by_email(
        &mut self,
        email: &EmailAddress,
    ) -> Result<Option<Account>>;

    /// Insert a new account as part of this batch.
    async fn create(&mut self, account: NewAccount) -> Result<Account>;

    /// Make every creation of the batch permanent.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discard every creation of the batch.
    async fn rollback(self: Box<Self>) -> Result<()>;
}
