//! In-memory credential store.
//!
//! Used when no PostgreSQL instance is configured, and by tests. Everything
//! is lost on restart.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;

use crate::account::{
    Account, AccountId, AuthMarker, CredentialStore, EmailAddress, NewAccount,
    PasswordHash, StoreTransaction,
};
use crate::error::{Result, ServerError};

#[derive(Default)]
struct Inner {
    accounts: HashMap<AccountId, Account>,
    emails: HashMap<EmailAddress, AccountId>,
    last_id: i64,
}

/// Credential store kept in process memory.
///
/// The lock is never held across an `.await`.
#[derive(Clone, Default)]
pub struct MemoryCredentialStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryCredentialStore {
    /// Create a new empty [`MemoryCredentialStore`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored accounts.
    pub fn len(&self) -> usize {
        self.read(|inner| inner.accounts.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read<T>(&self, f: impl FnOnce(&Inner) -> T) -> T {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    fn write<T>(&self, f: impl FnOnce(&mut Inner) -> T) -> T {
        let mut guard =
            self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    fn lookup_email(&self, email: &EmailAddress) -> Option<Account> {
        self.read(|inner| {
            inner
                .emails
                .get(email)
                .and_then(|id| inner.accounts.get(id))
                .cloned()
        })
    }

    fn insert(&self, account: NewAccount) -> Result<Account> {
        self.write(|inner| {
            if inner.emails.contains_key(&account.email) {
                return Err(ServerError::DuplicateEmail);
            }

            inner.last_id += 1;
            let account = account.with_id(AccountId::new(inner.last_id));
            inner.emails.insert(account.email.clone(), account.id);
            inner.accounts.insert(account.id, account.clone());

            Ok(account)
        })
    }

    fn remove(&self, id: AccountId) -> Option<Account> {
        self.write(|inner| {
            let account = inner.accounts.remove(&id)?;
            inner.emails.remove(&account.email);
            Some(account)
        })
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn find_by_email(
        &self,
        email: &EmailAddress,
    ) -> Result<Option<Account>> {
        Ok(self.lookup_email(email))
    }

    async fn find_by_id(&self, id: AccountId) -> Result<Option<Account>> {
        Ok(self.read(|inner| inner.accounts.get(&id).cloned()))
    }

    async fn create(&self, account: NewAccount) -> Result<Account> {
        self.insert(account)
    }

    async fn save(&self, account: &Account) -> Result<()> {
        self.write(|inner| {
            let stored = inner
                .accounts
                .get_mut(&account.id)
                .ok_or(ServerError::AccountNotFound)?;
            stored.display_name = account.display_name.clone();
            stored.profile_image = account.profile_image.clone();
            Ok(())
        })
    }

    async fn update_password(
        &self,
        id: AccountId,
        current: &PasswordHash,
        new: &PasswordHash,
    ) -> Result<()> {
        self.write(|inner| {
            let account = inner
                .accounts
                .get_mut(&id)
                .ok_or(ServerError::AccountNotFound)?;

            match &account.auth {
                AuthMarker::LocalHash(stored)
                    if stored.as_phc() != current.as_phc() =>
                {
                    return Err(ServerError::InvalidCredentials);
                },
                _ => {},
            }

            account.replace_password(new.clone())
        })
    }

    async fn delete(&self, id: AccountId) -> Result<()> {
        self.remove(id).map(|_| ()).ok_or(ServerError::AccountNotFound)
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        Ok(Box::new(MemoryTransaction {
            store: self.clone(),
            created: Vec::new(),
            finished: false,
        }))
    }
}

/// Batch over [`MemoryCredentialStore`].
///
/// Creations are applied immediately, so the uniqueness check races fairly
/// with concurrent registrations, and undone on rollback.
pub struct MemoryTransaction {
    store: MemoryCredentialStore,
    created: Vec<AccountId>,
    finished: bool,
}

impl MemoryTransaction {
    fn undo(&mut self) {
        for id in self.created.drain(..) {
            self.store.remove(id);
        }
        self.finished = true;
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn find_by_email(
        &mut self,
        email: &EmailAddress,
    ) -> Result<Option<Account>> {
        Ok(self.store.lookup_email(email))
    }

    async fn create(&mut self, account: NewAccount) -> Result<Account> {
        let account = self.store.insert(account)?;
        self.created.push(account.id);
        Ok(account)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut tx = self;
        tx.created.clear();
        tx.finished = true;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let mut tx = self;
        tx.undo();
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if !self.finished {
            self.undo();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{AccountBuilder, Secret};

    fn federated(email: &str) -> NewAccount {
        AccountBuilder::new()
            .email(EmailAddress::parse(email).unwrap())
            .federated()
            .build()
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let store = MemoryCredentialStore::new();
        let created = store.create(federated("bob@x.com")).await.unwrap();

        let email = EmailAddress::parse("bob@x.com").unwrap();
        let found = store.find_by_email(&email).await.unwrap().unwrap();
        assert_eq!(found.id, created.id);

        let found = store.find_by_id(created.id).await.unwrap().unwrap();
        assert_eq!(found.email, email);

        // Exact match only.
        let upper = EmailAddress::parse("BOB@x.com").unwrap();
        assert!(store.find_by_email(&upper).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_email() {
        let store = MemoryCredentialStore::new();
        store.create(federated("bob@x.com")).await.unwrap();

        let err = store.create(federated("bob@x.com")).await.unwrap_err();
        assert!(matches!(err, ServerError::DuplicateEmail));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_ids_are_not_reused() {
        let store = MemoryCredentialStore::new();
        let first = store.create(federated("a@x.com")).await.unwrap();
        store.delete(first.id).await.unwrap();

        let second = store.create(federated("a@x.com")).await.unwrap();
        assert!(second.id > first.id);
    }

    #[tokio::test]
    async fn test_update_and_delete_missing() {
        let store = MemoryCredentialStore::new();
        let hash = crate::crypto::test_manager()
            .hash_password(&Secret::new("pw1"))
            .unwrap();

        assert!(matches!(
            store
                .update_password(AccountId::new(42), &hash, &hash)
                .await
                .unwrap_err(),
            ServerError::AccountNotFound
        ));
        assert!(matches!(
            store
                .save(&federated("a@x.com").with_id(AccountId::new(42)))
                .await
                .unwrap_err(),
            ServerError::AccountNotFound
        ));
        assert!(matches!(
            store.delete(AccountId::new(42)).await.unwrap_err(),
            ServerError::AccountNotFound
        ));
    }

    #[tokio::test]
    async fn test_update_password_checks_current_hash() {
        let store = MemoryCredentialStore::new();
        let manager = crate::crypto::test_manager();
        let first = manager.hash_password(&Secret::new("pw1")).unwrap();
        let second = manager.hash_password(&Secret::new("pw2")).unwrap();
        let third = manager.hash_password(&Secret::new("pw3")).unwrap();

        let account = AccountBuilder::new()
            .email(EmailAddress::parse("alice@x.com").unwrap())
            .password(first.clone())
            .build();
        let account = store.create(account).await.unwrap();

        store
            .update_password(account.id, &first, &second)
            .await
            .unwrap();

        // A writer that read the account before the first change loses.
        let err = store
            .update_password(account.id, &first, &third)
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::InvalidCredentials));

        let Some(AuthMarker::LocalHash(stored)) =
            store.find_by_id(account.id).await.unwrap().map(|a| a.auth)
        else {
            panic!("alice must stay a local account");
        };
        assert_eq!(stored.as_phc(), second.as_phc());
    }

    #[tokio::test]
    async fn test_save_writes_profile_only() {
        let store = MemoryCredentialStore::new();
        let manager = crate::crypto::test_manager();
        let first = manager.hash_password(&Secret::new("pw1")).unwrap();
        let second = manager.hash_password(&Secret::new("pw2")).unwrap();

        let account = AccountBuilder::new()
            .email(EmailAddress::parse("alice@x.com").unwrap())
            .password(first.clone())
            .build();
        let mut snapshot = store.create(account).await.unwrap();
        store
            .update_password(snapshot.id, &first, &second)
            .await
            .unwrap();

        // `snapshot` still carries the first hash.
        snapshot.profile_image = Some("alice.png".into());
        snapshot.email = EmailAddress::parse("eve@x.com").unwrap();
        store.save(&snapshot).await.unwrap();

        let found = store.find_by_id(snapshot.id).await.unwrap().unwrap();
        assert_eq!(found.profile_image.as_deref(), Some("alice.png"));
        assert_eq!(found.email.as_str(), "alice@x.com");
        let AuthMarker::LocalHash(stored) = &found.auth else {
            panic!("alice must stay a local account");
        };
        assert_eq!(stored.as_phc(), second.as_phc());
    }

    #[tokio::test]
    async fn test_federated_password_update_refused() {
        let store = MemoryCredentialStore::new();
        let hash = crate::crypto::test_manager()
            .hash_password(&Secret::new("pw1"))
            .unwrap();
        let account = store.create(federated("bob@x.com")).await.unwrap();

        let err = store
            .update_password(account.id, &hash, &hash)
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::FederatedAccountImmutable));

        let found = store.find_by_id(account.id).await.unwrap().unwrap();
        assert!(found.auth.is_federated());
    }

    #[tokio::test]
    async fn test_transaction_rollback() {
        let store = MemoryCredentialStore::new();
        store.create(federated("kept@x.com")).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.create(federated("a@x.com")).await.unwrap();
        tx.create(federated("b@x.com")).await.unwrap();
        tx.rollback().await.unwrap();
        assert_eq!(store.len(), 1);

        let mut tx = store.begin().await.unwrap();
        tx.create(federated("a@x.com")).await.unwrap();
        drop(tx);
        assert_eq!(store.len(), 1);

        let mut tx = store.begin().await.unwrap();
        tx.create(federated("a@x.com")).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_creates() {
        let store = MemoryCredentialStore::new();

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    store.create(federated("race@x.com")).await
                })
            })
            .collect();

        let mut won = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => won += 1,
                Err(ServerError::DuplicateEmail) => {},
                Err(err) => panic!("unexpected error: {err}"),
            }
        }

        assert_eq!(won, 1);
        assert_eq!(store.len(), 1);
    }
}
