//! PostgreSQL credential store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgExecutor, PgPoolOptions, PgQueryResult};
use sqlx::{FromRow, PgPool, Postgres, Transaction};

use crate::account::{
    Account, AccountId, AuthMarker, CredentialStore, DisplayName,
    EmailAddress, NewAccount, PasswordHash, StoreTransaction,
};
use crate::error::{Result, ServerError};

pub const DEFAULT_CREDENTIALS: &str = "postgres";
pub const DEFAULT_DATABASE_NAME: &str = "accounts";
pub const DEFAULT_POOL_SIZE: u32 = 10;

const LOCAL: &str = "local";
const FEDERATED: &str = "federated";

const SELECT_ACCOUNT: &str = r#"
    SELECT
        id, email, auth_kind, password_hash,
        given_name, family_name, profile_image, created_at
    FROM accounts
"#;

/// Account row as stored in the database.
#[derive(Debug, Clone, FromRow)]
pub struct AccountRecord {
    pub id: i64,
    pub email: String,
    pub auth_kind: String,
    pub password_hash: Option<String>,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub profile_image: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AccountRecord {
    /// Convert to [`Account`].
    pub fn try_into_account(self) -> Result<Account> {
        let email = EmailAddress::parse(self.email).ok_or_else(|| {
            ServerError::Internal {
                details: format!("account {} has an unusable email", self.id),
                source: None,
            }
        })?;

        let auth = match (self.auth_kind.as_str(), self.password_hash) {
            (LOCAL, Some(hash)) => AuthMarker::LocalHash(
                PasswordHash::parse(hash).map_err(|err| ServerError::Internal {
                    details: format!(
                        "account {} has a stored hash that is not PHC: {err}",
                        self.id
                    ),
                    source: None,
                })?,
            ),
            (FEDERATED, None) => AuthMarker::FederatedDelegate,
            (kind, _) => {
                return Err(ServerError::Internal {
                    details: format!(
                        "account {} has inconsistent marker {kind}",
                        self.id
                    ),
                    source: None,
                });
            },
        };

        let display_name = match (self.given_name, self.family_name) {
            (None, None) => None,
            (given, family) => Some(DisplayName::new(
                given.unwrap_or_default(),
                family.unwrap_or_default(),
            )),
        };

        Ok(Account {
            id: AccountId::new(self.id),
            email,
            auth,
            display_name,
            profile_image: self.profile_image,
            created_at: self.created_at,
        })
    }
}

/// Split the marker into its two columns.
fn marker_columns(auth: &AuthMarker) -> (&'static str, Option<&str>) {
    match auth {
        AuthMarker::LocalHash(hash) => (LOCAL, Some(hash.as_phc())),
        AuthMarker::FederatedDelegate => (FEDERATED, None),
    }
}

fn name_columns(name: &Option<DisplayName>) -> (Option<&str>, Option<&str>) {
    match name {
        Some(name) => (Some(name.given.as_str()), Some(name.family.as_str())),
        None => (None, None),
    }
}

async fn fetch_by_email<'e, E: PgExecutor<'e>>(
    executor: E,
    email: &EmailAddress,
) -> Result<Option<Account>> {
    let query = format!("{SELECT_ACCOUNT} WHERE email = $1");
    sqlx::query_as::<_, AccountRecord>(&query)
        .bind(email.as_str())
        .fetch_optional(executor)
        .await?
        .map(AccountRecord::try_into_account)
        .transpose()
}

async fn insert<'e, E: PgExecutor<'e>>(
    executor: E,
    account: NewAccount,
) -> Result<Account> {
    let (auth_kind, password_hash) = marker_columns(&account.auth);
    let (given_name, family_name) = name_columns(&account.display_name);

    // A conflicting row, even one from a concurrent uncommitted
    // transaction, yields no id instead of aborting the caller's batch.
    let id = sqlx::query_as::<_, (i64,)>(
        r#"
        INSERT INTO accounts (
            email, auth_kind, password_hash,
            given_name, family_name, profile_image, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (email) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(account.email.as_str())
    .bind(auth_kind)
    .bind(password_hash)
    .bind(given_name)
    .bind(family_name)
    .bind(&account.profile_image)
    .bind(account.created_at)
    .fetch_optional(executor)
    .await?;

    match id {
        Some((id,)) => Ok(account.with_id(AccountId::new(id))),
        None => Err(ServerError::DuplicateEmail),
    }
}

/// PostgreSQL credential store.
#[derive(Clone)]
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    /// Create a new [`PgCredentialStore`] on an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Init database connections.
    pub async fn connect(
        hostname: &str,
        username: &str,
        password: &str,
        db: &str,
        pool: u32,
    ) -> Result<Self> {
        let addr = format!("postgres://{username}:{password}@{hostname}/{db}");
        let pool = PgPoolOptions::new().max_connections(pool);
        let postgres = pool.connect(&addr).await?;

        tracing::info!(%hostname, %db, "postgres connected");

        Ok(Self::new(postgres))
    }

    /// Execute migrations scripts.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!().run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_by_email(
        &self,
        email: &EmailAddress,
    ) -> Result<Option<Account>> {
        fetch_by_email(&self.pool, email).await
    }

    async fn find_by_id(&self, id: AccountId) -> Result<Option<Account>> {
        let query = format!("{SELECT_ACCOUNT} WHERE id = $1");
        sqlx::query_as::<_, AccountRecord>(&query)
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await?
            .map(AccountRecord::try_into_account)
            .transpose()
    }

    async fn create(&self, account: NewAccount) -> Result<Account> {
        insert(&self.pool, account).await
    }

    async fn save(&self, account: &Account) -> Result<()> {
        let (given_name, family_name) = name_columns(&account.display_name);

        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET given_name = $2, family_name = $3, profile_image = $4
            WHERE id = $1
            "#,
        )
        .bind(account.id.get())
        .bind(given_name)
        .bind(family_name)
        .bind(&account.profile_image)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ServerError::AccountNotFound);
        }

        Ok(())
    }

    async fn update_password(
        &self,
        id: AccountId,
        current: &PasswordHash,
        new: &PasswordHash,
    ) -> Result<()> {
        let result: PgQueryResult = sqlx::query(
            r#"
            UPDATE accounts
            SET password_hash = $3
            WHERE id = $1 AND auth_kind = 'local' AND password_hash = $2
            "#,
        )
        .bind(id.get())
        .bind(current.as_phc())
        .bind(new.as_phc())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        // Nothing matched: tell why.
        match self.find_by_id(id).await? {
            None => Err(ServerError::AccountNotFound),
            Some(account) if account.auth.is_federated() => {
                Err(ServerError::FederatedAccountImmutable)
            },
            Some(_) => Err(ServerError::InvalidCredentials),
        }
    }

    async fn delete(&self, id: AccountId) -> Result<()> {
        let result = sqlx::query("DELETE FROM accounts WHERE id = $1")
            .bind(id.get())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(ServerError::AccountNotFound);
        }

        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgStoreTransaction { tx }))
    }
}

/// Batch over one PostgreSQL transaction. Rolled back on drop.
pub struct PgStoreTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PgStoreTransaction {
    async fn find_by_email(
        &mut self,
        email: &EmailAddress,
    ) -> Result<Option<Account>> {
        fetch_by_email(&mut *self.tx, email).await
    }

    async fn create(&mut self, account: NewAccount) -> Result<Account> {
        insert(&mut *self.tx, account).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[cfg(all(test, feature = "postgres-tests"))]
mod tests {
    use super::*;
    use crate::account::AccountBuilder;
    use crate::account::Secret;

    fn federated(email: &str) -> NewAccount {
        AccountBuilder::new()
            .email(EmailAddress::parse(email).unwrap())
            .federated()
            .build()
    }

    #[sqlx::test]
    async fn test_create_and_find(pool: PgPool) {
        let store = PgCredentialStore::new(pool);
        let hash = crate::crypto::test_manager()
            .hash_password(&Secret::new("pw1"))
            .unwrap();
        let account = AccountBuilder::new()
            .email(EmailAddress::parse("alice@x.com").unwrap())
            .password(hash)
            .display_name(Some(DisplayName::new("Alice", "Liddell")))
            .build();

        let created = store.create(account).await.unwrap();
        let found = store
            .find_by_email(&created.email)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(found.id, created.id);
        assert!(!found.auth.is_federated());
        assert_eq!(found.display_name, created.display_name);
    }

    #[sqlx::test]
    async fn test_duplicate_email(pool: PgPool) {
        let store = PgCredentialStore::new(pool);
        store.create(federated("bob@x.com")).await.unwrap();

        let err = store.create(federated("bob@x.com")).await.unwrap_err();
        assert!(matches!(err, ServerError::DuplicateEmail));
    }

    #[sqlx::test]
    async fn test_transaction_rollback(pool: PgPool) {
        let store = PgCredentialStore::new(pool);

        let mut tx = store.begin().await.unwrap();
        tx.create(federated("bob@x.com")).await.unwrap();
        assert!(
            tx.find_by_email(&EmailAddress::parse("bob@x.com").unwrap())
                .await
                .unwrap()
                .is_some()
        );
        tx.rollback().await.unwrap();

        let email = EmailAddress::parse("bob@x.com").unwrap();
        assert!(store.find_by_email(&email).await.unwrap().is_none());
    }

    #[sqlx::test]
    async fn test_update_password(pool: PgPool) {
        let store = PgCredentialStore::new(pool);
        let manager = crate::crypto::test_manager();
        let first = manager.hash_password(&Secret::new("pw1")).unwrap();
        let second = manager.hash_password(&Secret::new("pw2")).unwrap();

        let account = AccountBuilder::new()
            .email(EmailAddress::parse("alice@x.com").unwrap())
            .password(first.clone())
            .build();
        let mut account = store.create(account).await.unwrap();
        store
            .update_password(account.id, &first, &second)
            .await
            .unwrap();

        // Saving a snapshot read before the change keeps the new hash.
        account.profile_image = Some("alice.png".into());
        store.save(&account).await.unwrap();
        let err = store
            .update_password(account.id, &first, &second)
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::InvalidCredentials));

        let found = store.find_by_id(account.id).await.unwrap().unwrap();
        assert_eq!(found.profile_image.as_deref(), Some("alice.png"));
        let AuthMarker::LocalHash(stored) = &found.auth else {
            panic!("alice must stay a local account");
        };
        assert!(manager.verify_password(&Secret::new("pw2"), stored));

        let bob = store.create(federated("bob@x.com")).await.unwrap();
        let err = store
            .update_password(bob.id, &first, &second)
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::FederatedAccountImmutable));
    }

    #[sqlx::test]
    async fn test_delete_missing(pool: PgPool) {
        let store = PgCredentialStore::new(pool);
        let err = store.delete(AccountId::new(404)).await.unwrap_err();
        assert!(matches!(err, ServerError::AccountNotFound));

        let err = store
            .save(&federated("ghost@x.com").with_id(AccountId::new(404)))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::AccountNotFound));
    }
}
