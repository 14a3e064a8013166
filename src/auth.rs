//! Local registration and dual-path login.

use std::sync::Arc;

use crate::account::{
    AccountBuilder, AccountId, AuthMarker, CredentialStore, DisplayName,
    EmailAddress, Secret,
};
use crate::crypto::PasswordManager;
use crate::error::{Result, ServerError};
use crate::telemetry;

/// Data required to open a local-password account.
#[derive(Debug, Clone)]
pub struct Registration {
    pub email: String,
    pub password: Secret,
    pub name: Option<String>,
    pub surname: Option<String>,
    pub profile_image: Option<String>,
}

/// Successful login.
#[derive(Debug, Clone)]
pub struct AuthResult {
    pub id: AccountId,
    pub display_name: Option<DisplayName>,
    /// `password` or `federated`.
    pub method: &'static str,
}

/// Authentication service.
#[derive(Clone)]
pub struct Authenticator {
    store: Arc<dyn CredentialStore>,
    passwords: PasswordManager,
}

impl Authenticator {
    pub fn new(store: Arc<dyn CredentialStore>, passwords: PasswordManager) -> Self {
        Self { store, passwords }
    }

    /// Open a local-password account.
    pub async fn register(&self, registration: Registration) -> Result<AccountId> {
        let email = EmailAddress::parse(registration.email)
            .ok_or_else(|| ServerError::missing_field("email"))?;
        if registration.password.expose().is_empty() {
            return Err(ServerError::missing_field("password"));
        }

        let hash = self.passwords.hash(registration.password).await?;
        let account = AccountBuilder::new()
            .email(email)
            .password(hash)
            .display_name(DisplayName::from_parts(
                registration.name,
                registration.surname,
            ))
            .profile_image(registration.profile_image)
            .build();

        let account = self.store.create(account).await.inspect_err(|err| {
            if matches!(err, ServerError::DuplicateEmail) {
                tracing::debug!("registration refused, email already used");
            }
        })?;

        tracing::info!(account_id = %account.id, "local account created");
        Ok(account.id)
    }

    /// Authenticate `email` with `secret`.
    ///
    /// Federated accounts are accepted without looking at `secret`: the
    /// identity provider already authenticated the caller. Local accounts
    /// must present a secret matching their stored hash.
    pub async fn login(&self, email: &str, secret: Secret) -> Result<AuthResult> {
        let account = match EmailAddress::parse(email) {
            Some(email) => self.store.find_by_email(&email).await?,
            None => None,
        };

        let Some(account) = account else {
            tracing::info!(reason = "not_found", "login refused");
            telemetry::record_login("unknown", "not_found");
            return Err(ServerError::AccountNotFound);
        };

        let method = account.auth.method();
        match &account.auth {
            AuthMarker::FederatedDelegate => {},
            AuthMarker::LocalHash(hash) => {
                if !self.passwords.verify(secret, hash.clone()).await? {
                    tracing::info!(
                        account_id = %account.id,
                        reason = "password_mismatch",
                        "login refused"
                    );
                    telemetry::record_login(method, "invalid_credentials");
                    return Err(ServerError::InvalidCredentials);
                }
            },
        }

        tracing::info!(account_id = %account.id, method, "login succeeded");
        telemetry::record_login(method, "success");

        Ok(AuthResult {
            id: account.id,
            display_name: account.display_name,
            method,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::MemoryCredentialStore;
    use crate::crypto::test_manager;

    fn service() -> (Authenticator, MemoryCredentialStore) {
        let store = MemoryCredentialStore::new();
        (
            Authenticator::new(Arc::new(store.clone()), test_manager()),
            store,
        )
    }

    fn alice() -> Registration {
        Registration {
            email: "alice@x.com".into(),
            password: Secret::new("pw1"),
            name: Some("Alice".into()),
            surname: Some("Liddell".into()),
            profile_image: Some(String::new()),
        }
    }

    #[tokio::test]
    async fn test_register_and_login() {
        let (auth, store) = service();
        let id = auth.register(alice()).await.unwrap();

        let result = auth.login("alice@x.com", Secret::new("pw1")).await.unwrap();
        assert_eq!(result.id, id);
        assert_eq!(result.method, "password");
        assert_eq!(
            result.display_name,
            Some(DisplayName::new("Alice", "Liddell"))
        );

        let account = store.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(account.profile_image, None);
    }

    #[tokio::test]
    async fn test_register_duplicate() {
        let (auth, store) = service();
        auth.register(alice()).await.unwrap();

        let err = auth.register(alice()).await.unwrap_err();
        assert!(matches!(err, ServerError::DuplicateEmail));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_register_missing_fields() {
        let (auth, store) = service();

        let mut registration = alice();
        registration.email = "not-an-email".into();
        let err = auth.register(registration).await.unwrap_err();
        assert!(matches!(err, ServerError::MissingFields(_)));

        let mut registration = alice();
        registration.password = Secret::new("");
        let err = auth.register(registration).await.unwrap_err();
        assert!(matches!(err, ServerError::MissingFields(_)));

        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_wrong_secrets_are_refused() {
        let (auth, store) = service();
        let id = auth.register(alice()).await.unwrap();
        let Some(AuthMarker::LocalHash(hash)) =
            store.find_by_id(id).await.unwrap().map(|a| a.auth)
        else {
            panic!("alice must be a local account");
        };

        for secret in [
            "pw2",
            "",
            "PW1",
            "pw1 ",
            "FEDERATED",
            "firebase",
            "null",
            hash.as_phc(),
        ] {
            let err = auth
                .login("alice@x.com", Secret::new(secret))
                .await
                .unwrap_err();
            assert!(
                matches!(err, ServerError::InvalidCredentials),
                "{secret:?} must not authenticate"
            );
        }
    }

    #[tokio::test]
    async fn test_unknown_account() {
        let (auth, _) = service();

        for email in ["ghost@x.com", "", "ghost"] {
            let err = auth.login(email, Secret::new("pw1")).await.unwrap_err();
            assert!(matches!(err, ServerError::AccountNotFound));
        }
    }

    #[tokio::test]
    async fn test_federated_login_ignores_secret() {
        let (auth, store) = service();
        let account = AccountBuilder::new()
            .email(EmailAddress::parse("bob@x.com").unwrap())
            .federated()
            .display_name(DisplayName::from_full_name("Bob Lee"))
            .build();
        let account = store.create(account).await.unwrap();

        for secret in ["", "anything", "pw1"] {
            let result =
                auth.login("bob@x.com", Secret::new(secret)).await.unwrap();
            assert_eq!(result.id, account.id);
            assert_eq!(result.method, "federated");
        }
    }

    #[tokio::test]
    async fn test_login_is_case_sensitive() {
        let (auth, _) = service();
        auth.register(alice()).await.unwrap();

        let err = auth
            .login("Alice@x.com", Secret::new("pw1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::AccountNotFound));
    }
}
