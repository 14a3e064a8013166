//! Account entity and its credential store.

mod builder;
mod memory;
mod password;
mod postgres;
mod repository;

pub use builder::*;
pub use memory::*;
pub use password::*;
pub use postgres::*;
pub use repository::*;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ServerError};

/// Local account identifier. Assigned by the store, never reused.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct AccountId(i64);

impl AccountId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Value object of a usable email address.
///
/// Stored and compared exactly as received: no case folding, no trimming.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct EmailAddress(String);

impl EmailAddress {
    /// Converts a [`String`] into an [`EmailAddress`].
    ///
    /// Returns `None` when the value cannot key an account: blank, no `@`,
    /// more than one `@` or an empty local part or domain.
    pub fn parse(email: impl Into<String>) -> Option<Self> {
        let email = email.into();
        if email.trim().is_empty() {
            return None;
        }

        match email.split_once('@') {
            Some((local, domain))
                if !local.is_empty()
                    && !domain.is_empty()
                    && !domain.contains('@') =>
            {
                Some(Self(email))
            },
            _ => None,
        }
    }

    /// Returns the same string as a string slice `&str`.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for EmailAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Given and family name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayName {
    pub given: String,
    pub family: String,
}

impl DisplayName {
    pub fn new(given: impl Into<String>, family: impl Into<String>) -> Self {
        Self {
            given: given.into(),
            family: family.into(),
        }
    }

    /// Split a provider's free-text display name on its first whitespace.
    ///
    /// `"Bob Lee"` gives `Bob`/`Lee`, `"Cher"` gives `Cher`/``. Blank input
    /// gives `None`.
    pub fn from_full_name(full_name: &str) -> Option<Self> {
        let full_name = full_name.trim();
        if full_name.is_empty() {
            return None;
        }

        Some(match full_name.split_once(char::is_whitespace) {
            Some((given, family)) => Self::new(given, family.trim_start()),
            None => Self::new(full_name, ""),
        })
    }

    /// Build from optional register fields. `None` when both are blank.
    pub fn from_parts(
        given: Option<String>,
        family: Option<String>,
    ) -> Option<Self> {
        let given = given.unwrap_or_default();
        let family = family.unwrap_or_default();

        if given.trim().is_empty() && family.trim().is_empty() {
            None
        } else {
            Some(Self { given, family })
        }
    }
}

/// How an account authenticates.
#[derive(Debug, Clone)]
pub enum AuthMarker {
    /// Salted hash owned by this service.
    LocalHash(PasswordHash),
    /// No usable local credential; the identity provider authenticates.
    FederatedDelegate,
}

impl AuthMarker {
    pub fn is_federated(&self) -> bool {
        matches!(self, AuthMarker::FederatedDelegate)
    }

    /// Label used in logs and metrics.
    pub fn method(&self) -> &'static str {
        match self {
            AuthMarker::LocalHash(_) => "password",
            AuthMarker::FederatedDelegate => "federated",
        }
    }
}

/// Account as saved on the credential store.
#[derive(Debug, Clone)]
pub struct Account {
    pub id: AccountId,
    pub email: EmailAddress,
    pub auth: AuthMarker,
    pub display_name: Option<DisplayName>,
    pub profile_image: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Replace the local password hash.
    ///
    /// Federated accounts never acquire a local credential.
    pub fn replace_password(&mut self, hash: PasswordHash) -> Result<()> {
        match &mut self.auth {
            AuthMarker::LocalHash(current) => {
                *current = hash;
                Ok(())
            },
            AuthMarker::FederatedDelegate => {
                Err(ServerError::FederatedAccountImmutable)
            },
        }
    }

    /// Public projection of the account.
    pub fn view(&self) -> AccountView {
        let (name, surname) = match &self.display_name {
            Some(display_name) => (
                Some(display_name.given.clone()),
                Some(display_name.family.clone()),
            ),
            None => (None, None),
        };

        AccountView {
            id: self.id,
            email: self.email.to_string(),
            name,
            surname,
            profile_image: self.profile_image.clone(),
        }
    }
}

/// Account data before the store assigns an identifier.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub email: EmailAddress,
    pub auth: AuthMarker,
    pub display_name: Option<DisplayName>,
    pub profile_image: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NewAccount {
    /// Attach the identifier given by the store.
    pub fn with_id(self, id: AccountId) -> Account {
        Account {
            id,
            email: self.email,
            auth: self.auth,
            display_name: self.display_name,
            profile_image: self.profile_image,
            created_at: self.created_at,
        }
    }
}

/// What `GET /profile/{id}` shows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountView {
    pub id: AccountId,
    pub email: String,
    pub name: Option<String>,
    pub surname: Option<String>,
    pub profile_image: Option<String>,
}
