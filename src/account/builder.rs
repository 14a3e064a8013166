//! Typed builder for [`NewAccount`].

use crate::account::{AuthMarker, DisplayName, EmailAddress, NewAccount, PasswordHash};

/// Value is missing on [`AccountBuilder`].
#[derive(Debug, Clone)]
pub struct Missing;

/// Value is present on [`AccountBuilder`].
#[derive(Debug, Clone)]
pub struct Present<T>(pub T);

/// A builder to track presence of `email` and of the authentication marker.
///
/// Only a builder holding both can produce a [`NewAccount`].
#[derive(Debug, Clone)]
pub struct AccountBuilder<Email, Auth> {
    email: Email,
    auth: Auth,
    display_name: Option<DisplayName>,
    profile_image: Option<String>,
}

impl AccountBuilder<Missing, Missing> {
    /// Create a new [`AccountBuilder`].
    pub fn new() -> Self {
        Self {
            email: Missing,
            auth: Missing,
            display_name: None,
            profile_image: None,
        }
    }
}

impl Default for AccountBuilder<Missing, Missing> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Auth> AccountBuilder<Missing, Auth> {
    /// Update `email` field on [`AccountBuilder`].
    pub fn email(
        self,
        email: EmailAddress,
    ) -> AccountBuilder<Present<EmailAddress>, Auth> {
        AccountBuilder {
            email: Present(email),
            auth: self.auth,
            display_name: self.display_name,
            profile_image: self.profile_image,
        }
    }
}

impl<Email> AccountBuilder<Email, Missing> {
    /// Local-password account.
    pub fn password(
        self,
        hash: PasswordHash,
    ) -> AccountBuilder<Email, Present<AuthMarker>> {
        self.auth(AuthMarker::LocalHash(hash))
    }

    /// Account imported from the identity provider.
    pub fn federated(self) -> AccountBuilder<Email, Present<AuthMarker>> {
        self.auth(AuthMarker::FederatedDelegate)
    }

    fn auth(self, marker: AuthMarker) -> AccountBuilder<Email, Present<AuthMarker>> {
        AccountBuilder {
            email: self.email,
            auth: Present(marker),
            display_name: self.display_name,
            profile_image: self.profile_image,
        }
    }
}

impl<Email, Auth> AccountBuilder<Email, Auth> {
    /// Update `display_name` field on [`AccountBuilder`].
    pub fn display_name(mut self, display_name: Option<DisplayName>) -> Self {
        self.display_name = display_name;
        self
    }

    /// Update `profile_image` field on [`AccountBuilder`].
    ///
    /// An empty reference means no image.
    pub fn profile_image(mut self, profile_image: Option<String>) -> Self {
        self.profile_image = profile_image.filter(|image| !image.is_empty());
        self
    }
}

impl AccountBuilder<Present<EmailAddress>, Present<AuthMarker>> {
    /// Build a [`NewAccount`].
    pub fn build(self) -> NewAccount {
        let AccountBuilder {
            email: Present(email),
            auth: Present(auth),
            display_name,
            profile_image,
        } = self;

        NewAccount {
            email,
            auth,
            display_name,
            profile_image,
            created_at: chrono::Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let account = AccountBuilder::new()
            .profile_image(Some(String::new()))
            .email(EmailAddress::parse("bob@x.com").unwrap())
            .federated()
            .build();

        assert!(account.auth.is_federated());
        assert_eq!(account.email.as_str(), "bob@x.com");
        assert_eq!(account.profile_image, None);
        assert_eq!(account.display_name, None);
    }
}
