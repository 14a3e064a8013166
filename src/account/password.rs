//! Password logic.

use zeroize::Zeroizing;

/// Plain secret supplied by a caller. Wiped from memory on drop.
#[derive(Clone)]
pub struct Secret(Zeroizing<String>);

impl Secret {
    /// Create a new [`Secret`].
    pub fn new(value: impl Into<String>) -> Self {
        Self(Zeroizing::new(value.into()))
    }

    /// Borrow the plaintext. Only hashing code should call this.
    pub(crate) fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secret").field("value", &"[REDACTED]").finish()
    }
}

/// A salted password hash in PHC format.
///
/// Deliberately no `PartialEq<str>`: a hash is only ever checked through
/// [`crate::crypto::PasswordManager::verify_password`].
#[derive(Clone)]
pub struct PasswordHash(String);

impl PasswordHash {
    /// Converts a [`String`] into a valid [`PasswordHash`].
    ///
    /// # Errors
    ///
    /// Returns `Err` if the string is not in PHC format.
    pub fn parse(
        phc_string: impl Into<String>,
    ) -> Result<Self, argon2::password_hash::Error> {
        let phc = phc_string.into();
        argon2::password_hash::PasswordHash::new(&phc)?;

        Ok(Self(phc))
    }

    /// PHC string, as persisted.
    #[inline]
    pub(crate) fn as_phc(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for PasswordHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordHash")
            .field("phc_string", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_phc() {
        let phc = "$argon2id$v=19$m=1024,t=1,p=1$c29tZXNhbHQ$RdescudvJCsgt3ub+b+dWRWJTmaaJObG";
        assert!(PasswordHash::parse(phc).is_ok());
        assert!(PasswordHash::parse("pw1").is_err());
        assert!(PasswordHash::parse("").is_err());
    }

    #[test]
    fn test_redacted_debug() {
        let secret = Secret::new("hunter2");
        assert!(!format!("{secret:?}").contains("hunter2"));
    }
}
