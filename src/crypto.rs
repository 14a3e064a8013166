//! Password hashing with Argon2id and PHC strings.

use argon2::password_hash::{
    PasswordHash as PhcHash, PasswordHasher, PasswordVerifier, SaltString,
};
use argon2::{Argon2, Params, Version};
use rand::rngs::OsRng;

use crate::account::{PasswordHash, Secret};
use crate::config::Argon2 as ArgonConfig;

type Result<T> = std::result::Result<T, CryptoError>;

#[derive(thiserror::Error, Debug)]
pub enum CryptoError {
    #[error("argon2 error: {0}")]
    Argon2(String),
    #[error("hashing task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Password manager that uses Argon2id and PHC string format for hashing and
/// verification.
#[derive(Clone)]
pub struct PasswordManager {
    params: Params,
}

impl PasswordManager {
    /// Create a new [`PasswordManager`].
    pub fn new(config: Option<ArgonConfig>) -> Result<Self> {
        let config = config.unwrap_or_default();

        let params = Params::new(
            config.memory_cost,
            config.iterations,
            config.parallelism,
            Some(config.hash_length),
        )
        .map_err(|err| CryptoError::Argon2(err.to_string()))?;

        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'_> {
        Argon2::new(
            argon2::Algorithm::Argon2id,
            Version::V0x13,
            self.params.clone(),
        )
    }

    /// Hash password using Argon2id with a fresh random salt.
    pub fn hash_password(&self, password: &Secret) -> Result<PasswordHash> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()
            .hash_password(password.expose().as_bytes(), &salt)
            .map_err(|e| CryptoError::Argon2(e.to_string()))?;

        PasswordHash::parse(hash.to_string())
            .map_err(|e| CryptoError::Argon2(e.to_string()))
    }

    /// Verify password against a PHC string.
    ///
    /// Digest comparison is done in constant time by `argon2`.
    pub fn verify_password(&self, password: &Secret, hash: &PasswordHash) -> bool {
        let Ok(parsed) = PhcHash::new(hash.as_phc()) else {
            return false;
        };

        self.argon2()
            .verify_password(password.expose().as_bytes(), &parsed)
            .is_ok()
    }

    /// Same as [`PasswordManager::hash_password`], off the async workers.
    pub async fn hash(&self, password: Secret) -> Result<PasswordHash> {
        let manager = self.clone();
        tokio::task::spawn_blocking(move || manager.hash_password(&password))
            .await?
    }

    /// Same as [`PasswordManager::verify_password`], off the async workers.
    pub async fn verify(
        &self,
        password: Secret,
        hash: PasswordHash,
    ) -> Result<bool> {
        let manager = self.clone();
        Ok(tokio::task::spawn_blocking(move || {
            manager.verify_password(&password, &hash)
        })
        .await?)
    }
}

#[cfg(test)]
pub(crate) fn test_manager() -> PasswordManager {
    PasswordManager::new(Some(ArgonConfig {
        memory_cost: 1024,
        iterations: 1,
        parallelism: 1,
        hash_length: 32,
    }))
    .unwrap()
}
