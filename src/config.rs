//! Configuration manager.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::FromRef;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::AppState;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const DEFAULT_PORT: u16 = 8080;
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// Instance name.
    pub name: String,
    /// Public URL of current instance.
    pub url: String,
    /// Listening port.
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    version: String,
    #[serde(skip)]
    path: PathBuf,
    /// Related to PostgreSQL configuration.
    /// Accounts are kept in memory when absent.
    #[serde(skip_serializing)]
    pub postgres: Option<Postgres>,
    /// Related to Argon2 configuration.
    #[serde(skip_serializing)]
    pub argon2: Option<Argon2>,
    /// Related to the federated identity provider.
    #[serde(skip_serializing)]
    pub federation: Option<Federation>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            name: env!("CARGO_CRATE_NAME").to_owned(),
            url: String::default(),
            port: DEFAULT_PORT,
            version: VERSION.to_owned(),
            path: PathBuf::default(),
            postgres: None,
            argon2: None,
            federation: None,
        }
    }
}

/// PostgreSQL configuration.
#[derive(Debug, Default, PartialEq, Clone, Serialize, Deserialize)]
pub struct Postgres {
    /// Hostname:(?port) for PostgreSQL instance.
    pub address: String,
    /// Database name.
    pub database: Option<String>,
    /// Username credential to connect.
    pub username: Option<String>,
    /// Password credential to connect.
    pub password: Option<String>,
    /// Maximum pool connections.
    pub pool_size: Option<u32>,
}

/// Argon2 configuration.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Argon2 {
    /// Memory used while hashing, in KiB.
    pub memory_cost: u32,
    /// Iterations of hash.
    pub iterations: u32,
    /// Parallelism degree.
    pub parallelism: u32,
    /// Output hash length.
    pub hash_length: usize,
}

impl Default for Argon2 {
    fn default() -> Self {
        Self {
            memory_cost: 1024 * 64, // 64 MiB.
            iterations: 4,
            parallelism: 2,
            hash_length: 32,
        }
    }
}

/// Federated identity provider configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Federation {
    /// Roster endpoint, e.g.
    /// `https://identitytoolkit.googleapis.com/v1/projects/<id>/accounts:batchGet`.
    pub endpoint: String,
    /// Entries requested per page.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Environment variable holding the provider bearer credential.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    /// HTTP timeout for one page, in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Request timeout of `POST /federation/sync`, in seconds.
    #[serde(default = "default_sync_timeout")]
    pub sync_timeout: u64,
    /// Run a synchronization every N seconds. Disabled when absent.
    pub sync_interval: Option<u64>,
    /// Bearer key required by `POST /federation/sync`.
    pub sync_key: Option<String>,
}

fn default_page_size() -> u32 {
    1000
}

fn default_token_env() -> String {
    "FEDERATION_TOKEN".to_owned()
}

fn default_timeout() -> u64 {
    30
}

/// Default request timeout of `POST /federation/sync`, in seconds.
pub const DEFAULT_SYNC_TIMEOUT: u64 = 600;

fn default_sync_timeout() -> u64 {
    DEFAULT_SYNC_TIMEOUT
}

impl FromRef<AppState> for Arc<Configuration> {
    fn from_ref(state: &AppState) -> Arc<Configuration> {
        Arc::clone(&state.config)
    }
}

impl Configuration {
    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    /// Normalizes a URL string by ensuring it starts with a valid scheme
    /// (`http` or `https`).
    fn normalize_url(&self, url: &str) -> Result<String, url::ParseError> {
        let url_with_scheme =
            if url.starts_with("http://") || url.starts_with("https://") {
                url.to_string()
            } else {
                format!("https://{url}")
            };

        let parsed_url = Url::parse(&url_with_scheme)?;
        Ok(parsed_url.to_string())
    }

    /// Reads the `config.yaml` file from the specified path or the default
    /// location.
    pub fn read(self) -> Result<Arc<Self>, url::ParseError> {
        let file_path = if self.path.is_file() {
            &self.path
        } else {
            &Path::new(DEFAULT_CONFIG_PATH).to_path_buf()
        };

        match File::open(file_path) {
            Ok(file) => {
                let config: Configuration = match serde_yaml::from_reader(file)
                {
                    Ok(config) => config,
                    Err(err) => {
                        return Ok(Arc::new(self.error(err)));
                    },
                };

                Ok(Arc::new(self.normalize(config)?))
            },
            Err(err) => Ok(Arc::new(self.error(err))),
        }
    }

    /// Parse a configuration from a YAML string.
    pub fn from_yaml(self, yaml: &str) -> Result<Self, ConfigError> {
        let config: Configuration = serde_yaml::from_str(yaml)?;
        Ok(self.normalize(config)?)
    }

    fn normalize(
        &self,
        mut config: Configuration,
    ) -> Result<Self, url::ParseError> {
        // set app version.
        config.version = VERSION.to_owned();

        // normalize URLs.
        if !config.url.is_empty() {
            config.url = self.normalize_url(&config.url)?;
        }
        if let Some(federation) = config.federation.as_mut() {
            federation.endpoint = self.normalize_url(&federation.endpoint)?;
        }

        Ok(config)
    }

    /// Return a default configuration as fallback.
    fn error(&self, err: impl std::error::Error) -> Self {
        tracing::error!(error = %err, "`config.yaml` file not found or invalid");
        Self::default()
    }

    pub fn version(&self) -> &str {
        &self.version
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
    #[error(transparent)]
    Url(#[from] url::ParseError),
}
