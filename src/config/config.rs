use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;
use tokio::fs;

use super::types::de_duration;
use crate::gateway::pool::POOL_MAX;

// -----------------------------------------------------------------------------
// ----- Defaults --------------------------------------------------------------

pub const DEFAULT_HOST: &str = "api.vndb.org";
pub const DEFAULT_PORT: u16 = 19535;
pub const DEFAULT_CLIENT_NAME: &str = "vndbpool";

const DEFAULT_RATE_LIMIT: u32 = 10;
const DEFAULT_RATE_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_POOL_MIN: u32 = 1;
const DEFAULT_POOL_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(10);

// -----------------------------------------------------------------------------
// ----- ClientConfig ----------------------------------------------------------

/// Everything a [`Dispatcher`](crate::Dispatcher) needs. The pool's upper
/// bound is not here: the server allows at most [`POOL_MAX`] connections per
/// client.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,

    /// Prefix of every session id; the id is sent as the login `client`.
    pub client_name: String,
    pub client_version: String,

    /// At most `rate_limit` commands per `rate_interval`.
    pub rate_limit: u32,
    pub rate_interval: Duration,

    pub username: Option<String>,
    pub password: Option<SecretString>,

    pub pool_min: u32,
    pub pool_timeout: Duration,
    pub idle_timeout: Duration,
    pub sweep_interval: Duration,

    /// `None` waits for a response forever.
    pub read_timeout: Option<Duration>,

    /// Extra PEM trust anchors on top of the public roots.
    pub ca_file: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            client_name: DEFAULT_CLIENT_NAME.to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            rate_limit: DEFAULT_RATE_LIMIT,
            rate_interval: DEFAULT_RATE_INTERVAL,
            username: None,
            password: None,
            pool_min: DEFAULT_POOL_MIN,
            pool_timeout: DEFAULT_POOL_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            read_timeout: None,
            ca_file: None,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- ClientConfig: Static --------------------------------------------------

impl ClientConfig {
    pub async fn from_file(path: &Path) -> Result<ClientConfig, ConfigError> {
        let raw = fs::read_to_string(path).await.map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<ClientConfig, ConfigError> {
        let doc: ClientFile = toml::from_str(raw).map_err(|e| ConfigError::Toml { source: e })?;

        let defaults = ClientConfig::default();
        let cfg = ClientConfig {
            host: doc.host.unwrap_or(defaults.host),
            port: doc.port.unwrap_or(defaults.port),
            client_name: doc.client_name.unwrap_or(defaults.client_name),
            client_version: doc.client_version.unwrap_or(defaults.client_version),
            rate_limit: doc.rate_limit.unwrap_or(defaults.rate_limit),
            rate_interval: doc.rate_interval.unwrap_or(defaults.rate_interval),
            username: doc.username,
            password: doc
                .password
                .map(|p| SecretString::new(p.into_boxed_str())),
            pool_min: doc.pool_min.unwrap_or(defaults.pool_min),
            pool_timeout: doc.pool_timeout.unwrap_or(defaults.pool_timeout),
            idle_timeout: doc.idle_timeout.unwrap_or(defaults.idle_timeout),
            sweep_interval: doc.sweep_interval.unwrap_or(defaults.sweep_interval),
            read_timeout: doc.read_timeout,
            ca_file: doc.ca_file,
        };

        cfg.validate()?;
        Ok(cfg)
    }
}

// -----------------------------------------------------------------------------
// ----- ClientConfig: Public --------------------------------------------------

impl ClientConfig {
    pub fn with_credentials(mut self, username: impl Into<String>, password: &str) -> Self {
        self.username = Some(username.into());
        self.password = Some(SecretString::new(password.to_string().into_boxed_str()));
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::invalid("host", "must not be empty"));
        }
        if self.client_name.trim().is_empty() {
            return Err(ConfigError::invalid("client_name", "must not be empty"));
        }
        if self.rate_limit == 0 {
            return Err(ConfigError::invalid("rate_limit", "must be at least 1"));
        }
        if self.rate_interval.is_zero() {
            return Err(ConfigError::invalid("rate_interval", "must be positive"));
        }
        if self.pool_min as usize > POOL_MAX {
            return Err(ConfigError::invalid(
                "pool_min",
                format!("must not exceed {POOL_MAX}"),
            ));
        }
        if self.pool_timeout.is_zero() {
            return Err(ConfigError::invalid("pool_timeout", "must be positive"));
        }
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::invalid("sweep_interval", "must be positive"));
        }

        match (&self.username, &self.password) {
            (Some(_), Some(_)) | (None, None) => Ok(()),
            _ => Err(ConfigError::CredentialsPairing),
        }
    }

    /// `(username, password)` when both are configured.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => Some((user.as_str(), pass.expose_secret())),
            _ => None,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: On-disk format ----------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ClientFile {
    #[serde(default)]
    host: Option<String>,

    #[serde(default)]
    port: Option<u16>,

    #[serde(default)]
    client_name: Option<String>,

    #[serde(default)]
    client_version: Option<String>,

    #[serde(default, alias = "rateLimit")]
    rate_limit: Option<u32>,

    #[serde(default, alias = "rateInterval", deserialize_with = "de_duration")]
    rate_interval: Option<Duration>,

    #[serde(default)]
    username: Option<String>,

    #[serde(default)]
    password: Option<String>,

    #[serde(default, alias = "poolMin")]
    pool_min: Option<u32>,

    #[serde(default, alias = "poolTimeout", deserialize_with = "de_duration")]
    pool_timeout: Option<Duration>,

    #[serde(default, deserialize_with = "de_duration")]
    idle_timeout: Option<Duration>,

    #[serde(default, deserialize_with = "de_duration")]
    sweep_interval: Option<Duration>,

    #[serde(default, deserialize_with = "de_duration")]
    read_timeout: Option<Duration>,

    #[serde(default)]
    ca_file: Option<PathBuf>,
}

// -----------------------------------------------------------------------------
// ----- Errors ----------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid field '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("username and password must be given together")]
    CredentialsPairing,

    #[error("read error for {path:?}: {source}")]
    Io {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error("toml parse error: {source}")]
    Toml { source: toml::de::Error },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
