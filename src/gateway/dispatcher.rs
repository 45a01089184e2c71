use bytes::Bytes;
use secrecy::SecretString;
use std::sync::Arc;
use tracing::{debug, info};

use super::pool::{POOL_MAX, Pool, PoolConfig, PoolStats, PooledSession};
use super::rate_limiter::RateLimiter;
use crate::backend::{Credentials, SessionFactory, SessionSettings};
use crate::config::ClientConfig;
use crate::errors::{Error, Result};
use crate::net::{Connector, TlsConnector};
use crate::tls;
use crate::wire_protocol::{TERMINATOR, strip_terminator};

// -----------------------------------------------------------------------------
// ----- Response --------------------------------------------------------------

/// One complete frame received in answer to a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    frame: Bytes,
    terminator: u8,
}

impl Response {
    pub fn new(frame: Bytes, terminator: u8) -> Self {
        Self { frame, terminator }
    }

    /// Raw bytes as received, terminator included.
    pub fn frame(&self) -> &Bytes {
        &self.frame
    }

    /// Response body without the terminator.
    pub fn payload(&self) -> &[u8] {
        strip_terminator(&self.frame, self.terminator)
    }

    pub fn as_str(&self) -> Result<&str> {
        Ok(std::str::from_utf8(self.payload())?)
    }
}

// -----------------------------------------------------------------------------
// ----- Dispatcher ------------------------------------------------------------

/// Public entry point: every command waits for a rate-limit token, borrows
/// a pooled session, does one write/read exchange and gives the session
/// back.
#[derive(Debug)]
pub struct Dispatcher {
    limiter: RateLimiter,
    pool: Arc<Pool>,
}

// -----------------------------------------------------------------------------
// ----- Dispatcher: Static ----------------------------------------------------

impl Dispatcher {
    /// Connect to `config.host:config.port` over TLS. Must be called from
    /// within a tokio runtime; the pool starts warming up immediately.
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let tls = tls::client_config(config.ca_file.as_deref())?;
        let connector = TlsConnector::new(&config.host, config.port, tls)?;
        Self::with_connector(config, Arc::new(connector))
    }

    /// Same as [`new`](Self::new) with a caller-supplied transport.
    pub fn with_connector(config: ClientConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        config.validate()?;

        let settings = SessionSettings {
            client_name: config.client_name.clone(),
            client_version: config.client_version.clone(),
            terminator: TERMINATOR,
            read_timeout: config.read_timeout,
        };

        let credentials = config.credentials().map(|(username, password)| Credentials {
            username: username.to_string(),
            password: SecretString::new(password.to_string().into_boxed_str()),
        });

        let pool_config = PoolConfig {
            min: config.pool_min as usize,
            max: POOL_MAX,
            acquire_timeout: config.pool_timeout,
            idle_timeout: config.idle_timeout,
            sweep_interval: config.sweep_interval,
        };

        let peer = connector.describe();
        let factory = SessionFactory::new(connector, settings, credentials);
        let limiter = RateLimiter::new(config.rate_limit, config.rate_interval);
        let pool = Pool::new(factory, pool_config);

        info!(
            peer = %peer,
            rate_limit = limiter.capacity(),
            rate_interval = ?limiter.interval(),
            pool_min = pool.config().min,
            pool_max = pool.config().max,
            "starting dispatcher"
        );

        Ok(Self { limiter, pool })
    }
}

// -----------------------------------------------------------------------------
// ----- Dispatcher: Public ----------------------------------------------------

impl Dispatcher {
    /// Send one command and wait for its response.
    pub async fn send(&self, command: &str) -> Result<Response> {
        if self.pool.is_closed() {
            return Err(Error::PoolClosed);
        }

        self.limiter.acquire().await;

        let mut pooled = self.pool.acquire().await?;
        let result = exchange(&mut pooled, command).await;
        self.pool.release(pooled).await;

        result
    }

    /// Drain the pool and close every session. Subsequent `send` calls fail
    /// with `PoolClosed`. Every session is closed even if one close fails;
    /// the first failure is returned.
    pub async fn destroy(&self) -> Result<()> {
        self.pool.drain_and_clear().await
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: Helpers -----------------------------------------------------

async fn exchange(pooled: &mut PooledSession, command: &str) -> Result<Response> {
    let session = pooled.session();
    debug!(session = %session.id(), "dispatching command");

    session.write(command).await?;
    let frame = session.read().await?;

    Ok(Response::new(frame, session.terminator()))
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
