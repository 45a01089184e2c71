use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;
use crate::shared_types::{SessionId, SessionState};

// -----------------------------------------------------------------------------
// ----- Result ----------------------------------------------------------------

pub type Result<T> = std::result::Result<T, Error>;

// -----------------------------------------------------------------------------
// ----- Error -----------------------------------------------------------------

#[derive(Debug, Error)]
pub enum Error {
    /// Transport or handshake failure; carries the underlying cause.
    #[error("connection error: {0}")]
    Connection(#[source] std::io::Error),

    /// The server certificate was rejected.
    #[error("unauthorized connection: {0}")]
    UnauthorizedConnection(String),

    /// The server answered the login command with something other than the
    /// acknowledgment. Carries the raw server text, terminator stripped.
    #[error("login failed: {0}")]
    LoginFailure(String),

    #[error("no connection was ever established")]
    NoConnection,

    #[error("timed out after {0:?} waiting for a pooled session")]
    AcquireTimeout(Duration),

    #[error("pool is closed")]
    PoolClosed,

    #[error("session {id} is {state}, operation not permitted")]
    InvalidState { id: SessionId, state: SessionState },

    #[error("no response within {0:?}")]
    ReadTimeout(Duration),

    #[error("response is not valid utf-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),

    #[error("tls setup failed: {0}")]
    Tls(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    pub(crate) fn invalid_state(id: &SessionId, state: SessionState) -> Self {
        Error::InvalidState {
            id: id.clone(),
            state,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
