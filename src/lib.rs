//! Client for the VNDB TCP API.
//!
//! A [`Dispatcher`] owns a bounded pool of TLS sessions (at most
//! [`POOL_MAX`], the server's per-client ceiling) and a rate limiter. Each
//! [`Dispatcher::send`] waits for a rate-limit token, borrows a logged-in
//! session, writes the command, reads one terminator-delimited response and
//! returns the session to the pool.
//!
//! Building commands and parsing responses is left to the caller.

pub mod backend;
pub mod config;
pub mod errors;
pub mod gateway;
pub mod net;
pub mod shared_types;
pub mod tls;
pub mod wire_protocol;

pub use backend::{Session, SessionFactory, SessionSettings};
pub use config::{ClientConfig, ConfigError};
pub use errors::{Error, Result};
pub use gateway::{Dispatcher, POOL_MAX, Pool, PoolConfig, PoolStats, RateLimiter, Response};
pub use net::{BoxedTransport, Connector, TlsConnector};
pub use shared_types::{SessionId, SessionState};
