//! Transport layer: how a session gets its encrypted byte stream.
//! Everything above this module only sees `BoxedTransport`.

pub mod connector;

pub use connector::{BoxedTransport, Connector, TlsConnector, Transport};
