use std::fmt::Debug;
use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::rustls::{self, ClientConfig, pki_types::ServerName};
use tracing::debug;

use crate::errors::{Error, Result};

// -----------------------------------------------------------------------------
// ----- Transport -------------------------------------------------------------

pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

pub type BoxedTransport = Box<dyn Transport>;

// -----------------------------------------------------------------------------
// ----- Connector -------------------------------------------------------------

/// Produces transports for new sessions in two steps, matching the session's
/// `Connecting` and `Authorizing` states.
#[async_trait]
pub trait Connector: Send + Sync + Debug {
    /// Open the raw byte stream to the server.
    async fn open(&self) -> Result<BoxedTransport>;

    /// Secure a stream returned by `open`. Fails with
    /// `UnauthorizedConnection` when the peer's certificate is rejected.
    async fn authorize(&self, transport: BoxedTransport) -> Result<BoxedTransport>;

    /// `host:port`, for logs.
    fn describe(&self) -> String;
}

// -----------------------------------------------------------------------------
// ----- TlsConnector ----------------------------------------------------------

#[derive(Clone)]
pub struct TlsConnector {
    host: String,
    port: u16,
    server_name: ServerName<'static>,
    inner: tokio_rustls::TlsConnector,
}

impl Debug for TlsConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConnector")
            .field("host", &self.host)
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}

impl TlsConnector {
    pub fn new(host: &str, port: u16, tls: Arc<ClientConfig>) -> Result<Self> {
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| Error::Tls(format!("invalid server name {host:?}: {e}")))?;

        Ok(Self {
            host: host.to_string(),
            port,
            server_name,
            inner: tokio_rustls::TlsConnector::from(tls),
        })
    }
}

#[async_trait]
impl Connector for TlsConnector {
    async fn open(&self) -> Result<BoxedTransport> {
        let stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(Error::Connection)?;
        stream.set_nodelay(true).map_err(Error::Connection)?;

        Ok(Box::new(stream))
    }

    async fn authorize(&self, transport: BoxedTransport) -> Result<BoxedTransport> {
        match self.inner.connect(self.server_name.clone(), transport).await {
            Ok(stream) => Ok(Box::new(stream)),
            Err(err) => {
                debug!("tls handshake with {} failed: {err}", self.describe());
                Err(classify_handshake_error(err))
            }
        }
    }

    fn describe(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: Helpers -----------------------------------------------------

/// Certificate problems are authorization failures; everything else during
/// the handshake is a plain connection error.
fn classify_handshake_error(err: io::Error) -> Error {
    let rejected = err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>())
        .is_some_and(is_certificate_error);

    if rejected {
        Error::UnauthorizedConnection(err.to_string())
    } else {
        Error::Connection(err)
    }
}

fn is_certificate_error(err: &rustls::Error) -> bool {
    matches!(
        err,
        rustls::Error::InvalidCertificate(_)
            | rustls::Error::NoCertificatesPresented
            | rustls::Error::UnsupportedNameType
    )
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
