use bytes::{Bytes, BytesMut};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::errors::{Error, Result};
use crate::net::{BoxedTransport, Connector};
use crate::shared_types::{SessionId, SessionState};
use crate::wire_protocol::{LOGIN_ACK, LoginCommand, encode_frame, split_frame, strip_terminator};

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

const SCRATCH_CAPACITY_HINT: usize = 4096;

/// How long `destroy` waits for the server to close its side.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

// -----------------------------------------------------------------------------
// ----- SessionSettings -------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub client_name: String,
    pub client_version: String,
    pub terminator: u8,
    pub read_timeout: Option<Duration>,
}

// -----------------------------------------------------------------------------
// ----- Session ---------------------------------------------------------------

/// One authenticated, encrypted connection to the server.
///
/// Reads and writes are only allowed in [`SessionState::Ready`]. A session
/// never pipelines: each `write` must be followed by a completed `read`
/// before the next `write`.
pub struct Session {
    id: SessionId,
    state: SessionState,
    authenticated: bool,

    connector: Arc<dyn Connector>,
    settings: Arc<SessionSettings>,

    transport: Option<BoxedTransport>,
    ever_connected: bool,

    inbox: BytesMut,
    outbox: BytesMut,

    // Set while a response is outstanding. Left set if the read future is
    // dropped, which marks the stream as out of sync.
    awaiting_response: bool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("authenticated", &self.authenticated)
            .field("peer", &self.connector.describe())
            .finish_non_exhaustive()
    }
}

// -----------------------------------------------------------------------------
// ----- Session: Static -------------------------------------------------------

impl Session {
    pub fn new(connector: Arc<dyn Connector>, settings: Arc<SessionSettings>) -> Self {
        Self {
            id: SessionId::random(&settings.client_name),
            state: SessionState::Unconnected,
            authenticated: false,
            connector,
            settings,
            transport: None,
            ever_connected: false,
            inbox: BytesMut::with_capacity(SCRATCH_CAPACITY_HINT),
            outbox: BytesMut::with_capacity(SCRATCH_CAPACITY_HINT),
            awaiting_response: false,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Session: Accessors ----------------------------------------------------

impl Session {
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn terminator(&self) -> u8 {
        self.settings.terminator
    }

    pub fn peer(&self) -> String {
        self.connector.describe()
    }

    /// Safe to hand to another caller: logged in, and no response pending.
    pub fn is_reusable(&self) -> bool {
        self.state == SessionState::Ready && !self.awaiting_response
    }
}

// -----------------------------------------------------------------------------
// ----- Session: Public -------------------------------------------------------

impl Session {
    /// Open the transport and complete the TLS handshake. Leaves the session
    /// in `LoggingIn`; it is not usable for commands until [`login`](Self::login).
    pub async fn connect(&mut self) -> Result<()> {
        if self.state != SessionState::Unconnected {
            return Err(Error::invalid_state(&self.id, self.state));
        }

        debug!(session = %self.id, peer = %self.peer(), "connecting");
        self.state = SessionState::Connecting;
        let raw = match self.connector.open().await {
            Ok(raw) => raw,
            Err(err) => return Err(self.fail(err)),
        };

        self.state = SessionState::Authorizing;
        let secured = match self.connector.authorize(raw).await {
            Ok(secured) => secured,
            Err(err) => return Err(self.fail(err)),
        };

        self.transport = Some(secured);
        self.ever_connected = true;
        self.state = SessionState::LoggingIn;
        Ok(())
    }

    /// Run the login exchange. Anything but the exact acknowledgment fails
    /// with `LoginFailure` carrying the server's text, and closes the session.
    pub async fn login(&mut self, username: Option<&str>, password: Option<&str>) -> Result<()> {
        if self.state != SessionState::LoggingIn {
            return Err(Error::invalid_state(&self.id, self.state));
        }

        let line = LoginCommand::new(self.id.as_str(), &self.settings.client_version)
            .with_credentials(username, password)
            .to_line();

        self.send_frame(line.as_bytes()).await?;
        let frame = self.recv_frame().await?;

        let body = strip_terminator(&frame, self.settings.terminator);
        if body != LOGIN_ACK {
            let text = String::from_utf8_lossy(body).into_owned();
            debug!(session = %self.id, "login rejected: {text}");
            return Err(self.fail(Error::LoginFailure(text)));
        }

        self.authenticated = true;
        self.state = SessionState::Ready;
        debug!(session = %self.id, "logged in");
        Ok(())
    }

    /// Send `message` followed by the terminator.
    pub async fn write(&mut self, message: &str) -> Result<()> {
        self.ensure_idle_ready()?;
        trace!(session = %self.id, "-> {message}");
        self.send_frame(message.as_bytes()).await
    }

    /// Wait for the next complete frame. The returned bytes end with the
    /// terminator.
    pub async fn read(&mut self) -> Result<Bytes> {
        if self.state != SessionState::Ready {
            return Err(Error::invalid_state(&self.id, self.state));
        }
        self.recv_frame().await
    }

    /// Gracefully close the transport and wait for the server to close its
    /// side. Fails with `NoConnection` if [`connect`](Self::connect) never
    /// succeeded.
    pub async fn destroy(&mut self) -> Result<()> {
        if !self.ever_connected {
            self.state = SessionState::Closed;
            return Err(Error::NoConnection);
        }

        let Some(mut transport) = self.transport.take() else {
            // Already torn down after a transport error.
            self.state = SessionState::Closed;
            return Ok(());
        };

        self.state = SessionState::Closing;
        debug!(session = %self.id, "closing");

        if let Err(err) = transport.shutdown().await {
            self.state = SessionState::Closed;
            return Err(Error::Connection(err));
        }

        let mut scratch = [0u8; 512];
        let confirmed = timeout(CLOSE_GRACE, async {
            loop {
                match transport.read(&mut scratch).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => continue,
                }
            }
        })
        .await;

        if confirmed.is_err() {
            debug!(session = %self.id, "peer did not close within {CLOSE_GRACE:?}");
        }

        self.state = SessionState::Closed;
        debug!(session = %self.id, "closed");
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// ----- Session: Private ------------------------------------------------------

impl Session {
    fn ensure_idle_ready(&self) -> Result<()> {
        if self.state != SessionState::Ready || self.awaiting_response {
            return Err(Error::invalid_state(&self.id, self.state));
        }
        Ok(())
    }

    async fn send_frame(&mut self, message: &[u8]) -> Result<()> {
        self.outbox.clear();
        encode_frame(message, self.settings.terminator, &mut self.outbox);

        let Some(transport) = self.transport.as_mut() else {
            return Err(Error::invalid_state(&self.id, self.state));
        };

        let outbox = &self.outbox;
        let sent = match transport.write_all(outbox).await {
            Ok(()) => transport.flush().await,
            Err(err) => Err(err),
        };

        match sent {
            Ok(()) => Ok(()),
            Err(err) => Err(self.fail(Error::Connection(err))),
        }
    }

    async fn recv_frame(&mut self) -> Result<Bytes> {
        if self.awaiting_response {
            return Err(Error::invalid_state(&self.id, self.state));
        }
        self.awaiting_response = true;

        let received = match self.settings.read_timeout {
            Some(limit) => match timeout(limit, self.fill_until_frame()).await {
                Ok(res) => res,
                Err(_) => Err(Error::ReadTimeout(limit)),
            },
            None => self.fill_until_frame().await,
        };

        match received {
            Ok(frame) => {
                self.awaiting_response = false;
                trace!(session = %self.id, "<- {} bytes", frame.len());
                Ok(frame)
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    async fn fill_until_frame(&mut self) -> Result<Bytes> {
        let terminator = self.settings.terminator;
        loop {
            if let Some(frame) = split_frame(&mut self.inbox, terminator) {
                return Ok(frame);
            }

            let Some(transport) = self.transport.as_mut() else {
                return Err(Error::invalid_state(&self.id, self.state));
            };

            self.inbox.reserve(SCRATCH_CAPACITY_HINT);
            let n = transport
                .read_buf(&mut self.inbox)
                .await
                .map_err(Error::Connection)?;

            if n == 0 {
                return Err(Error::Connection(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "server closed the connection",
                )));
            }
        }
    }

    /// Drop the transport and move to `Closed`; returns `err` for chaining.
    fn fail(&mut self, err: Error) -> Error {
        debug!(session = %self.id, state = %self.state, "session failed: {err}");
        self.transport = None;
        self.inbox.clear();
        self.state = SessionState::Closed;
        err
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
