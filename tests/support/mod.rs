//! In-memory stand-in for the server, plugged in through `Connector`.

use async_trait::async_trait;
use bytes::BytesMut;
use parking_lot::Mutex;
use secrecy::SecretString;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf, duplex};
use tokio::time::{Instant, sleep};

use vndbpool::backend::{Credentials, SessionFactory, SessionSettings};
use vndbpool::wire_protocol::{TERMINATOR, split_frame, strip_terminator};
use vndbpool::{BoxedTransport, Connector, Error, Result};

// -----------------------------------------------------------------------------
// ----- Reply -----------------------------------------------------------------

/// What the mock server does with a command.
#[allow(dead_code)]
#[derive(Debug, Clone)]
pub enum Reply {
    /// Answer with this text plus the terminator.
    Text(String),
    /// Answer after a delay.
    Delayed(Duration, String),
    /// Answer in two writes, pausing in between.
    Split(String),
    /// Close the connection without answering.
    Hangup,
    /// Never answer.
    Silent,
}

pub type Responder = fn(&str) -> Reply;

#[allow(dead_code)]
pub fn reply_ok(_: &str) -> Reply {
    Reply::Text("results {\"items\":[],\"more\":false,\"num\":0}".into())
}

// -----------------------------------------------------------------------------
// ----- Received --------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Received {
    pub connection: usize,
    pub at: Instant,
    pub line: String,
}

// -----------------------------------------------------------------------------
// ----- MockConnector ---------------------------------------------------------

pub struct MockConnector {
    login_reply: String,
    responder: Responder,

    refuse: AtomicBool,
    fail_shutdown: AtomicBool,
    opened: AtomicUsize,
    closed: Arc<AtomicUsize>,

    logins: Arc<Mutex<Vec<Received>>>,
    commands: Arc<Mutex<Vec<Received>>>,
}

#[allow(dead_code)]
impl MockConnector {
    pub fn new(responder: Responder) -> Arc<Self> {
        Self::with_login_reply("ok", responder)
    }

    pub fn with_login_reply(login_reply: &str, responder: Responder) -> Arc<Self> {
        Arc::new(Self {
            login_reply: login_reply.to_string(),
            responder,
            refuse: AtomicBool::new(false),
            fail_shutdown: AtomicBool::new(false),
            opened: AtomicUsize::new(0),
            closed: Arc::new(AtomicUsize::new(0)),
            logins: Arc::new(Mutex::new(Vec::new())),
            commands: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Client transports opened from now on refuse a graceful shutdown.
    pub fn fail_shutdown(&self, fail: bool) {
        self.fail_shutdown.store(fail, Ordering::SeqCst);
    }

    /// Connections accepted so far.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Connections whose client side has gone away.
    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn logins(&self) -> Vec<Received> {
        self.logins.lock().clone()
    }

    pub fn commands(&self) -> Vec<Received> {
        self.commands.lock().clone()
    }
}

impl std::fmt::Debug for MockConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockConnector")
            .field("login_reply", &self.login_reply)
            .field("opened", &self.opened())
            .field("closed", &self.closed())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self) -> Result<BoxedTransport> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(Error::Connection(io::ErrorKind::ConnectionRefused.into()));
        }

        let connection = self.opened.fetch_add(1, Ordering::SeqCst);
        let (client, server) = duplex(64 * 1024);

        let conn = ServerConn {
            connection,
            login_reply: self.login_reply.clone(),
            responder: self.responder,
            closed: self.closed.clone(),
            logins: self.logins.clone(),
            commands: self.commands.clone(),
        };
        tokio::spawn(conn.serve(server));

        if self.fail_shutdown.load(Ordering::SeqCst) {
            return Ok(Box::new(ShutdownRefused(client)));
        }
        Ok(Box::new(client))
    }

    async fn authorize(&self, transport: BoxedTransport) -> Result<BoxedTransport> {
        Ok(transport)
    }

    fn describe(&self) -> String {
        "mock:19535".into()
    }
}

// -----------------------------------------------------------------------------
// ----- ShutdownRefused -------------------------------------------------------

/// Client end whose `shutdown` fails; dropping it still closes the pipe.
struct ShutdownRefused(DuplexStream);

impl AsyncRead for ShutdownRefused {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_read(cx, buf)
    }
}

impl AsyncWrite for ShutdownRefused {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.0).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Err(io::Error::new(
            io::ErrorKind::BrokenPipe,
            "shutdown refused",
        )))
    }
}

// -----------------------------------------------------------------------------
// ----- ServerConn ------------------------------------------------------------

struct ServerConn {
    connection: usize,
    login_reply: String,
    responder: Responder,
    closed: Arc<AtomicUsize>,
    logins: Arc<Mutex<Vec<Received>>>,
    commands: Arc<Mutex<Vec<Received>>>,
}

impl ServerConn {
    async fn serve(self, mut stream: DuplexStream) {
        let mut inbox = BytesMut::with_capacity(1024);
        let mut logged_in = false;

        loop {
            let frame = loop {
                if let Some(frame) = split_frame(&mut inbox, TERMINATOR) {
                    break Some(frame);
                }
                match stream.read_buf(&mut inbox).await {
                    Ok(0) | Err(_) => break None,
                    Ok(_) => continue,
                }
            };

            let Some(frame) = frame else {
                self.closed.fetch_add(1, Ordering::SeqCst);
                return;
            };

            let line = String::from_utf8_lossy(strip_terminator(&frame, TERMINATOR)).into_owned();
            let received = Received {
                connection: self.connection,
                at: Instant::now(),
                line: line.clone(),
            };

            if !logged_in {
                self.logins.lock().push(received);
                if write_frame(&mut stream, &self.login_reply).await.is_err() {
                    return;
                }
                logged_in = self.login_reply == "ok";
                continue;
            }

            self.commands.lock().push(received);
            let sent = match (self.responder)(&line) {
                Reply::Text(text) => write_frame(&mut stream, &text).await,
                Reply::Delayed(delay, text) => {
                    sleep(delay).await;
                    write_frame(&mut stream, &text).await
                }
                Reply::Split(text) => {
                    let (head, tail) = text.split_at(text.len() / 2);
                    let first = stream.write_all(head.as_bytes()).await;
                    sleep(Duration::from_millis(10)).await;
                    match first {
                        Ok(()) => write_frame(&mut stream, tail).await,
                        Err(e) => Err(e),
                    }
                }
                Reply::Hangup => {
                    self.closed.fetch_add(1, Ordering::SeqCst);
                    return;
                }
                Reply::Silent => Ok(()),
            };

            if sent.is_err() {
                self.closed.fetch_add(1, Ordering::SeqCst);
                return;
            }
        }
    }
}

async fn write_frame(stream: &mut DuplexStream, text: &str) -> io::Result<()> {
    let mut out = text.as_bytes().to_vec();
    out.push(TERMINATOR);
    stream.write_all(&out).await
}

// -----------------------------------------------------------------------------
// ----- Helpers ---------------------------------------------------------------

#[allow(dead_code)]
pub fn settings(read_timeout: Option<Duration>) -> SessionSettings {
    SessionSettings {
        client_name: "vndbpool-test".into(),
        client_version: "0.0.1".into(),
        terminator: TERMINATOR,
        read_timeout,
    }
}

#[allow(dead_code)]
pub fn factory(connector: Arc<MockConnector>) -> SessionFactory {
    SessionFactory::new(connector, settings(None), None)
}

#[allow(dead_code)]
pub fn factory_with_login(connector: Arc<MockConnector>, user: &str, pass: &str) -> SessionFactory {
    let credentials = Credentials {
        username: user.to_string(),
        password: SecretString::new(pass.to_string().into_boxed_str()),
    };
    SessionFactory::new(connector, settings(None), Some(credentials))
}
