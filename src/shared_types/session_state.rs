use std::fmt;

/// Lifecycle of one [`Session`](crate::backend::Session).
///
/// ```text
/// Unconnected -> Connecting -> Authorizing -> LoggingIn -> Ready -> Closing -> Closed
/// ```
///
/// Any transport error from a non-terminal state moves straight to `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, no transport yet.
    Unconnected,

    /// TCP connect in progress.
    Connecting,

    /// TLS handshake and certificate verification in progress.
    Authorizing,

    /// Transport is up; waiting for the login exchange to succeed.
    LoggingIn,

    /// Authenticated; commands may be written and responses read.
    Ready,

    /// Graceful shutdown requested, waiting for the peer to confirm.
    Closing,

    Closed,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Unconnected => "unconnected",
            SessionState::Connecting => "connecting",
            SessionState::Authorizing => "authorizing",
            SessionState::LoggingIn => "logging-in",
            SessionState::Ready => "ready",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
