use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tracing::{debug, warn};

use super::session::{Session, SessionSettings};
use crate::errors::Result;
use crate::net::Connector;

// -----------------------------------------------------------------------------
// ----- Credentials -----------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

// -----------------------------------------------------------------------------
// ----- SessionFactory --------------------------------------------------------

/// Creates ready sessions for the pool and tears them down again.
#[derive(Debug, Clone)]
pub struct SessionFactory {
    connector: Arc<dyn Connector>,
    settings: Arc<SessionSettings>,
    credentials: Option<Credentials>,
}

impl SessionFactory {
    pub fn new(
        connector: Arc<dyn Connector>,
        settings: SessionSettings,
        credentials: Option<Credentials>,
    ) -> Self {
        Self {
            connector,
            settings: Arc::new(settings),
            credentials,
        }
    }

    /// Connect and log in. The session is `Ready` on success.
    pub async fn create(&self) -> Result<Session> {
        let mut session = Session::new(self.connector.clone(), self.settings.clone());
        session.connect().await?;

        let (username, password) = match &self.credentials {
            Some(c) => (Some(c.username.as_str()), Some(c.password.expose_secret())),
            None => (None, None),
        };
        session.login(username, password).await?;

        debug!(session = %session.id(), peer = %session.peer(), "session ready");
        Ok(session)
    }

    /// Close a session the pool no longer wants. The session ends up `Closed`
    /// either way; a failed shutdown is logged and returned.
    pub async fn destroy(&self, mut session: Session) -> Result<()> {
        session.destroy().await.inspect_err(|err| {
            warn!(session = %session.id(), "error while closing session: {err}");
        })
    }
}
