use std::fmt;

use rand::Rng;

// -----------------------------------------------------------------------------
// ----- SessionId -------------------------------------------------------------

/// Opaque per-session identifier. Sent as the login `client` field and used
/// to correlate log lines; never interpreted by the pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

// -----------------------------------------------------------------------------
// ----- SessionId: Static -----------------------------------------------------

impl SessionId {
    pub fn random(prefix: &str) -> Self {
        let token: u64 = rand::rng().random();
        SessionId(format!("{prefix}-{token:016x}"))
    }
}

// -----------------------------------------------------------------------------
// ----- SessionId: Public -----------------------------------------------------

impl SessionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
