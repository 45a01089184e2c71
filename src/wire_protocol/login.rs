use serde::Serialize;

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

pub const PROTOCOL_VERSION: u32 = 1;

/// Acknowledgment body the server sends after a successful login.
pub const LOGIN_ACK: &[u8] = b"ok";

// -----------------------------------------------------------------------------
// ----- LoginCommand ----------------------------------------------------------

/// Body of the `login` command. Credentials that are not configured are
/// left out of the JSON entirely rather than sent as `null`.
#[derive(Debug, Serialize)]
pub struct LoginCommand<'a> {
    pub protocol: u32,
    pub client: &'a str,
    pub clientver: &'a str,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<&'a str>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<&'a str>,
}

impl<'a> LoginCommand<'a> {
    pub fn new(client: &'a str, clientver: &'a str) -> Self {
        Self {
            protocol: PROTOCOL_VERSION,
            client,
            clientver,
            username: None,
            password: None,
        }
    }

    pub fn with_credentials(mut self, username: Option<&'a str>, password: Option<&'a str>) -> Self {
        self.username = username;
        self.password = password;
        self
    }

    /// `login {json}`, without the terminator.
    pub fn to_line(&self) -> String {
        // Serializing a struct of strings and integers cannot fail.
        let body = serde_json::to_string(self).unwrap_or_default();
        format!("login {body}")
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
