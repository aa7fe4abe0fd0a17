//! Session passed explicitly into every command that reaches the backend.

use std::fmt;

/// The signed-in user and the credentials used for backend calls.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    /// User identifier (usually the mailbox address).
    pub user: String,
    token: Option<String>,
}

impl Session {
    /// Creates a session without credentials.
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            token: None,
        }
    }

    /// Attaches a bearer token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Returns the bearer token, if any.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }
}

// Keeps tokens out of logs.
impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("user", &self.user)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
