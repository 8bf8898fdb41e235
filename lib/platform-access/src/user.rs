//! The authenticated user.

use serde::{Deserialize, Serialize};

/// The identity carried by a session cookie.
///
/// The email is the only identity the backend relies on; it scopes every
/// conversation read and write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

impl SessionUser {
    /// Creates a user, trimming the email.
    #[must_use]
    pub fn new(email: impl Into<String>, name: Option<String>) -> Self {
        Self {
            email: email.into().trim().to_string(),
            name: name.filter(|n| !n.trim().is_empty()),
        }
    }

    #[must_use]
    pub fn email(&self) -> &str {
        &self.email
    }

    /// Display name, if the session carries one.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}
