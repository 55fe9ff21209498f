//! The caller's credential pair

use common::Secret;
use serde::{Deserialize, Serialize};

/// Access and renewal credentials for the current caller.
///
/// A session without an access token is anonymous. Its renewal token, if any,
/// is treated as unusable: renewal needs a caller identity to renew.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<Secret<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renewal_token: Option<Secret<String>>,
}

impl Session {
    /// Build an authenticated session. Empty strings are treated as absent.
    pub fn new(access_token: impl Into<String>, renewal_token: impl Into<String>) -> Self {
        Self {
            access_token: non_empty(access_token.into()),
            renewal_token: non_empty(renewal_token.into()),
        }
    }

    /// A session with no credentials.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Whether an access token is present.
    pub fn is_authenticated(&self) -> bool {
        self.access_token.is_some()
    }

    /// Access token, if any.
    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_ref().map(|t| t.expose().as_str())
    }

    /// Renewal token, only when it is usable (an access token is also present).
    pub fn renewal_token(&self) -> Option<&str> {
        if !self.is_authenticated() {
            return None;
        }
        self.renewal_token.as_ref().map(|t| t.expose().as_str())
    }
}

fn non_empty(value: String) -> Option<Secret<String>> {
    if value.is_empty() {
        None
    } else {
        Some(Secret::new(value))
    }
}
