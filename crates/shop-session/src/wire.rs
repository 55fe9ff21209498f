//! Request and response bodies of the authentication endpoints
//!
//! The backend speaks camelCase JSON. Token fields deserialize straight into
//! `Secret` so they never show up in `Debug` output.

use common::Secret;
use serde::{Deserialize, Serialize};

use crate::session::Session;

/// Body of `POST /api/v1/auth/login`.
#[derive(Debug, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: Secret<String>,
}

/// Identity and token pair issued on login.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JwtResponse {
    pub token: Secret<String>,
    pub refresh_token: Secret<String>,
    /// Token scheme, normally "Bearer"
    #[serde(rename = "type", default)]
    pub token_type: String,
    pub id: i64,
    pub email: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl JwtResponse {
    /// The session this login establishes. Empty tokens count as absent.
    pub fn to_session(&self) -> Session {
        Session::new(
            self.token.expose().as_str(),
            self.refresh_token.expose().as_str(),
        )
    }

    /// Whether the identity carries the given role (e.g. `ROLE_ADMIN`).
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Envelope around the login result.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: Option<JwtResponse>,
}

/// Body of `POST /api/v1/auth/refresh`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenewalRequest {
    pub refresh_token: Secret<String>,
}

/// Result of a renewal. Servers that rotate renewal tokens return a new
/// `refreshToken`; others only return the access `token`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenewalResponse {
    pub token: Secret<String>,
    #[serde(default)]
    pub refresh_token: Option<Secret<String>>,
}

impl RenewalResponse {
    /// The renewed session, keeping `previous` renewal token when none was
    /// rotated in. An empty access token leaves the session unauthenticated.
    pub fn into_session(self, previous: &Session) -> Session {
        let renewal_token = match self.refresh_token {
            Some(rotated) if !rotated.is_empty() => Some(rotated),
            _ => previous.renewal_token.clone(),
        };
        Session {
            access_token: Some(self.token).filter(|t| !t.is_empty()),
            renewal_token,
        }
    }
}
