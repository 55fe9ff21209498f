//! Backend authentication endpoints
//!
//! Paths are relative to the configured API base URL.

/// Credential login; answers with an `AuthResponse`.
pub const LOGIN_PATH: &str = "/api/v1/auth/login";

/// Account registration.
pub const REGISTER_PATH: &str = "/api/v1/auth/register";

/// Server-side token invalidation.
pub const LOGOUT_PATH: &str = "/api/v1/auth/logout";

/// Access token renewal; takes a `RenewalRequest`, answers with a `RenewalResponse`.
pub const RENEWAL_PATH: &str = "/api/v1/auth/refresh";

/// Scheme prefix for the Authorization header value.
pub const BEARER_PREFIX: &str = "Bearer ";
