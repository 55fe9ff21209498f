//! Login, registration and logout
//!
//! `AuthClient` and the renewal coordinator are the only writers of the
//! session store.

use std::sync::Arc;

use common::Secret;
use serde::Serialize;
use shop_session::endpoints::{LOGIN_PATH, LOGOUT_PATH, REGISTER_PATH};
use shop_session::{AuthResponse, JwtResponse, LoginRequest};
use tracing::{info, warn};

use crate::error::{ApiError, Result};
use crate::pipeline::Pipeline;
use crate::transport::{Request, Response};

pub struct AuthClient {
    pipeline: Arc<Pipeline>,
}

impl AuthClient {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Exchange credentials for a session and store it.
    pub async fn login(&self, email: &str, password: Secret<String>) -> Result<JwtResponse> {
        let email = email.trim();
        if email.is_empty() {
            return Err(ApiError::validation("email is required"));
        }
        if password.is_empty() {
            return Err(ApiError::validation("password is required"));
        }

        let request = Request::post(LOGIN_PATH).json(&LoginRequest {
            email: email.to_string(),
            password,
        })?;
        let envelope: AuthResponse = self.pipeline.execute_anonymous(request).await?.json()?;

        if !envelope.success {
            let message = if envelope.message.is_empty() {
                "login rejected".to_string()
            } else {
                envelope.message
            };
            return Err(ApiError::auth(message));
        }
        let identity = envelope
            .data
            .ok_or_else(|| ApiError::internal("login succeeded without a token payload"))?;

        let session = identity.to_session();
        if !session.is_authenticated() {
            return Err(ApiError::internal("login succeeded with an empty access token"));
        }
        self.pipeline
            .session()
            .set(session)
            .await
            .map_err(|e| ApiError::internal(format!("failed to store session: {e}")))?;
        info!(user_id = identity.id, roles = ?identity.roles, "logged in");
        Ok(identity)
    }

    /// Create an account. Does not log in.
    pub async fn register<T: Serialize + ?Sized>(&self, details: &T) -> Result<Response> {
        let request = Request::post(REGISTER_PATH).json(details)?;
        self.pipeline.execute_anonymous(request).await
    }

    /// End the session. The local session is cleared even when the server
    /// call fails.
    pub async fn logout(&self) -> Result<()> {
        let outcome = if self.pipeline.session().is_authenticated().await {
            self.pipeline.execute(Request::post(LOGOUT_PATH)).await.map(drop)
        } else {
            Ok(())
        };
        if let Err(e) = &outcome {
            warn!(error = %e, "server-side logout failed, clearing session anyway");
        }

        self.pipeline
            .session()
            .clear()
            .await
            .map_err(|e| ApiError::internal(format!("failed to clear session: {e}")))?;
        info!("logged out");
        Ok(())
    }

    pub async fn is_authenticated(&self) -> bool {
        self.pipeline.session().is_authenticated().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::testing::{FakeTransport, ok_json, status};
    use shop_session::{Session, SessionStore};

    const LOGIN_OK: &str = r#"{
        "success": true,
        "message": "Login successful",
        "data": {
            "token": "at_1",
            "refreshToken": "rt_1",
            "type": "Bearer",
            "id": 7,
            "email": "ada@example.com",
            "roles": ["ROLE_USER"]
        }
    }"#;

    fn client(session: Session, transport: Arc<FakeTransport>) -> AuthClient {
        AuthClient::new(Arc::new(Pipeline::new(
            transport,
            Arc::new(SessionStore::in_memory(session)),
        )))
    }

    #[tokio::test]
    async fn login_stores_session() {
        let transport = Arc::new(FakeTransport::new(|_| ok_json(LOGIN_OK)));
        let auth = client(Session::anonymous(), transport.clone());

        let identity = auth
            .login(" ada@example.com ", Secret::from("hunter2"))
            .await
            .unwrap();
        assert_eq!(identity.id, 7);
        assert!(identity.has_role("ROLE_USER"));
        assert!(auth.is_authenticated().await);
        assert_eq!(
            auth.pipeline().session().get().await.access_token(),
            Some("at_1")
        );

        let seen = transport.seen();
        assert_eq!(seen[0].target, LOGIN_PATH);
        assert_eq!(
            seen[0].body,
            r#"{"email":"ada@example.com","password":"hunter2"}"#
        );
    }

    #[tokio::test]
    async fn login_does_not_present_a_stale_session() {
        let transport = Arc::new(FakeTransport::new(|_| status(401, "")));
        let auth = client(Session::new("at_stale", "rt_stale"), transport.clone());

        let err = auth
            .login("ada@example.com", Secret::from("wrong"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Auth);
        let seen = transport.seen();
        assert_eq!(seen.len(), 1, "bad credentials must not trigger renewal");
        assert_eq!(seen[0].authorization, None);
    }

    #[tokio::test]
    async fn unsuccessful_envelope_is_auth_with_server_message() {
        let transport = Arc::new(FakeTransport::new(|_| {
            ok_json(r#"{"success":false,"message":"Invalid email or password"}"#)
        }));
        let auth = client(Session::anonymous(), transport);

        let err = auth
            .login("ada@example.com", Secret::from("wrong"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Auth);
        assert!(err.to_string().contains("Invalid email or password"), "got: {err}");
        assert!(!auth.is_authenticated().await);
    }

    #[tokio::test]
    async fn success_without_payload_is_internal() {
        let transport = Arc::new(FakeTransport::new(|_| ok_json(r#"{"success":true}"#)));
        let auth = client(Session::anonymous(), transport);

        let err = auth
            .login("ada@example.com", Secret::from("pw"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(500));
        assert!(!auth.is_authenticated().await);
    }

    #[tokio::test]
    async fn empty_issued_token_is_rejected() {
        let transport = Arc::new(FakeTransport::new(|_| {
            ok_json(r#"{"success":true,"data":{"token":"","refreshToken":"rt_1","id":7,"email":"ada@example.com"}}"#)
        }));
        let auth = client(Session::anonymous(), transport);

        let err = auth
            .login("ada@example.com", Secret::from("pw"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(500));
        assert!(!auth.is_authenticated().await);
    }

    #[tokio::test]
    async fn empty_inputs_fail_validation_without_a_call() {
        let transport = Arc::new(FakeTransport::new(|_| ok_json(LOGIN_OK)));
        let auth = client(Session::anonymous(), transport.clone());

        let err = auth.login("  ", Secret::from("pw")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        let err = auth
            .login("ada@example.com", Secret::from(""))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(transport.seen().is_empty());
    }

    #[tokio::test]
    async fn register_posts_details_anonymously() {
        let transport = Arc::new(FakeTransport::new(|_| {
            ok_json(r#"{"success":true,"message":"registered"}"#)
        }));
        let auth = client(Session::anonymous(), transport.clone());

        let response = auth
            .register(&serde_json::json!({"email": "ada@example.com", "firstName": "Ada"}))
            .await
            .unwrap();
        assert!(response.text().contains("registered"));
        assert_eq!(transport.seen()[0].target, REGISTER_PATH);
        assert!(!auth.is_authenticated().await);
    }

    #[tokio::test]
    async fn logout_clears_session_even_when_server_fails() {
        let transport = Arc::new(FakeTransport::new(|_| status(503, "")));
        let auth = client(Session::new("at_1", "rt_1"), transport.clone());

        auth.logout().await.unwrap();
        assert!(!auth.is_authenticated().await);
        assert_eq!(transport.seen()[0].target, LOGOUT_PATH);
        assert_eq!(transport.seen()[0].authorization.as_deref(), Some("at_1"));
    }

    #[tokio::test]
    async fn logout_when_anonymous_makes_no_call() {
        let transport = Arc::new(FakeTransport::new(|_| ok_json("{}")));
        let auth = client(Session::anonymous(), transport.clone());

        auth.logout().await.unwrap();
        assert!(transport.seen().is_empty());
    }
}
