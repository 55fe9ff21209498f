//! The request pipeline
//!
//! `execute` is the one entry point for every API call. Per call it:
//! 1. holds a busy guard for the whole call, retries included
//! 2. injects the current access token, if any
//! 3. sends under the fixed timeout (a timeout counts as no response)
//! 4. on 401 with a credential: renews (single-flight) and retries once
//! 5. normalizes anything else and returns it untouched
//!
//! The retry depth is bounded at one: a retry that fails, even with another
//! 401, is normalized and surfaced.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::StatusCode;
use serde::Serialize;
use shop_session::SessionStore;
use tracing::{debug, instrument, warn};

use crate::busy::BusyTracker;
use crate::error::{ApiError, Result, normalize};
use crate::renewal::RenewalCoordinator;
use crate::transport::{Request, Response, Transport, TransportError};

/// Per-attempt timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy)]
enum Credential {
    Session,
    Anonymous,
}

/// Authenticated request pipeline. Cheap to share behind an `Arc`.
pub struct Pipeline {
    transport: Arc<dyn Transport>,
    session: Arc<SessionStore>,
    busy: Arc<BusyTracker>,
    renewal: Arc<RenewalCoordinator>,
    timeout: Duration,
}

impl Pipeline {
    /// Build a pipeline with the default 10 second timeout.
    pub fn new(transport: Arc<dyn Transport>, session: Arc<SessionStore>) -> Self {
        Self::with_timeout(transport, session, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        transport: Arc<dyn Transport>,
        session: Arc<SessionStore>,
        timeout: Duration,
    ) -> Self {
        let renewal = Arc::new(RenewalCoordinator::new(
            session.clone(),
            transport.clone(),
            timeout,
        ));
        Self {
            transport,
            session,
            busy: Arc::new(BusyTracker::new()),
            renewal,
            timeout,
        }
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    pub fn busy(&self) -> &Arc<BusyTracker> {
        &self.busy
    }

    pub fn renewal(&self) -> &Arc<RenewalCoordinator> {
        &self.renewal
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send one request through the pipeline.
    pub async fn execute(&self, request: Request) -> Result<Response> {
        self.dispatch(request, Credential::Session).await
    }

    /// Send a request that must not carry the session credential, such as a
    /// login. A 401 here is the server's verdict, never a renewal trigger.
    pub async fn execute_anonymous(&self, request: Request) -> Result<Response> {
        self.dispatch(request, Credential::Anonymous).await
    }

    #[instrument(skip_all, fields(request_id = %request.id, method = %request.method, target = %request.target))]
    async fn dispatch(&self, mut request: Request, credential: Credential) -> Result<Response> {
        let _busy = self.busy.guard();
        let started = Instant::now();

        let result = match credential {
            Credential::Session => self.run(&mut request).await,
            Credential::Anonymous => self.attempt(&request).await.map_err(|e| normalize(&e)),
        };

        let elapsed = started.elapsed();
        let outcome = match &result {
            Ok(response) => {
                debug!(
                    status = response.status.as_u16(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "request completed"
                );
                "success"
            }
            Err(e) => {
                warn!(
                    kind = e.kind().as_str(),
                    error = %e,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "request failed"
                );
                e.kind().as_str()
            }
        };
        crate::metrics::record_request(request.method.as_str(), outcome, elapsed.as_secs_f64());
        result
    }

    pub async fn get(&self, target: &str) -> Result<Response> {
        self.execute(Request::get(target)).await
    }

    pub async fn delete(&self, target: &str) -> Result<Response> {
        self.execute(Request::delete(target)).await
    }

    pub async fn post<T: Serialize + ?Sized>(&self, target: &str, body: &T) -> Result<Response> {
        self.execute(Request::post(target).json(body)?).await
    }

    pub async fn put<T: Serialize + ?Sized>(&self, target: &str, body: &T) -> Result<Response> {
        self.execute(Request::put(target).json(body)?).await
    }

    async fn run(&self, request: &mut Request) -> Result<Response> {
        let sent_with = self.session.get().await.access_token().map(str::to_owned);
        if let Some(token) = &sent_with {
            request.set_bearer(token)?;
        }

        match self.attempt(request).await {
            Ok(response) => Ok(response),
            Err(TransportError::Status { status, .. }) if status == StatusCode::UNAUTHORIZED => {
                self.recover(request, sent_with).await
            }
            Err(e) => Err(normalize(&e)),
        }
    }

    /// Handle a 401: obtain a fresh credential and retry exactly once.
    async fn recover(&self, request: &mut Request, sent_with: Option<String>) -> Result<Response> {
        let Some(sent_with) = sent_with else {
            debug!("401 on a request without credentials, not renewing");
            return Err(ApiError::auth("authentication required"));
        };

        // Someone else may have renewed while this request was in flight
        let current = self.session.get().await;
        let token = match current.access_token() {
            Some(token) if token != sent_with => {
                debug!("session already renewed, retrying with current credential");
                token.to_owned()
            }
            _ => {
                let renewed = self.renewal.renew().await.map_err(|e| {
                    warn!(error = %e, ends_session = e.ends_session(), "session renewal failed");
                    e.into_api_error()
                })?;
                renewed
                    .access_token()
                    .map(str::to_owned)
                    .ok_or_else(|| ApiError::auth("renewal returned no access token"))?
            }
        };

        request.set_bearer(&token)?;
        debug!("retrying after renewal");
        self.attempt(request).await.map_err(|e| normalize(&e))
    }

    async fn attempt(&self, request: &Request) -> std::result::Result<Response, TransportError> {
        match tokio::time::timeout(self.timeout, self.transport.send(request)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::NoResponse(format!(
                "timed out after {}s",
                self.timeout.as_secs()
            ))),
        }
    }
}
