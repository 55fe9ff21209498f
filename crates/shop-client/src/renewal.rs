//! Single-flight session renewal
//!
//! The first caller to hit an expired session opens a ticket and spawns the
//! renewal call; everyone who arrives while it is outstanding waits on the
//! same ticket instead of issuing a second call. A second call would present
//! a renewal token the first call may already have rotated, get rejected, and
//! tear down a session that was in fact still valid.
//!
//! State machine:
//! - Idle → Renewing (first `renew()` with no open ticket)
//! - Renewing → Idle (outcome published; the slot is emptied under the same
//!   lock, so a 401 arriving afterwards opens a fresh ticket)
//!
//! The renewal call runs in its own task, so a caller dropped by its timeout
//! never strands the ticket for the others.
//!
//! Any failure ends the session. Every write goes through
//! `SessionStore::replace_if` against the session the renewal started from,
//! so a logout or login that lands while the call is in flight wins.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use common::Secret;
use reqwest::StatusCode;
use shop_session::endpoints::RENEWAL_PATH;
use shop_session::{RenewalRequest, RenewalResponse, Session, SessionStore};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{ApiError, normalize};
use crate::transport::{Request, Transport, TransportError};

/// Why a renewal did not produce a session.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RenewalError {
    /// No access/renewal token pair to renew with.
    #[error("no usable renewal credential")]
    MissingCredential,

    /// The server refused the renewal token.
    #[error("renewal credential rejected with status {0}")]
    Rejected(u16),

    /// The renewal call got no usable answer.
    #[error("renewal unavailable: {0}")]
    Unavailable(ApiError),

    /// The session was logged out while the renewal was in flight.
    #[error("session ended while renewing")]
    Superseded,

    /// The renewal task ended without publishing an outcome.
    #[error("renewal abandoned")]
    Abandoned,
}

impl RenewalError {
    /// Whether the session is gone after this failure.
    pub fn ends_session(&self) -> bool {
        !matches!(self, RenewalError::Abandoned)
    }

    /// The terminal error the pipeline surfaces for this failure.
    pub fn into_api_error(self) -> ApiError {
        match self {
            RenewalError::MissingCredential
            | RenewalError::Rejected(_)
            | RenewalError::Superseded => ApiError::auth("session expired"),
            RenewalError::Unavailable(err) => {
                ApiError::auth(format!("session expired, renewal failed: {err}"))
            }
            RenewalError::Abandoned => ApiError::auth("session renewal was interrupted"),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            RenewalError::MissingCredential => "missing_credential",
            RenewalError::Rejected(_) => "rejected",
            RenewalError::Unavailable(_) => "unavailable",
            RenewalError::Superseded => "superseded",
            RenewalError::Abandoned => "abandoned",
        }
    }
}

type Outcome = Result<Session, RenewalError>;

/// A pending renewal shared by every caller that joined it.
type Ticket = watch::Receiver<Option<Outcome>>;

/// Renews the session at most once at a time.
pub struct RenewalCoordinator {
    session: Arc<SessionStore>,
    transport: Arc<dyn Transport>,
    timeout: Duration,
    ticket: Mutex<Option<Ticket>>,
    calls: AtomicU64,
}

impl RenewalCoordinator {
    pub fn new(session: Arc<SessionStore>, transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        Self {
            session,
            transport,
            timeout,
            ticket: Mutex::new(None),
            calls: AtomicU64::new(0),
        }
    }

    /// Renew the session, or join the renewal already in flight.
    ///
    /// On success the store already holds the returned session by the time
    /// this resolves.
    pub async fn renew(self: &Arc<Self>) -> Result<Session, RenewalError> {
        let mut ticket = {
            let mut slot = self.lock_ticket();
            match slot.as_ref() {
                // A closed sender means the task died; open a new ticket
                Some(open) if open.has_changed().is_ok() => {
                    debug!("joining renewal in flight");
                    open.clone()
                }
                _ => {
                    let (tx, rx) = watch::channel(None);
                    *slot = Some(rx.clone());
                    let this = Arc::clone(self);
                    tokio::spawn(async move { this.run(tx).await });
                    rx
                }
            }
        };

        let outcome = match ticket.wait_for(Option::is_some).await {
            Ok(resolved) => resolved.clone(),
            Err(_) => None,
        };
        outcome.unwrap_or(Err(RenewalError::Abandoned))
    }

    /// Whether a renewal is outstanding.
    pub fn is_renewing(&self) -> bool {
        self.lock_ticket().is_some()
    }

    /// Number of renewal network calls started so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    async fn run(self: Arc<Self>, tx: watch::Sender<Option<Outcome>>) {
        let outcome = self.attempt().await;

        // Back to Idle and resolve in one step
        let mut slot = self.lock_ticket();
        *slot = None;
        tx.send_replace(Some(outcome));
    }

    async fn attempt(&self) -> Outcome {
        let started_from = self.session.get().await;
        let Some(renewal_token) = started_from.renewal_token() else {
            warn!("no usable renewal credential, ending session");
            return self
                .settle(&started_from, Err(RenewalError::MissingCredential))
                .await;
        };

        let result = self.call(renewal_token, &started_from).await;
        crate::metrics::record_renewal(match &result {
            Ok(_) => "renewed",
            Err(e) => e.label(),
        });
        self.settle(&started_from, result).await
    }

    /// One renewal network call. Does not touch the store.
    async fn call(&self, renewal_token: &str, started_from: &Session) -> Outcome {
        let request = Request::post(RENEWAL_PATH)
            .json(&RenewalRequest {
                refresh_token: Secret::from(renewal_token),
            })
            .map_err(RenewalError::Unavailable)?;

        self.calls.fetch_add(1, Ordering::Relaxed);
        debug!(request_id = %request.id, "renewing session");

        let sent = tokio::time::timeout(self.timeout, self.transport.send(&request)).await;
        let response = match sent {
            Ok(Ok(response)) => response,
            Ok(Err(TransportError::Status { status, .. }))
                if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN =>
            {
                return Err(RenewalError::Rejected(status.as_u16()));
            }
            Ok(Err(e)) => return Err(RenewalError::Unavailable(normalize(&e))),
            Err(_) => {
                return Err(RenewalError::Unavailable(normalize(
                    &TransportError::NoResponse(format!(
                        "renewal timed out after {}s",
                        self.timeout.as_secs()
                    )),
                )));
            }
        };

        let renewed = response
            .json::<RenewalResponse>()
            .map_err(RenewalError::Unavailable)?
            .into_session(started_from);
        if !renewed.is_authenticated() {
            return Err(RenewalError::Unavailable(ApiError::internal(
                "renewal returned an empty access token",
            )));
        }
        Ok(renewed)
    }

    /// Write the outcome to the store, unless the session moved on since
    /// `started_from` was read.
    async fn settle(&self, started_from: &Session, result: Outcome) -> Outcome {
        let next = match &result {
            Ok(renewed) => renewed.clone(),
            Err(e) => {
                warn!(error = %e, "session renewal failed, ending session");
                Session::anonymous()
            }
        };

        match self.session.replace_if(started_from, next).await {
            Ok(true) => {}
            Ok(false) => return self.superseded().await,
            Err(e) => warn!(error = %e, "failed to persist session after renewal"),
        }
        if result.is_ok() {
            info!("session renewed");
        }
        result
    }

    /// The session changed under the renewal. A fresh login is handed to the
    /// waiters as-is; a logout stays a logout.
    async fn superseded(&self) -> Outcome {
        let current = self.session.get().await;
        if current.is_authenticated() {
            info!("session replaced while renewing, using the new session");
            Ok(current)
        } else {
            info!("session ended while renewing, discarding renewal result");
            Err(RenewalError::Superseded)
        }
    }

    fn lock_ticket(&self) -> MutexGuard<'_, Option<Ticket>> {
        self.ticket.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeTransport, ok_json, status};

    fn coordinator(session: Session, transport: Arc<FakeTransport>) -> Arc<RenewalCoordinator> {
        Arc::new(RenewalCoordinator::new(
            Arc::new(SessionStore::in_memory(session)),
            transport,
            Duration::from_secs(10),
        ))
    }

    #[tokio::test]
    async fn success_updates_store_before_resolving() {
        let transport = Arc::new(FakeTransport::new(|_| {
            ok_json(r#"{"token":"at_new","refreshToken":"rt_new"}"#)
        }));
        let coord = coordinator(Session::new("at_old", "rt_old"), transport.clone());

        let session = coord.renew().await.unwrap();
        assert_eq!(session.access_token(), Some("at_new"));
        assert_eq!(coord.session.get().await, session);
        assert!(!coord.is_renewing());

        let seen = transport.seen();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].target, RENEWAL_PATH);
        assert_eq!(seen[0].authorization, None, "renewal must not carry the expired token");
        assert_eq!(seen[0].body, r#"{"refreshToken":"rt_old"}"#);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_call() {
        let transport = Arc::new(
            FakeTransport::new(|_| ok_json(r#"{"token":"at_new"}"#))
                .with_latency(Duration::from_millis(50)),
        );
        let coord = coordinator(Session::new("at_old", "rt_old"), transport.clone());

        let (a, b, c) = tokio::join!(coord.renew(), coord.renew(), coord.renew());
        assert_eq!(transport.seen().len(), 1);
        assert_eq!(coord.calls(), 1);
        for outcome in [a, b, c] {
            assert_eq!(outcome.unwrap().access_token(), Some("at_new"));
        }
    }

    #[tokio::test]
    async fn resolved_ticket_is_not_reused() {
        let transport = Arc::new(FakeTransport::new(|_| ok_json(r#"{"token":"at_new"}"#)));
        let coord = coordinator(Session::new("at_old", "rt_old"), transport.clone());

        coord.renew().await.unwrap();
        coord.renew().await.unwrap();
        assert_eq!(coord.calls(), 2, "a later expiry must start a fresh renewal");
    }

    #[tokio::test]
    async fn rejection_clears_session_for_all_waiters() {
        let transport = Arc::new(
            FakeTransport::new(|_| status(401, "")).with_latency(Duration::from_millis(20)),
        );
        let coord = coordinator(Session::new("at_old", "rt_old"), transport.clone());

        let (a, b) = tokio::join!(coord.renew(), coord.renew());
        assert!(matches!(a, Err(RenewalError::Rejected(401))));
        assert!(matches!(b, Err(RenewalError::Rejected(401))));
        assert!(!coord.session.is_authenticated().await);
        assert_eq!(transport.seen().len(), 1);
    }

    #[tokio::test]
    async fn forbidden_is_also_a_rejection() {
        let transport = Arc::new(FakeTransport::new(|_| status(403, "")));
        let coord = coordinator(Session::new("at_old", "rt_old"), transport);

        let err = coord.renew().await.unwrap_err();
        assert!(err.ends_session());
        assert_eq!(err.into_api_error().kind(), crate::ErrorKind::Auth);
    }

    #[tokio::test]
    async fn missing_credential_makes_no_call() {
        let transport = Arc::new(FakeTransport::new(|_| ok_json("{}")));
        let coord = coordinator(Session::anonymous(), transport.clone());

        let err = coord.renew().await.unwrap_err();
        assert!(matches!(err, RenewalError::MissingCredential));
        assert!(transport.seen().is_empty());
        assert_eq!(coord.calls(), 0);
    }

    #[tokio::test]
    async fn server_error_ends_session() {
        let transport = Arc::new(FakeTransport::new(|_| status(503, "maintenance")));
        let coord = coordinator(Session::new("at_old", "rt_old"), transport);

        let err = coord.renew().await.unwrap_err();
        assert!(matches!(err, RenewalError::Unavailable(_)));
        assert!(err.ends_session());
        assert_eq!(err.into_api_error().kind(), crate::ErrorKind::Auth);
        assert!(!coord.session.is_authenticated().await);
    }

    #[tokio::test(start_paused = true)]
    async fn renewal_timeout_ends_session() {
        let transport = Arc::new(
            FakeTransport::new(|_| ok_json(r#"{"token":"at_new"}"#))
                .with_latency(Duration::from_secs(30)),
        );
        let coord = coordinator(Session::new("at_old", "rt_old"), transport);

        let err = coord.renew().await.unwrap_err();
        assert!(err.to_string().contains("timed out after 10s"), "got: {err}");
        assert_eq!(err.into_api_error().kind(), crate::ErrorKind::Auth);
        assert!(!coord.session.is_authenticated().await);
        assert!(!coord.is_renewing());
    }

    #[tokio::test]
    async fn malformed_renewal_payload_ends_session() {
        let transport = Arc::new(FakeTransport::new(|_| ok_json(r#"{"unexpected":true}"#)));
        let coord = coordinator(Session::new("at_old", "rt_old"), transport);

        let err = coord.renew().await.unwrap_err();
        assert!(matches!(err, RenewalError::Unavailable(_)));
        assert!(!coord.session.is_authenticated().await);
    }

    #[tokio::test]
    async fn empty_access_token_is_not_a_renewal() {
        let transport = Arc::new(FakeTransport::new(|_| ok_json(r#"{"token":""}"#)));
        let coord = coordinator(Session::new("at_old", "rt_old"), transport);

        let err = coord.renew().await.unwrap_err();
        assert!(matches!(err, RenewalError::Unavailable(_)));
        assert!(!coord.session.is_authenticated().await);
    }

    #[tokio::test(start_paused = true)]
    async fn logout_during_renewal_is_not_undone() {
        let transport = Arc::new(
            FakeTransport::new(|_| ok_json(r#"{"token":"at_new","refreshToken":"rt_new"}"#))
                .with_latency(Duration::from_millis(50)),
        );
        let coord = coordinator(Session::new("at_old", "rt_old"), transport);

        let pending = tokio::spawn({
            let coord = coord.clone();
            async move { coord.renew().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(coord.is_renewing());
        coord.session.clear().await.unwrap();

        let outcome = pending.await.unwrap();
        assert!(matches!(outcome, Err(RenewalError::Superseded)));
        assert_eq!(coord.session.get().await, Session::anonymous());
    }

    #[tokio::test(start_paused = true)]
    async fn login_during_renewal_wins() {
        let transport = Arc::new(
            FakeTransport::new(|_| ok_json(r#"{"token":"at_new"}"#))
                .with_latency(Duration::from_millis(50)),
        );
        let coord = coordinator(Session::new("at_old", "rt_old"), transport);

        let pending = tokio::spawn({
            let coord = coord.clone();
            async move { coord.renew().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        coord
            .session
            .set(Session::new("at_login", "rt_login"))
            .await
            .unwrap();

        let session = pending.await.unwrap().unwrap();
        assert_eq!(session.access_token(), Some("at_login"));
        assert_eq!(coord.session.get().await.access_token(), Some("at_login"));
    }

    #[tokio::test(start_paused = true)]
    async fn late_rejection_keeps_a_fresh_login() {
        let transport = Arc::new(
            FakeTransport::new(|_| status(401, "")).with_latency(Duration::from_millis(50)),
        );
        let coord = coordinator(Session::new("at_old", "rt_old"), transport);

        let pending = tokio::spawn({
            let coord = coord.clone();
            async move { coord.renew().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        coord
            .session
            .set(Session::new("at_login", "rt_login"))
            .await
            .unwrap();

        pending.await.unwrap().unwrap();
        assert_eq!(coord.session.get().await.access_token(), Some("at_login"));
    }

    #[tokio::test]
    async fn renewal_metric_counts_network_calls_only() {
        use metrics_exporter_prometheus::PrometheusBuilder;

        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let _guard = metrics::set_default_local_recorder(&recorder);

        let idle = Arc::new(FakeTransport::new(|_| ok_json("{}")));
        coordinator(Session::anonymous(), idle).renew().await.unwrap_err();
        assert!(
            !handle.render().contains("api_session_renewals_total"),
            "no call, no sample"
        );

        let rejecting = Arc::new(FakeTransport::new(|_| status(401, "")));
        coordinator(Session::new("at_old", "rt_old"), rejecting)
            .renew()
            .await
            .unwrap_err();
        let output = handle.render();
        assert!(output.contains("result=\"rejected\""), "got: {output}");
    }
}
