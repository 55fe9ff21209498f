//! Authenticated request pipeline for the shop API
//!
//! Every network call the console makes goes through [`Pipeline::execute`]:
//! it injects the bearer credential, tracks in-flight requests for the busy
//! indicator, enforces a fixed timeout, renews an expired session once, and
//! turns every failure into one [`ApiError`].
//!
//! Request lifecycle:
//! 1. Caller builds a `Request` and hands it to `Pipeline::execute`
//! 2. The pipeline reads the `SessionStore` and sets `Authorization`
//! 3. `BusyTracker` counts the call until it fully resolves
//! 4. A 401 routes through `RenewalCoordinator` (one renewal shared by all
//!    concurrent callers), then the request is retried exactly once
//! 5. Any other failure is normalized and returned without retry

pub mod auth;
pub mod busy;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod renewal;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use auth::AuthClient;
pub use busy::{BusyGuard, BusyTracker};
pub use error::{ApiError, ErrorKind, Result, normalize};
pub use pipeline::{DEFAULT_TIMEOUT, Pipeline};
pub use renewal::{RenewalCoordinator, RenewalError};
pub use transport::{HttpTransport, Request, Response, Transport, TransportError};
