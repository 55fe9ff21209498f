//! Request envelope and the transport seam
//!
//! `Transport` is the only thing that touches the network. It reports a
//! non-success status as `TransportError::Status` so the pipeline can tell
//! "the server said no" apart from "nobody answered". `HttpTransport` is the
//! production implementation over `reqwest`.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Instant;

use bytes::Bytes;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use shop_session::endpoints::BEARER_PREFIX;

use crate::error::ApiError;

/// One outgoing call. Built fresh by the caller, never shared between calls.
#[derive(Clone)]
pub struct Request {
    /// Correlation id for logs
    pub id: String,
    pub method: Method,
    /// Path relative to the API base URL, or an absolute URL
    pub target: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub issued_at: Instant,
}

impl Request {
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            id: format!("req_{}", uuid::Uuid::new_v4().as_simple()),
            method,
            target: target.into(),
            headers: HeaderMap::new(),
            body: None,
            issued_at: Instant::now(),
        }
    }

    pub fn get(target: impl Into<String>) -> Self {
        Self::new(Method::GET, target)
    }

    pub fn post(target: impl Into<String>) -> Self {
        Self::new(Method::POST, target)
    }

    pub fn put(target: impl Into<String>) -> Self {
        Self::new(Method::PUT, target)
    }

    pub fn delete(target: impl Into<String>) -> Self {
        Self::new(Method::DELETE, target)
    }

    /// Attach a JSON body and content type.
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, ApiError> {
        let bytes = serde_json::to_vec(body)
            .map_err(|e| ApiError::validation(format!("request body is not valid JSON: {e}")))?;
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.body = Some(Bytes::from(bytes));
        Ok(self)
    }

    /// Attach a raw body as-is.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Set a header, replacing any previous value under the same name.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set `Authorization: Bearer <token>`. The value is marked sensitive so
    /// it is omitted from `Debug` output.
    pub fn set_bearer(&mut self, token: &str) -> Result<(), ApiError> {
        let mut value = HeaderValue::from_str(&format!("{BEARER_PREFIX}{token}"))
            .map_err(|e| ApiError::internal(format!("access token is not a valid header: {e}")))?;
        value.set_sensitive(true);
        self.headers.insert(AUTHORIZATION, value);
        Ok(())
    }

    /// The bearer token currently attached, if any.
    pub fn bearer(&self) -> Option<&str> {
        self.headers
            .get(AUTHORIZATION)?
            .to_str()
            .ok()?
            .strip_prefix(BEARER_PREFIX)
    }
}

/// Bodies may carry passwords, so only their length is shown.
impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("target", &self.target)
            .field("headers", &self.headers)
            .field("body_len", &self.body.as_ref().map(Bytes::len))
            .finish()
    }
}

/// A successful response, returned to the caller unchanged.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Decode the body as JSON. A payload that doesn't match `T` is a
    /// synthetic 500 carrying the raw body.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_slice(&self.body).map_err(|e| ApiError::Api {
            status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            message: format!("unexpected response payload: {e}"),
            body: self.body.clone(),
        })
    }

    /// Body as UTF-8 text, lossy.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Raw failure from a transport, before normalization.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Nothing came back: refused, DNS, reset, timeout.
    #[error("no response: {0}")]
    NoResponse(String),

    /// The server answered with a non-success status.
    #[error("server returned {status}")]
    Status { status: StatusCode, body: Bytes },

    /// The request could not be built or sent at all.
    #[error("invalid request: {0}")]
    Request(String),
}

/// Sends one request and waits for the answer.
///
/// Uses `Pin<Box<dyn Future>>` so the pipeline can hold an `Arc<dyn Transport>`.
pub trait Transport: Send + Sync {
    fn send<'a>(
        &'a self,
        request: &'a Request,
    ) -> Pin<Box<dyn Future<Output = Result<Response, TransportError>> + Send + 'a>>;
}

/// `reqwest`-backed transport bound to an API base URL.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    /// Resolve a request target against the base URL.
    pub fn url_for(&self, target: &str) -> String {
        if target.starts_with("http://") || target.starts_with("https://") {
            return target.to_string();
        }
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            target.trim_start_matches('/')
        )
    }
}

impl Transport for HttpTransport {
    fn send<'a>(
        &'a self,
        request: &'a Request,
    ) -> Pin<Box<dyn Future<Output = Result<Response, TransportError>> + Send + 'a>> {
        Box::pin(async move {
            let mut builder = self
                .client
                .request(request.method.clone(), self.url_for(&request.target))
                .headers(request.headers.clone());
            if let Some(body) = &request.body {
                builder = builder.body(body.clone());
            }

            let response = builder.send().await.map_err(|e| {
                if e.is_builder() {
                    TransportError::Request(e.to_string())
                } else {
                    TransportError::NoResponse(e.to_string())
                }
            })?;

            let status = response.status();
            let headers = response.headers().clone();
            let body = response
                .bytes()
                .await
                .map_err(|e| TransportError::NoResponse(format!("reading response body: {e}")))?;

            if !status.is_success() {
                return Err(TransportError::Status { status, body });
            }

            Ok(Response {
                status,
                headers,
                body,
            })
        })
    }
}
