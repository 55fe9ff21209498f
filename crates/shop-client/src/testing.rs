//! Scripted transport for unit tests

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;

use bytes::Bytes;
use reqwest::{Method, StatusCode};

use crate::transport::{Request, Response, Transport, TransportError};

type Handler = Box<dyn Fn(&Request) -> Result<Response, TransportError> + Send + Sync>;

/// What the transport saw for one call.
#[derive(Debug, Clone)]
pub struct Seen {
    pub method: Method,
    pub target: String,
    pub authorization: Option<String>,
    pub body: String,
}

/// Answers every call through `handler`, optionally after a delay.
pub struct FakeTransport {
    handler: Handler,
    latency: Option<Duration>,
    seen: Mutex<Vec<Seen>>,
}

impl FakeTransport {
    pub fn new(
        handler: impl Fn(&Request) -> Result<Response, TransportError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
            latency: None,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }

    pub fn calls_to(&self, target: &str) -> usize {
        self.seen().iter().filter(|s| s.target == target).count()
    }
}

impl Transport for FakeTransport {
    fn send<'a>(
        &'a self,
        request: &'a Request,
    ) -> Pin<Box<dyn Future<Output = Result<Response, TransportError>> + Send + 'a>> {
        Box::pin(async move {
            self.seen.lock().unwrap().push(Seen {
                method: request.method.clone(),
                target: request.target.clone(),
                authorization: request.bearer().map(str::to_owned),
                body: request
                    .body
                    .as_ref()
                    .map(|b| String::from_utf8_lossy(b).into_owned())
                    .unwrap_or_default(),
            });
            if let Some(latency) = self.latency {
                tokio::time::sleep(latency).await;
            }
            (self.handler)(request)
        })
    }
}

pub fn ok_json(body: &'static str) -> Result<Response, TransportError> {
    Ok(Response::new(StatusCode::OK, Bytes::from_static(body.as_bytes())))
}

pub fn status(code: u16, body: &'static str) -> Result<Response, TransportError> {
    Err(TransportError::Status {
        status: StatusCode::from_u16(code).unwrap(),
        body: Bytes::from_static(body.as_bytes()),
    })
}
