//! Types shared between the forwarding pipeline and whatever carries requests
//! to the upstream.
//!
//! The pipeline only talks to a [`Transport`]; the production implementation
//! is [`crate::http_client::TransportManager`], tests plug in a scripted fake.

use std::error::Error as StdError;
use std::io;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures_core::future::BoxFuture;
use futures_core::Stream;
use log::debug;
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use thiserror::Error;
use tokio::sync::OwnedSemaphorePermit;

pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Lazily pulled upstream response body.
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, BoxError>> + Send>>;

pub struct OutboundRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    /// `None` when the inbound request carried no bytes.
    pub body: Option<Bytes>,
}

/// Failure reported by a transport before any response head was received.
#[derive(Error, Debug)]
pub enum TransportFailure {
    #[error("timed out: {0}")]
    Timeout(String),
    /// Every connection slot stayed taken for the whole acquire window.
    #[error("no upstream connection available within {}s", .0.as_secs())]
    PoolTimeout(Duration),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("internal transport fault: {0}")]
    Internal(String),
}

impl From<reqwest::Error> for TransportFailure {
    fn from(err: reqwest::Error) -> Self {
        // A connect timeout reports both flags; it counts as a timeout.
        if err.is_timeout() || caused_by_timeout(&err) {
            TransportFailure::Timeout(err.to_string())
        } else if err.is_connect() {
            TransportFailure::Connect(err.to_string())
        } else if err.is_builder() {
            TransportFailure::Internal(err.to_string())
        } else {
            TransportFailure::Request(err.to_string())
        }
    }
}

fn caused_by_timeout(err: &(dyn StdError + 'static)) -> bool {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            if io_err.kind() == io::ErrorKind::TimedOut {
                return true;
            }
        }
        source = cause.source();
    }
    false
}

/// Claim on one of the transport's upstream connection slots.
///
/// The slot is returned when the lease is released or dropped. Ownership makes
/// a second release impossible.
#[derive(Debug)]
pub struct ConnectionLease {
    permit: OwnedSemaphorePermit,
}

impl ConnectionLease {
    pub fn new(permit: OwnedSemaphorePermit) -> Self {
        Self { permit }
    }

    pub fn release(self) {
        debug!("Returning upstream connection slot");
        drop(self.permit);
    }
}

pub struct UpstreamResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: BodyStream,
    lease: ConnectionLease,
}

impl UpstreamResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: BodyStream, lease: ConnectionLease) -> Self {
        Self {
            status,
            headers,
            body,
            lease,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub(crate) fn into_body(self) -> (BodyStream, ConnectionLease) {
        (self.body, self.lease)
    }
}

/// Carries one outbound request to the upstream and hands back the response
/// head together with its still-unread body.
pub trait Transport: Send + Sync {
    fn send(&self, request: OutboundRequest) -> BoxFuture<'_, Result<UpstreamResponse, TransportFailure>>;
}
