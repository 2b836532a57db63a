use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use log::error;
use reqwest::header::HeaderMap;
use reqwest::Method;

use crate::error::ProxyError;
use crate::upstream::{OutboundRequest, Transport, TransportFailure, UpstreamResponse};

/// Sends requests through the shared transport and turns its failures into
/// [`ProxyError`]s. Transport error text is logged, never returned.
pub struct Forwarder {
  transport: Arc<dyn Transport>,
  request_timeout: Duration,
}

impl Forwarder {
  pub fn new(transport: Arc<dyn Transport>, request_timeout: Duration) -> Self {
    Self {
      transport,
      request_timeout,
    }
  }

  pub async fn forward(
    &self,
    method: Method,
    url: String,
    headers: HeaderMap,
    body: Bytes,
  ) -> Result<UpstreamResponse, ProxyError> {
    let request = OutboundRequest {
      method: method.clone(),
      url: url.clone(),
      headers,
      body: if body.is_empty() { None } else { Some(body) },
    };

    self
      .transport
      .send(request)
      .await
      .map_err(|failure| self.classify(&method, &url, failure))
  }

  fn classify(&self, method: &Method, url: &str, failure: TransportFailure) -> ProxyError {
    match failure {
      TransportFailure::Timeout(cause) => {
        error!("Timeout error for {} {}: {}", method, url, cause);
        ProxyError::Timeout(format!("Request timed out after {}s", self.request_timeout.as_secs()))
      }
      TransportFailure::PoolTimeout(waited) => {
        error!("No upstream connection free for {} {} after {}s", method, url, waited.as_secs());
        ProxyError::Timeout(format!("No upstream connection available after {}s", waited.as_secs()))
      }
      TransportFailure::Connect(cause) => {
        error!("Connection error for {} {}: {}", method, url, cause);
        ProxyError::Unreachable("Unable to connect to target server".into())
      }
      TransportFailure::Request(cause) => {
        error!("Request error for {} {}: {}", method, url, cause);
        ProxyError::Transport("Upstream request failed".into())
      }
      TransportFailure::Internal(cause) => {
        error!("Unexpected error for {} {}: {}", method, url, cause);
        ProxyError::Transport("Internal proxy error".into())
      }
    }
  }
}
