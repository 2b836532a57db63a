use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use serde::Serialize;
use thiserror::Error;

use crate::upstream::BoxError;

/// Failure of a proxied request, raised before anything was sent to the client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProxyError {
  #[error("{0}")]
  Timeout(String),
  #[error("{0}")]
  Unreachable(String),
  #[error("{0}")]
  Transport(String),
  #[error("{0}")]
  InvalidRequest(String),
}

#[derive(Serialize)]
struct ErrorBody<'a> {
  error: &'a str,
  status_code: u16,
  path: &'a str,
}

impl ProxyError {
  pub fn status_code(&self) -> StatusCode {
    match self {
      ProxyError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
      ProxyError::Unreachable(_) | ProxyError::Transport(_) => StatusCode::BAD_GATEWAY,
      ProxyError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
    }
  }

  pub fn detail(&self) -> &str {
    match self {
      ProxyError::Timeout(detail)
      | ProxyError::Unreachable(detail)
      | ProxyError::Transport(detail)
      | ProxyError::InvalidRequest(detail) => detail,
    }
  }

  pub fn error_response(&self, path: &str) -> HttpResponse {
    let status = self.status_code();

    HttpResponse::build(status).json(ErrorBody {
      error: self.detail(),
      status_code: status.as_u16(),
      path,
    })
  }
}

/// Failure while streaming a response whose head is already on the wire.
#[derive(Error, Debug)]
pub enum RelayError {
  #[error("reading upstream body failed: {0}")]
  Read(#[source] BoxError),
}
