use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::Bytes;
use futures_core::Stream;
use log::{debug, error};

use crate::error::RelayError;
use crate::upstream::{BodyStream, ConnectionLease, UpstreamResponse};

/// Streams an upstream body to the client in chunks of at most `chunk_size`
/// bytes.
///
/// The connection lease goes back exactly once: when the body ends, when a
/// read fails, or when the stream is dropped before either (client went away).
pub struct RelayStream {
  body: Option<BodyStream>,
  lease: Option<ConnectionLease>,
  pending: Bytes,
  chunk_size: usize,
  relayed: usize,
  url: String,
}

pub fn relay(response: UpstreamResponse, chunk_size: usize, url: String) -> RelayStream {
  let (body, lease) = response.into_body();

  RelayStream {
    body: Some(body),
    lease: Some(lease),
    pending: Bytes::new(),
    chunk_size: chunk_size.max(1),
    relayed: 0,
    url,
  }
}

impl RelayStream {
  fn release(&mut self) {
    self.body = None;
    if let Some(lease) = self.lease.take() {
      debug!("Relay for {} finished after {} bytes", self.url, self.relayed);
      lease.release();
    }
  }

  fn next_chunk(&mut self) -> Bytes {
    let size = self.chunk_size.min(self.pending.len());
    self.relayed += size;
    self.pending.split_to(size)
  }
}

impl Stream for RelayStream {
  type Item = Result<Bytes, RelayError>;

  fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
    let this = self.get_mut();

    loop {
      if !this.pending.is_empty() {
        return Poll::Ready(Some(Ok(this.next_chunk())));
      }

      let Some(body) = this.body.as_mut() else {
        return Poll::Ready(None);
      };

      match ready!(body.as_mut().poll_next(cx)) {
        Some(Ok(bytes)) => this.pending = bytes,
        Some(Err(err)) => {
          error!("Error streaming response from {}: {}", this.url, err);
          this.release();
          return Poll::Ready(Some(Err(RelayError::Read(err))));
        }
        None => {
          this.release();
          return Poll::Ready(None);
        }
      }
    }
  }
}

impl Drop for RelayStream {
  fn drop(&mut self) {
    if self.lease.is_some() {
      debug!("Client stopped reading {}, aborting relay", self.url);
    }
    self.release();
  }
}
