use std::sync::{Arc, RwLock};
use std::time::Duration;

use futures_core::future::BoxFuture;
use futures_util::TryStreamExt;
use log::{debug, info};
use reqwest::redirect::Policy;
use reqwest::Client;
use tokio::sync::Semaphore;

use crate::settings::Settings;
use crate::upstream::{BoxError, ConnectionLease, OutboundRequest, Transport, TransportFailure, UpstreamResponse};

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const POOL_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);
pub const MAX_CONNECTIONS: usize = 100;
pub const MAX_IDLE_CONNECTIONS: usize = 20;

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
  pub request_timeout: Duration,
  pub ssl_verify: bool,
}

impl From<&Settings> for HttpClientConfig {
  fn from(settings: &Settings) -> Self {
    HttpClientConfig {
      request_timeout: Duration::from_secs(settings.request_timeout),
      ssl_verify: settings.ssl_verify,
    }
  }
}

impl HttpClientConfig {
  pub fn to_client(&self) -> Result<Client, reqwest::Error> {
    let mut client_builder = reqwest::ClientBuilder::new()
      .connect_timeout(CONNECT_TIMEOUT)
      .read_timeout(self.request_timeout)
      .pool_max_idle_per_host(MAX_IDLE_CONNECTIONS)
      .redirect(Policy::none());

    if !self.ssl_verify {
      client_builder = client_builder.danger_accept_invalid_certs(true);
    }

    client_builder.build()
  }
}

/// Owns the single upstream client and the slots bounding how many requests
/// may use it at once.
pub struct TransportManager {
  config: HttpClientConfig,
  client: RwLock<Option<Client>>,
  slots: Arc<Semaphore>,
  acquire_timeout: Duration,
}

impl TransportManager {
  pub fn new(config: HttpClientConfig) -> Self {
    TransportManager::with_limits(config, MAX_CONNECTIONS, POOL_ACQUIRE_TIMEOUT)
  }

  pub fn with_limits(config: HttpClientConfig, max_connections: usize, acquire_timeout: Duration) -> Self {
    Self {
      config,
      client: RwLock::new(None),
      slots: Arc::new(Semaphore::new(max_connections)),
      acquire_timeout,
    }
  }

  pub fn initialize(&self) -> Result<(), reqwest::Error> {
    let client = self.config.to_client()?;
    let mut guard = self.client.write().unwrap_or_else(|poisoned| poisoned.into_inner());
    *guard = Some(client);
    debug!(
      "Upstream client ready (connect {:?}, read {:?}, tls verify {})",
      CONNECT_TIMEOUT, self.config.request_timeout, self.config.ssl_verify
    );
    Ok(())
  }

  /// Drops the pooled client. Requests still streaming keep their connection
  /// until they finish; new requests are refused.
  pub fn close(&self) {
    let mut guard = self.client.write().unwrap_or_else(|poisoned| poisoned.into_inner());
    if guard.take().is_some() {
      info!("Upstream connection pool closed");
    }
  }

  pub fn available_connections(&self) -> usize {
    self.slots.available_permits()
  }

  fn client(&self) -> Result<Client, TransportFailure> {
    let guard = self
      .client
      .read()
      .map_err(|_| TransportFailure::Internal("client lock poisoned".into()))?;

    guard
      .clone()
      .ok_or_else(|| TransportFailure::Internal("transport is not initialized".into()))
  }

  async fn execute(&self, request: OutboundRequest) -> Result<UpstreamResponse, TransportFailure> {
    let client = self.client()?;

    let permit = match tokio::time::timeout(self.acquire_timeout, self.slots.clone().acquire_owned()).await {
      Ok(Ok(permit)) => permit,
      Ok(Err(_)) => return Err(TransportFailure::Internal("connection slots closed".into())),
      Err(_) => return Err(TransportFailure::PoolTimeout(self.acquire_timeout)),
    };
    debug!("Upstream slot acquired, {} left", self.available_connections());

    let OutboundRequest { method, url, headers, body } = request;
    let mut builder = client.request(method, url).headers(headers);
    if let Some(body) = body {
      builder = builder.body(body);
    }

    let response = builder.send().await?;
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.bytes_stream().map_err(|err| -> BoxError { Box::new(err) });

    Ok(UpstreamResponse::new(status, headers, Box::pin(body), ConnectionLease::new(permit)))
  }
}

impl Transport for TransportManager {
  fn send(&self, request: OutboundRequest) -> BoxFuture<'_, Result<UpstreamResponse, TransportFailure>> {
    Box::pin(self.execute(request))
  }
}
