use std::time::Duration;

/// Per-process view of the settings the forwarding path reads. TLS policy
/// belongs to the transport and lives in `HttpClientConfig`.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
  pub base_url: Box<str>,
  pub request_timeout: Duration,
  pub buffer_size: usize,
  pub excluded_headers: &'static [&'static str],
}
