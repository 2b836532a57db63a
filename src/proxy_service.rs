use std::time::Duration;

use crate::proxy_service::proxy_config::ProxyConfig;
use crate::settings::Settings;

pub mod forwarder;
pub mod headers;
pub mod proxy_config;
pub mod proxy_factory;
pub mod proxy_route_service;
pub mod relay;
pub mod target_url;

impl From<&Settings> for ProxyConfig {
  fn from(settings: &Settings) -> Self {
    ProxyConfig {
      base_url: Box::from(settings.target_url.as_str()),
      request_timeout: Duration::from_secs(settings.request_timeout),
      buffer_size: settings.proxy_buffer_size,
      excluded_headers: &headers::EXCLUDED_HEADERS,
    }
  }
}
