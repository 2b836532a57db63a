use std::sync::Arc;

use actix_web::dev::{ServiceFactory, ServiceRequest, ServiceResponse};
use actix_web::Error;
use futures_core::future::LocalBoxFuture;

use crate::proxy_service::forwarder::Forwarder;
use crate::proxy_service::proxy_config::ProxyConfig;
use crate::proxy_service::proxy_route_service::ProxyRouteService;
use crate::upstream::Transport;

#[derive(Clone)]
pub struct ProxyRouteServiceFactory {
  pub config: Arc<ProxyConfig>,
  pub forwarder: Arc<Forwarder>,
}

impl ServiceFactory<ServiceRequest> for ProxyRouteServiceFactory {
  type Response = ServiceResponse;
  type Error = Error;
  type Config = ();
  type Service = ProxyRouteService;
  type InitError = ();
  type Future = LocalBoxFuture<'static, Result<Self::Service, Self::InitError>>;

  fn new_service(&self, _: Self::Config) -> Self::Future {
    let service = ProxyRouteService {
      config: self.config.clone(),
      forwarder: self.forwarder.clone(),
    };

    Box::pin(async move { Ok(service) })
  }
}

impl ProxyRouteServiceFactory {
  pub fn create(transport: Arc<dyn Transport>, proxy_config: Arc<ProxyConfig>) -> Self {
    let forwarder = Forwarder::new(transport, proxy_config.request_timeout);

    Self {
      config: proxy_config,
      forwarder: Arc::new(forwarder),
    }
  }
}
