use std::sync::Arc;

use actix_web::dev::{Payload, Service, ServiceRequest, ServiceResponse};
use actix_web::http::header::{self, HeaderName, HeaderValue};
use actix_web::http::StatusCode;
use actix_web::{dev, Error, HttpRequest, HttpResponse};
use bytes::{Bytes, BytesMut};
use futures_core::future::LocalBoxFuture;
use futures_util::StreamExt;
use log::{error, info, warn};

use crate::error::ProxyError;
use crate::proxy_service::forwarder::Forwarder;
use crate::proxy_service::headers::{self as proxy_headers, ForwardingInfo};
use crate::proxy_service::proxy_config::ProxyConfig;
use crate::proxy_service::relay::relay;
use crate::proxy_service::target_url::{build_target_url, parse_query};
use crate::upstream::UpstreamResponse;

/// Catch-all service relaying every request it receives to the upstream.
///
/// This is the only place a [`ProxyError`] becomes a client response.
pub struct ProxyRouteService {
  pub(super) config: Arc<ProxyConfig>,
  pub(super) forwarder: Arc<Forwarder>,
}

impl Service<ServiceRequest> for ProxyRouteService {
  type Response = ServiceResponse;
  type Error = Error;
  type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

  dev::always_ready!();

  fn call(&self, req: ServiceRequest) -> Self::Future {
    let (http_request, payload) = req.into_parts();

    Box::pin(ProxyRouteService::exec(
      self.config.clone(),
      self.forwarder.clone(),
      http_request,
      payload,
    ))
  }
}

impl ProxyRouteService {
  async fn exec(
    config: Arc<ProxyConfig>,
    forwarder: Arc<Forwarder>,
    http: HttpRequest,
    payload: Payload,
  ) -> Result<ServiceResponse, Error> {
    let response = match ProxyRouteService::proxy(&config, &forwarder, &http, payload).await {
      Ok(response) => response,
      Err(err) => {
        warn!("Proxy exception: {} [Status: {}]", err, err.status_code().as_u16());
        err.error_response(http.path())
      }
    };

    Ok(ServiceResponse::new(http, response))
  }

  async fn proxy(
    config: &ProxyConfig,
    forwarder: &Forwarder,
    http: &HttpRequest,
    payload: Payload,
  ) -> Result<HttpResponse, ProxyError> {
    let query = parse_query(http.query_string());
    let target_url = build_target_url(&config.base_url, http.path(), &query);

    let method = reqwest::Method::from_bytes(http.method().as_str().as_bytes()).map_err(|err| {
      error!("Unsupported method {}: {}", http.method(), err);
      ProxyError::InvalidRequest("Invalid request".into())
    })?;

    let headers = ProxyRouteService::outbound_headers(config, http);
    let body = ProxyRouteService::read_body(payload).await?;

    info!("Proxying {} {}", method, target_url);

    let upstream = forwarder.forward(method, target_url.clone(), headers, body).await?;

    info!("Response {} from {}", upstream.status().as_u16(), target_url);

    ProxyRouteService::stream_response(config, upstream, target_url)
  }

  fn outbound_headers(config: &ProxyConfig, http: &HttpRequest) -> reqwest::header::HeaderMap {
    let client_ip = http.peer_addr().map(|addr| addr.ip().to_string()).unwrap_or_default();
    let scheme = if http.app_config().secure() { "https" } else { "http" };
    let host = http
      .headers()
      .get(header::HOST)
      .map(|value| value.as_bytes())
      .unwrap_or_default();

    let info = ForwardingInfo {
      client_ip: &client_ip,
      scheme,
      host,
    };

    let inbound = http
      .headers()
      .iter()
      .map(|(name, value)| (name.as_str(), value.as_bytes()));

    proxy_headers::outbound_headers(inbound, config.excluded_headers, &info)
  }

  async fn read_body(mut payload: Payload) -> Result<Bytes, ProxyError> {
    let mut body_buffer = BytesMut::new();

    while let Some(chunk) = payload.next().await {
      match chunk {
        Ok(bytes) => body_buffer.extend_from_slice(&bytes),
        Err(err) => {
          error!("Reading request body failed {}", err);
          return Err(ProxyError::InvalidRequest("Invalid request".into()));
        }
      }
    }

    Ok(body_buffer.freeze())
  }

  fn stream_response(
    config: &ProxyConfig,
    upstream: UpstreamResponse,
    target_url: String,
  ) -> Result<HttpResponse, ProxyError> {
    let status = StatusCode::from_u16(upstream.status().as_u16()).map_err(|err| {
      error!("Upstream status {} not representable: {}", upstream.status(), err);
      ProxyError::Transport("Internal proxy error".into())
    })?;

    let mut response = HttpResponse::build(status);
    for (name, value) in proxy_headers::response_headers(upstream.headers(), config.excluded_headers).iter() {
      let pair = (
        HeaderName::from_bytes(name.as_str().as_bytes()),
        HeaderValue::from_bytes(value.as_bytes()),
      );

      if let (Ok(name), Ok(value)) = pair {
        response.append_header((name, value));
      }
    }

    Ok(response.streaming(relay(upstream, config.buffer_size, target_url)))
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use actix_web::test::{self, TestRequest};
  use actix_web::App;
  use tokio::io::{AsyncReadExt, AsyncWriteExt};
  use tokio::net::TcpListener;

  use super::*;
  use crate::http_client::{HttpClientConfig, TransportManager};
  use crate::proxy_service::headers::EXCLUDED_HEADERS;
  use crate::proxy_service::proxy_factory::ProxyRouteServiceFactory;
  use crate::upstream::testing::{FakeResponse, FakeTransport, FAKE_SLOTS};
  use crate::upstream::TransportFailure;

  fn config() -> Arc<ProxyConfig> {
    Arc::new(ProxyConfig {
      base_url: Box::from("http://upstream.test/"),
      request_timeout: Duration::from_secs(300),
      buffer_size: 4,
      excluded_headers: &EXCLUDED_HEADERS,
    })
  }

  fn factory(transport: &Arc<FakeTransport>) -> ProxyRouteServiceFactory {
    ProxyRouteServiceFactory::create(transport.clone(), config())
  }

  async fn json_body(response: ServiceResponse) -> serde_json::Value {
    serde_json::from_slice(&test::read_body(response).await).unwrap()
  }

  #[actix_web::test]
  async fn request_is_rebuilt_for_the_upstream() {
    let transport = Arc::new(FakeTransport::new(|_| Ok(FakeResponse::ok("ok"))));
    let app = test::init_service(App::new().default_service(factory(&transport))).await;

    let request = TestRequest::post()
      .uri("/v1/chat/completions?stream=true&tag=a&tag=b")
      .peer_addr("10.0.0.7:51000".parse().unwrap())
      .insert_header(("Host", "proxy.example"))
      .insert_header(("Connection", "keep-alive"))
      .insert_header(("Content-Length", "5"))
      .insert_header(("Authorization", "Bearer token"))
      .set_payload("hello")
      .to_request();

    let response = test::call_service(&app, request).await;
    assert_eq!(response.status(), StatusCode::OK);

    let sent = transport.sent.lock().unwrap();
    let outbound = &sent[0];
    assert_eq!(outbound.method, reqwest::Method::POST);
    assert_eq!(
      outbound.url,
      "http://upstream.test/v1/chat/completions?stream=true&tag=a&tag=b"
    );
    assert!(!outbound.headers.contains_key("content-length"));
    assert!(!outbound.headers.contains_key("connection"));
    assert!(!outbound.headers.contains_key("host"));
    assert_eq!(outbound.headers["authorization"], "Bearer token");
    assert_eq!(outbound.headers["x-forwarded-for"], "10.0.0.7");
    assert_eq!(outbound.headers["x-real-ip"], "10.0.0.7");
    assert_eq!(outbound.headers["x-forwarded-proto"], "http");
    assert_eq!(outbound.headers["x-forwarded-host"], "proxy.example");
    assert_eq!(outbound.headers["user-agent"], proxy_headers::DEFAULT_USER_AGENT);
    assert_eq!(outbound.body.as_deref(), Some(&b"hello"[..]));
  }

  #[actix_web::test]
  async fn root_path_goes_to_the_base_url() {
    let transport = Arc::new(FakeTransport::new(|_| Ok(FakeResponse::ok(""))));
    let app = test::init_service(App::new().default_service(factory(&transport))).await;

    test::call_service(&app, TestRequest::get().uri("/").to_request()).await;

    let sent = transport.sent.lock().unwrap();
    assert_eq!(sent[0].url, "http://upstream.test");
    assert!(sent[0].body.is_none());
  }

  #[actix_web::test]
  async fn chunked_upstream_is_reframed_for_the_client() {
    let transport = Arc::new(FakeTransport::new(|_| {
      Ok(FakeResponse {
        status: 201,
        headers: vec![
          ("transfer-encoding", "chunked"),
          ("content-type", "text/event-stream"),
          ("x-upstream", "yes"),
        ],
        chunks: vec![Ok("data: "), Ok("one\n\n"), Ok("data: two\n\n")],
      })
    }));
    let app = test::init_service(App::new().default_service(factory(&transport))).await;

    let response = test::call_service(&app, TestRequest::get().uri("/events").to_request()).await;

    assert_eq!(response.status(), StatusCode::CREATED);
    assert!(response.headers().get("transfer-encoding").is_none());
    assert_eq!(*response.headers().get("content-type").unwrap(), "text/event-stream");
    assert_eq!(*response.headers().get("x-upstream").unwrap(), "yes");
    assert_eq!(*response.headers().get("x-proxy-by").unwrap(), proxy_headers::PROXY_MARKER);

    let body = test::read_body(response).await;
    assert_eq!(body, Bytes::from_static(b"data: one\n\ndata: two\n\n"));
    assert_eq!(transport.free_slots(), FAKE_SLOTS);
  }

  #[actix_web::test]
  async fn upstream_error_status_is_passed_through() {
    let transport = Arc::new(FakeTransport::new(|_| {
      Ok(FakeResponse {
        status: 404,
        headers: vec![("content-type", "application/json")],
        chunks: vec![Ok("{\"detail\":\"missing\"}")],
      })
    }));
    let app = test::init_service(App::new().default_service(factory(&transport))).await;

    let response = test::call_service(&app, TestRequest::get().uri("/missing").to_request()).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await, serde_json::json!({ "detail": "missing" }));
  }

  #[actix_web::test]
  async fn refused_upstream_answers_bad_gateway() {
    let transport = Arc::new(FakeTransport::new(|_| {
      Err(TransportFailure::Connect("connection refused".into()))
    }));
    let app = test::init_service(App::new().default_service(factory(&transport))).await;

    let response = test::call_service(&app, TestRequest::get().uri("/v1/chat").to_request()).await;

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert!(response.headers().get("x-proxy-by").is_none());
    assert_eq!(
      json_body(response).await,
      serde_json::json!({
        "error": "Unable to connect to target server",
        "status_code": 502,
        "path": "/v1/chat",
      })
    );
  }

  #[actix_web::test]
  async fn slow_upstream_answers_gateway_timeout() {
    let transport = Arc::new(FakeTransport::new(|_| {
      Err(TransportFailure::Timeout("read timed out".into()))
    }));
    let app = test::init_service(App::new().default_service(factory(&transport))).await;

    let response = test::call_service(&app, TestRequest::get().uri("/slow").to_request()).await;

    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    let body = json_body(response).await;
    assert_eq!(body["error"], "Request timed out after 300s");
    assert_eq!(body["status_code"], 504);
  }

  #[actix_web::test]
  async fn identical_requests_derive_identical_upstream_requests() {
    let transport = Arc::new(FakeTransport::new(|_| Ok(FakeResponse::ok("same"))));
    let app = test::init_service(App::new().default_service(factory(&transport))).await;

    for _ in 0..2 {
      let request = TestRequest::get()
        .uri("/v1/models?b=2&a=1")
        .peer_addr("192.168.1.5:4000".parse().unwrap())
        .insert_header(("Accept", "application/json"))
        .to_request();
      test::call_service(&app, request).await;
    }

    let sent = transport.sent.lock().unwrap();
    assert_eq!(sent[0].url, sent[1].url);
    assert_eq!(sent[0].headers, sent[1].headers);
  }

  const GZIP_HELLO: &[u8] = b"\x1f\x8b\x08\x00\x00\x00\x00\x00\x00\x03\xcb\x48\xcd\xc9\xc9\x07\x00\x86\xa6\x10\x36\x05\x00\x00\x00";

  #[actix_web::test]
  async fn compressed_upstream_reaches_the_client_decoded() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
      let (mut socket, _) = listener.accept().await.unwrap();
      let mut buf = [0u8; 4096];
      let _ = socket.read(&mut buf).await;

      let mut reply = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Encoding: gzip\r\nContent-Length: {}\r\n\r\n",
        GZIP_HELLO.len()
      )
      .into_bytes();
      reply.extend_from_slice(GZIP_HELLO);
      socket.write_all(&reply).await.unwrap();
    });

    let transport = Arc::new(TransportManager::new(HttpClientConfig {
      request_timeout: Duration::from_secs(5),
      ssl_verify: true,
    }));
    transport.initialize().unwrap();

    let config = Arc::new(ProxyConfig {
      base_url: format!("http://{}", addr).into_boxed_str(),
      request_timeout: Duration::from_secs(5),
      buffer_size: 8192,
      excluded_headers: &EXCLUDED_HEADERS,
    });
    let factory = ProxyRouteServiceFactory::create(transport.clone(), config);
    let app = test::init_service(App::new().default_service(factory)).await;

    let request = TestRequest::get()
      .uri("/greeting")
      .insert_header(("Accept-Encoding", "gzip"))
      .to_request();
    let response = test::call_service(&app, request).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get("content-encoding").is_none());
    assert_eq!(test::read_body(response).await, Bytes::from_static(b"hello"));
  }
}
