mod error;
mod health;
mod http_client;
mod proxy_service;
mod request_logging;
mod settings;
mod std_logger;
mod upstream;

use std::io::{Error, ErrorKind, Result};
use std::sync::Arc;

use actix_cors::Cors;
use actix_web::middleware::Condition;
use actix_web::{web, App, HttpServer};
use clap::Parser;
use log::{debug, info};

use http_client::{HttpClientConfig, TransportManager};
use proxy_service::proxy_config::ProxyConfig;
use proxy_service::proxy_factory::ProxyRouteServiceFactory;
use settings::{Cli, Settings};

#[actix_web::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(&cli).map_err(|err| Error::new(ErrorKind::Other, err))?;

    let level = settings.log_level_filter().map_err(|err| Error::new(ErrorKind::Other, err))?;
    std_logger::init(level).map_err(|err| Error::new(ErrorKind::Other, err))?;

    info!("Starting AI Proxy Service");
    info!("Target URL: {}", settings.target_url);
    info!("Timeout: {}s", settings.request_timeout);
    debug!(
        "Retry settings (not applied): max_retries={} backoff_factor={}",
        settings.max_retries, settings.retry_backoff_factor
    );

    let transport = Arc::new(TransportManager::new(HttpClientConfig::from(&settings)));
    transport
        .initialize()
        .map_err(|err| Error::new(ErrorKind::Other, err))?;
    info!("Proxy service initialized");

    let proxy_config = Arc::new(ProxyConfig::from(&settings));
    let proxy_factory = ProxyRouteServiceFactory::create(transport.clone(), proxy_config);
    let app_settings = web::Data::new(settings.clone());

    let server = HttpServer::new(move || {
        App::new()
            .app_data(app_settings.clone())
            .wrap(Condition::new(app_settings.enable_cors, cors(&app_settings)))
            .wrap_fn(request_logging::log_request)
            .configure(health::configure)
            .default_service(proxy_factory.clone())
    })
        .workers(settings.max_workers)
        .bind((settings.host.as_str(), settings.port))?
        .run();

    let result = server.await;

    info!("Shutting down AI Proxy Service");
    transport.close();
    info!("Proxy service closed");

    result
}

fn cors(settings: &Settings) -> Cors {
    let any = |values: &[String]| values.iter().any(|value| value == "*");
    let mut cors = Cors::default().supports_credentials();

    cors = if any(&settings.cors_origins) {
        cors.allow_any_origin()
    } else {
        settings
            .cors_origins
            .iter()
            .fold(cors, |cors, origin| cors.allowed_origin(origin))
    };

    cors = if any(&settings.cors_methods) {
        cors.allow_any_method()
    } else {
        cors.allowed_methods(settings.cors_methods.iter().map(String::as_str))
    };

    if any(&settings.cors_headers) {
        cors.allow_any_header()
    } else {
        cors.allowed_headers(settings.cors_headers.iter().map(String::as_str))
    }
}
