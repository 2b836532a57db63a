use std::future::Future;
use std::time::Instant;

use actix_web::dev::{Service, ServiceRequest, ServiceResponse};
use actix_web::http::header::{HeaderName, HeaderValue};
use actix_web::Error;
use chrono::Utc;
use log::info;

const X_REQUEST_ID: &str = "x-request-id";
const X_PROCESS_TIME: &str = "x-process-time";

/// Logs start and completion of every request and stamps the response with
/// its id and processing time. For streamed responses the time covers the
/// head only.
pub fn log_request<S, B>(req: ServiceRequest, srv: &S) -> impl Future<Output = Result<ServiceResponse<B>, Error>>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
{
    let started = Instant::now();
    let request_id = req
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|value| value.to_str().ok())
        .map(String::from)
        .unwrap_or_else(|| Utc::now().timestamp_millis().to_string());
    let method = req.method().clone();
    let path = req.path().to_owned();
    let client = req
        .peer_addr()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".into());

    info!("Request started: {} {} [Client: {}] [ID: {}]", method, path, client, request_id);

    let response = srv.call(req);

    async move {
        let mut response = response.await?;
        let elapsed = started.elapsed().as_secs_f64();

        let headers = response.headers_mut();
        if let Ok(value) = HeaderValue::from_str(&elapsed.to_string()) {
            headers.insert(HeaderName::from_static(X_PROCESS_TIME), value);
        }
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            headers.insert(HeaderName::from_static(X_REQUEST_ID), value);
        }

        info!(
            "Request completed: {} {} [Status: {}] [Time: {:.3}s] [ID: {}]",
            method,
            path,
            response.status().as_u16(),
            elapsed,
            request_id
        );

        Ok(response)
    }
}
