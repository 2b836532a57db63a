use actix_web::{guard, web, HttpResponse};
use log::debug;
use serde::Serialize;

use crate::settings::Settings;

#[derive(Serialize)]
struct HealthStatus<'a> {
    status: &'static str,
    target_url: &'a str,
    timeout: u64,
    ssl_verify: bool,
}

/// Local endpoints. They only match GET, any other method on these paths is
/// proxied like everything else.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/api/health").guard(guard::Get()).to(health_check))
        .service(web::resource("/api/ping").guard(guard::Get()).to(ping));
}

async fn health_check(settings: web::Data<Settings>) -> HttpResponse {
    debug!("Health check called");

    HttpResponse::Ok().json(HealthStatus {
        status: "healthy",
        target_url: &settings.target_url,
        timeout: settings.request_timeout,
        ssl_verify: settings.ssl_verify,
    })
}

async fn ping() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "message": "pong" }))
}

#[cfg(test)]
mod tests {
    use actix_web::http::StatusCode;
    use actix_web::test::{self, TestRequest};
    use actix_web::App;

    use super::*;

    #[actix_web::test]
    async fn health_reports_the_upstream() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(Settings::default()))
                .configure(configure),
        )
        .await;

        let body: serde_json::Value =
            test::call_and_read_body_json(&app, TestRequest::get().uri("/api/health").to_request()).await;

        assert_eq!(
            body,
            serde_json::json!({
                "status": "healthy",
                "target_url": "https://ai.megallm.io",
                "timeout": 300,
                "ssl_verify": true,
            })
        );
    }

    #[actix_web::test]
    async fn ping_answers_pong() {
        let app = test::init_service(App::new().configure(configure)).await;

        let body: serde_json::Value =
            test::call_and_read_body_json(&app, TestRequest::get().uri("/api/ping").to_request()).await;

        assert_eq!(body, serde_json::json!({ "message": "pong" }));
    }

    #[actix_web::test]
    async fn other_methods_fall_through() {
        let app = test::init_service(
            App::new()
                .configure(configure)
                .default_service(web::to(|| async { HttpResponse::Accepted().finish() })),
        )
        .await;

        let response = test::call_service(&app, TestRequest::post().uri("/api/ping").to_request()).await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }
}
