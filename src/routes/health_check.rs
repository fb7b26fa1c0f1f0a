use actix_web::HttpResponse;
use serde::Serialize;

use crate::routes::Success;

#[derive(Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
}

/// GET /health_check
pub async fn health_check() -> HttpResponse {
    tracing::debug!("Health check endpoint called");
    HttpResponse::Ok().json(Success::new(HealthStatus { status: "ok" }))
}
