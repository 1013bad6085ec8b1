use actix_web::{web, HttpRequest, HttpResponse};
use mps::security::bearer_matches;

use crate::metrics::REGISTRY;
use crate::state::AppState;

/// GET /health - Health check endpoint
///
/// Degraded until the channel manager has synchronized.
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    let synced = state.directory.is_synced();
    let response = serde_json::json!({
        "status": if synced { "ok" } else { "degraded" },
        "service": "mps-proxy",
        "version": env!("CARGO_PKG_VERSION"),
        "synced": synced,
    });

    if synced {
        HttpResponse::Ok().json(response)
    } else {
        HttpResponse::ServiceUnavailable().json(response)
    }
}

/// GET /metrics - Prometheus metrics endpoint (optionally auth-gated)
pub async fn metrics(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    if let Some(ref expected_token) = state.metrics_token {
        let header = req
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok());
        if !bearer_matches(header, expected_token) {
            return HttpResponse::Unauthorized().json(serde_json::json!({
                "error": "unauthorized",
                "message": "Valid Bearer token required for /metrics"
            }));
        }
    }

    use prometheus::Encoder;

    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return HttpResponse::InternalServerError().body("Failed to encode metrics");
    }

    let output = String::from_utf8(buffer).unwrap_or_default();
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(output)
}
