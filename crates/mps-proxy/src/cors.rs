//! CORS configuration for the proxy.

use actix_cors::Cors;
use actix_web::http::header::{self, HeaderName};

use crate::headers;

/// Build the CORS middleware from allowed origins. `*` allows any origin.
pub fn build_cors(allowed_origins: &[String]) -> Cors {
    let allowed = allowed_origins.to_vec();
    Cors::default()
        .allowed_origin_fn(move |origin, _req_head| {
            let origin_str = origin.to_str().unwrap_or("");
            allowed.iter().any(|a| a == "*" || a == origin_str)
        })
        .allowed_methods(vec!["GET", "POST", "DELETE", "OPTIONS"])
        .allowed_headers(
            [header::AUTHORIZATION, header::ACCEPT, header::CONTENT_TYPE]
                .into_iter()
                .chain(headers::REQUEST_HEADERS.iter().map(|h| lower(h))),
        )
        .expose_headers(
            [
                headers::PRICE,
                headers::RECEIVER_ADDRESS,
                headers::CONTRACT_ADDRESS,
                headers::TOKEN_ADDRESS,
                headers::GATEWAY_PATH,
                headers::SENDER_BALANCE,
                headers::PAYMENT_ERROR,
                headers::NONEXISTING_CHANNEL,
                headers::INVALID_PROOF,
                headers::COST,
            ]
            .iter()
            .map(|h| lower(h)),
        )
        .max_age(3600)
}

fn lower(name: &str) -> HeaderName {
    HeaderName::from_bytes(name.to_ascii_lowercase().as_bytes())
        .unwrap_or(header::CONTENT_TYPE)
}
