//! Forwarding of paid requests to an operator-configured upstream.

use std::time::Instant;

use actix_web::{HttpRequest, HttpResponse};
use bytes::Bytes;
use url::Url;

use crate::error::ProxyError;
use crate::headers;
use crate::metrics::{UPSTREAM_LATENCY, UPSTREAM_REQUESTS_TOTAL};
use crate::middleware::PaymentReceipt;

/// Headers to strip from client request before proxying
const HEADERS_TO_STRIP: &[&str] = &[
    "host",
    "connection",
    "keep-alive",
    "transfer-encoding",
    "content-length",
    // Credentials are for the proxy, not the upstream
    "authorization",
    "cookie",
    "proxy-authorization",
    // Balance proof headers
    "rdn-sender-address",
    "rdn-open-block",
    "rdn-balance",
    "rdn-balance-signature",
    // Set by the proxy; never trust the client's copy
    "x-mps-paid",
    "x-mps-sender",
    "x-mps-open-block",
];

/// Allowlist of response headers to forward from the upstream.
const ALLOWED_RESPONSE_HEADERS: &[&str] = &[
    "content-type",
    "content-length",
    "content-encoding",
    "content-disposition",
    "cache-control",
    "etag",
    "last-modified",
    "date",
    "vary",
    "x-request-id",
];

/// Maximum upstream response body size (10 MB).
const MAX_RESPONSE_BODY_SIZE: usize = 10 * 1024 * 1024;

/// `base` joined with the path remainder and the request's query string.
pub fn target_url(base: &Url, remainder: &str, query: &str) -> Result<Url, ProxyError> {
    let mut url = base.clone();
    if !remainder.is_empty() {
        let segments: Vec<String> = remainder
            .split('/')
            .filter(|s| !s.is_empty() && *s != "." && *s != "..")
            .map(|s| {
                urlencoding::decode(s)
                    .map(|d| d.into_owned())
                    .unwrap_or_else(|_| s.to_string())
            })
            .collect();
        url.path_segments_mut()
            .map_err(|_| ProxyError::Upstream(format!("upstream URL cannot be a base: {base}")))?
            .pop_if_empty()
            .extend(segments.iter());
    }
    if !query.is_empty() {
        url.set_query(Some(query));
    }
    Ok(url)
}

/// Forward `original_req` to `target` and relay the response.
pub async fn forward(
    client: &reqwest::Client,
    original_req: &HttpRequest,
    target: Url,
    body: Bytes,
    receipt: Option<&PaymentReceipt>,
) -> Result<HttpResponse, ProxyError> {
    let method = reqwest::Method::from_bytes(original_req.method().as_str().as_bytes())
        .map_err(|_| {
            ProxyError::BadRequest(format!("unsupported HTTP method: {}", original_req.method()))
        })?;

    let mut request_builder = client.request(method, target.as_str());

    // Copy headers from original request (except stripped ones)
    for (name, value) in original_req.headers() {
        let name_lower = name.as_str().to_lowercase();
        if !HEADERS_TO_STRIP.contains(&name_lower.as_str()) {
            if let Ok(value_str) = value.to_str() {
                request_builder = request_builder.header(name.as_str(), value_str);
            }
        }
    }

    if let Some(receipt) = receipt {
        request_builder = request_builder
            .header("X-MPS-Paid", receipt.cost.to_string())
            .header("X-MPS-Sender", format!("{:#x}", receipt.key.sender))
            .header("X-MPS-Open-Block", receipt.key.open_block.to_string());
    }

    if !body.is_empty() {
        request_builder = request_builder.body(body.to_vec());
    }

    UPSTREAM_REQUESTS_TOTAL.inc();
    let started = Instant::now();
    let mut response = request_builder.send().await.map_err(|e| {
        tracing::error!(error = %e, "upstream request failed");
        ProxyError::Upstream("upstream request failed".to_string())
    })?;

    let status = response.status();
    let upstream_headers = response.headers().clone();

    if let Some(cl) = response.content_length() {
        if cl > MAX_RESPONSE_BODY_SIZE as u64 {
            return Err(ProxyError::Upstream(format!(
                "upstream response too large: {} bytes (max {})",
                cl, MAX_RESPONSE_BODY_SIZE
            )));
        }
    }

    // Enforce the size limit while reading; chunked responses carry no length.
    let mut body_buf = Vec::with_capacity(
        response
            .content_length()
            .map(|cl| cl as usize)
            .unwrap_or(8192)
            .min(MAX_RESPONSE_BODY_SIZE),
    );
    while let Some(chunk) = response.chunk().await.map_err(|e| {
        tracing::error!(error = %e, "failed to read upstream response body");
        ProxyError::Upstream("failed to read upstream response".to_string())
    })? {
        if body_buf.len() + chunk.len() > MAX_RESPONSE_BODY_SIZE {
            return Err(ProxyError::Upstream(format!(
                "upstream response too large (max {} bytes)",
                MAX_RESPONSE_BODY_SIZE
            )));
        }
        body_buf.extend_from_slice(&chunk);
    }
    UPSTREAM_LATENCY.observe(started.elapsed().as_secs_f64());

    let mut builder = HttpResponse::build(
        actix_web::http::StatusCode::from_u16(status.as_u16())
            .unwrap_or(actix_web::http::StatusCode::BAD_GATEWAY),
    );

    // Copy only allowlisted response headers from upstream
    for (name, value) in upstream_headers.iter() {
        let name_lower = name.as_str().to_lowercase();
        if ALLOWED_RESPONSE_HEADERS.contains(&name_lower.as_str()) {
            if let Ok(value_str) = value.to_str() {
                builder.insert_header((name.as_str(), value_str));
            }
        }
    }
    if let Some(receipt) = receipt {
        builder
            .insert_header((headers::COST, receipt.cost.to_string()))
            .insert_header((headers::SENDER_BALANCE, receipt.balance.to_string()));
    }

    Ok(builder.body(Bytes::from(body_buf)))
}
