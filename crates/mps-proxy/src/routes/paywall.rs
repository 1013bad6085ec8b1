use actix_web::{web, HttpRequest, HttpResponse};

use crate::content::ContentSource;
use crate::error::ProxyError;
use crate::headers;
use crate::metrics::REQUESTS_TOTAL;
use crate::middleware::{require_payment, PaymentReceipt};
use crate::state::AppState;
use crate::upstream;

/// Catch-all for paywalled content.
///
/// Unknown paths are 404 before any payment check, so clients never pay for
/// nothing. Paid requests are recorded before the body is produced.
pub async fn serve(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Bytes,
) -> Result<HttpResponse, ProxyError> {
    let path = req.match_info().query("content").to_string();
    let method = req.method().to_string();

    let Some(content) = state.content.lookup(&path) else {
        REQUESTS_TOTAL.with_label_values(&[method.as_str(), "404"]).inc();
        return Err(ProxyError::ContentNotFound(path));
    };

    let receipt = match require_payment(&req, &state, content.price()) {
        Ok(receipt) => receipt,
        Err(payment_required) => {
            REQUESTS_TOTAL.with_label_values(&[method.as_str(), "402"]).inc();
            return Ok(payment_required);
        }
    };

    let remainder = content.remainder(&path);
    let response = match content.source() {
        ContentSource::Static(fixed) => {
            let mut builder = HttpResponse::Ok();
            builder.content_type(fixed.content_type.as_str());
            insert_receipt(&mut builder, receipt.as_ref());
            builder.body(fixed.body.clone())
        }
        ContentSource::Generated(generate) => {
            let generated = generate(remainder);
            let mut builder = HttpResponse::Ok();
            builder.content_type(generated.content_type.as_str());
            insert_receipt(&mut builder, receipt.as_ref());
            builder.body(generated.body)
        }
        ContentSource::Upstream(base) => {
            let target = upstream::target_url(base, remainder, req.query_string())?;
            tracing::debug!(path = %path, target = %target, "forwarding to upstream");
            upstream::forward(&state.http_client, &req, target, body, receipt.as_ref()).await?
        }
    };

    REQUESTS_TOTAL
        .with_label_values(&[method.as_str(), response.status().as_str()])
        .inc();
    Ok(response)
}

fn insert_receipt(builder: &mut actix_web::HttpResponseBuilder, receipt: Option<&PaymentReceipt>) {
    if let Some(receipt) = receipt {
        builder
            .insert_header((headers::COST, receipt.cost.to_string()))
            .insert_header((headers::SENDER_BALANCE, receipt.balance.to_string()));
    }
}
