use actix_web::{web, HttpRequest, HttpResponse};
use alloy::primitives::{Address, U256};
use mps::security::bearer_matches;
use mps::{BulkCloseReport, ChannelFilter, ChannelKey, ChannelState, ClosingProof, API_PATH};
use serde::{Deserialize, Serialize};

use crate::error::ProxyError;
use crate::metrics::COOPERATIVE_CLOSES;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
}

/// Optional body of a close request.
#[derive(Debug, Default, Deserialize)]
pub struct CloseRequest {
    #[serde(default, with = "mps::channel::amount::option")]
    pub balance: Option<U256>,
}

#[derive(Debug, Serialize)]
pub struct ClosedChannel {
    pub sender: Address,
    pub open_block: u32,
    #[serde(with = "mps::channel::amount")]
    pub balance: U256,
    pub close_signature: String,
}

impl From<&ClosingProof> for ClosedChannel {
    fn from(proof: &ClosingProof) -> Self {
        Self {
            sender: proof.key.sender,
            open_block: proof.key.open_block,
            balance: proof.balance,
            close_signature: proof.close_signature.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FailedClose {
    pub sender: Address,
    pub open_block: u32,
    pub error: &'static str,
}

#[derive(Debug, Serialize)]
pub struct CloseAllResponse {
    pub closed: Vec<ClosedChannel>,
    pub failed: Vec<FailedClose>,
}

impl From<&BulkCloseReport> for CloseAllResponse {
    fn from(report: &BulkCloseReport) -> Self {
        Self {
            closed: report.closed().map(ClosedChannel::from).collect(),
            failed: report
                .failed()
                .map(|(key, e)| FailedClose {
                    sender: key.sender,
                    open_block: key.open_block,
                    error: e.reason_code(),
                })
                .collect(),
        }
    }
}

fn parse_sender(raw: &str) -> Result<Address, ProxyError> {
    raw.parse()
        .map_err(|_| ProxyError::BadRequest(format!("invalid sender address '{raw}'")))
}

fn parse_filter(query: &ListQuery) -> Result<ChannelFilter, ProxyError> {
    let filter = ChannelFilter::default();
    match query.status.as_deref().filter(|s| !s.is_empty() && *s != "all") {
        Some(status) => {
            let state: ChannelState = status.parse().map_err(ProxyError::BadRequest)?;
            Ok(filter.state(state))
        }
        None => Ok(filter),
    }
}

/// Mutating routes need the admin bearer token. Without a configured token
/// they are disabled.
fn require_admin(req: &HttpRequest, state: &AppState) -> Result<(), ProxyError> {
    let expected = state.admin_token.as_deref().ok_or(ProxyError::Unauthorized)?;
    let header = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok());
    if bearer_matches(header, expected) {
        Ok(())
    } else {
        Err(ProxyError::Unauthorized)
    }
}

/// GET /api/1/channels/{sender}/{block}
pub async fn channel_info(
    state: web::Data<AppState>,
    path: web::Path<(String, u32)>,
) -> Result<HttpResponse, ProxyError> {
    let (sender, block) = path.into_inner();
    let channel = state.directory.get_channel(parse_sender(&sender)?, block)?;
    Ok(HttpResponse::Ok().json(channel))
}

/// DELETE /api/1/channels/{sender}/{block}
///
/// Cooperatively close at the body's `balance`, or at the recorded balance.
pub async fn close_channel(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<(String, u32)>,
    body: web::Bytes,
) -> Result<HttpResponse, ProxyError> {
    require_admin(&req, &state)?;
    let (sender, block) = path.into_inner();
    let key = ChannelKey::new(parse_sender(&sender)?, block);

    let request: CloseRequest = if body.iter().all(u8::is_ascii_whitespace) {
        CloseRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ProxyError::BadRequest(format!("invalid close request: {e}")))?
    };

    let closer = state.closer.clone();
    let result = web::block(move || closer.close_channel(key, request.balance))
        .await
        .map_err(|e| ProxyError::Internal(format!("close task failed: {e}")))?;

    match result {
        Ok(proof) => {
            COOPERATIVE_CLOSES.with_label_values(&["closed"]).inc();
            Ok(HttpResponse::Ok().json(ClosedChannel::from(&proof)))
        }
        Err(e) => {
            COOPERATIVE_CLOSES.with_label_values(&[e.reason_code()]).inc();
            Err(e.into())
        }
    }
}

/// GET /api/1/channels
pub async fn list_channels(
    state: web::Data<AppState>,
    query: web::Query<ListQuery>,
) -> Result<HttpResponse, ProxyError> {
    let filter = parse_filter(&query)?;
    Ok(HttpResponse::Ok().json(state.directory.list_channels(&filter)))
}

/// GET /api/1/channels/{sender}
pub async fn list_sender_channels(
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<ListQuery>,
) -> Result<HttpResponse, ProxyError> {
    let filter = parse_filter(&query)?.sender(parse_sender(&path)?);
    Ok(HttpResponse::Ok().json(state.directory.list_channels(&filter)))
}

/// GET /api/1/admin
pub async fn overview(state: web::Data<AppState>) -> HttpResponse {
    let channels = state.directory.list_channels(&ChannelFilter::default());
    let count = |s: ChannelState| channels.iter().filter(|c| c.state == s).count();
    let collected = channels
        .iter()
        .fold(U256::ZERO, |acc, c| acc.saturating_add(c.balance));

    HttpResponse::Ok().json(serde_json::json!({
        "receiver_address": state.terms.receiver,
        "contract_address": state.terms.contract_address,
        "token_address": state.terms.token_address,
        "synced": state.directory.is_synced(),
        "channels": {
            "open": count(ChannelState::Open),
            "closing": count(ChannelState::Closing),
            "closed": count(ChannelState::Closed),
        },
        "collected_balance": collected.to_string(),
        "content": state.content.patterns(),
    }))
}

/// POST /api/1/admin/close_all
pub async fn close_all(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ProxyError> {
    require_admin(&req, &state)?;
    let closer = state.closer.clone();
    let receiver = state.terms.receiver;
    let report = web::block(move || closer.close_all_for_receiver(receiver, None))
        .await
        .map_err(|e| ProxyError::Internal(format!("close task failed: {e}")))?;

    COOPERATIVE_CLOSES
        .with_label_values(&["closed"])
        .inc_by(report.closed().count() as u64);
    for (_, e) in report.failed() {
        COOPERATIVE_CLOSES.with_label_values(&[e.reason_code()]).inc();
    }
    tracing::info!(
        closed = report.closed().count(),
        failed = report.failed().count(),
        "bulk cooperative close finished"
    );
    Ok(HttpResponse::Ok().json(CloseAllResponse::from(&report)))
}

/// GET /cm
pub async fn management(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "service": "mps-proxy",
        "version": env!("CARGO_PKG_VERSION"),
        "receiver_address": state.terms.receiver,
        "contract_address": state.terms.contract_address,
        "api": API_PATH,
        "endpoints": {
            "channels": format!("{API_PATH}/channels"),
            "admin": format!("{API_PATH}/admin"),
            "close_all": format!("{API_PATH}/admin/close_all"),
        },
    }))
}
