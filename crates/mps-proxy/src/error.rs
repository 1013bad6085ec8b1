use std::time::Duration;

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use mps::ChannelError;

use crate::config::ConfigError;
use crate::lifecycle::ProxyState;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// Channel lookup or close rejected by the channel subsystem
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// No paywalled resource at this path
    #[error("content not found: {0}")]
    ContentNotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    /// Missing or wrong admin bearer token
    #[error("unauthorized")]
    Unauthorized,

    /// Upstream request failed
    #[error("upstream error: {0}")]
    Upstream(String),

    /// The channel manager did not report synchronized in time
    #[error("channel manager did not sync within {0:?}")]
    SyncTimeout(Duration),

    /// Lifecycle call made before the server exists
    #[error("server lifecycle error: {0}")]
    ServerLifecycle(String),

    #[error("invalid lifecycle transition from {from:?} to {to:?}")]
    InvalidTransition { from: ProxyState, to: ProxyState },

    /// Receiver key does not own the channels the manager tracks
    #[error("receiver key {key} does not match channel manager receiver {manager}")]
    ReceiverMismatch {
        key: alloy::primitives::Address,
        manager: alloy::primitives::Address,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ResponseError for ProxyError {
    fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::Channel(ChannelError::NotFound) => StatusCode::NOT_FOUND,
            ProxyError::Channel(ChannelError::SigningFailed(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ProxyError::Channel(ChannelError::BalanceOverflow(_)) => StatusCode::BAD_REQUEST,
            ProxyError::Channel(_) => StatusCode::CONFLICT,
            ProxyError::ContentNotFound(_) => StatusCode::NOT_FOUND,
            ProxyError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::Unauthorized => StatusCode::UNAUTHORIZED,
            ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let (error, message) = match self {
            ProxyError::Channel(e) if status != StatusCode::INTERNAL_SERVER_ERROR => {
                (e.reason_code(), e.to_string())
            }
            ProxyError::ContentNotFound(path) => {
                ("content_not_found", format!("No content at '{}'", path))
            }
            ProxyError::BadRequest(msg) => ("bad_request", msg.clone()),
            ProxyError::Unauthorized => (
                "unauthorized",
                "Valid Bearer token required".to_string(),
            ),
            ProxyError::Upstream(msg) => {
                tracing::error!("Upstream error: {}", msg);
                (
                    "upstream_error",
                    "Failed to reach upstream service".to_string(),
                )
            }
            other => {
                tracing::error!("Internal error: {}", other);
                (
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
        };

        HttpResponse::build(status).json(serde_json::json!({
            "error": error,
            "message": message,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::MessageBody;

    fn body_json(err: ProxyError) -> (StatusCode, serde_json::Value) {
        let resp = err.error_response();
        let status = resp.status();
        let bytes = resp.into_body().try_into_bytes().unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[test]
    fn test_not_found_channel_is_404() {
        let (status, body) = body_json(ProxyError::Channel(ChannelError::NotFound));
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "nonexisting_channel");
    }

    #[test]
    fn test_close_conflict_carries_reason() {
        let (status, body) = body_json(ProxyError::Channel(ChannelError::AlreadyClosed));
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "already_closed");
    }

    #[test]
    fn test_internal_details_hidden() {
        let (status, body) = body_json(ProxyError::Internal("db password=hunter2".into()));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "An internal error occurred");
        assert!(!body.to_string().contains("hunter2"));

        let (_, body) = body_json(ProxyError::Channel(ChannelError::SigningFailed(
            "key material".into(),
        )));
        assert_eq!(body["error"], "internal_error");
    }

    #[test]
    fn test_upstream_details_hidden() {
        let (status, body) = body_json(ProxyError::Upstream("10.0.0.3 refused".into()));
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(!body.to_string().contains("10.0.0.3"));
    }
}
