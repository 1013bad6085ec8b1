use std::sync::Arc;

use alloy::primitives::Address;
use mps::{BalanceProofCodec, ChannelDirectory, CooperativeClose};

use crate::config::ProxyConfig;
use crate::content::ContentRegistry;
use crate::error::ProxyError;

/// Channel terms advertised in every 402.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaywallTerms {
    pub receiver: Address,
    pub contract_address: Address,
    pub token_address: Address,
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub directory: ChannelDirectory,
    pub codec: BalanceProofCodec,
    pub closer: Arc<CooperativeClose>,
    pub content: Arc<ContentRegistry>,
    pub terms: PaywallTerms,
    pub http_client: reqwest::Client,
    pub admin_token: Option<String>,
    pub metrics_token: Option<String>,
}

impl AppState {
    pub fn new(
        config: &ProxyConfig,
        directory: ChannelDirectory,
        content: Arc<ContentRegistry>,
    ) -> Result<Self, ProxyError> {
        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ProxyError::Internal(format!("failed to create HTTP client: {e}")))?;

        let codec = BalanceProofCodec::new(directory.contract_address());
        let closer = CooperativeClose::new(directory.clone(), config.receiver_key.clone())
            .with_codec(codec.clone());

        Ok(Self {
            terms: PaywallTerms {
                receiver: directory.receiver(),
                contract_address: directory.contract_address(),
                token_address: config.token_address,
            },
            directory,
            codec,
            closer: Arc::new(closer),
            content,
            http_client,
            admin_token: config.admin_token.clone(),
            metrics_token: config.metrics_token.clone(),
        })
    }
}
