use alloy::primitives::{Address, U256};
use thiserror::Error;

/// Errors returned by channel, balance proof and cooperative close operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("channel not found")]
    NotFound,

    #[error("channel is not open")]
    ChannelNotOpen,

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("stale balance: proposed {proposed}, recorded {recorded}")]
    StaleBalance { proposed: U256, recorded: U256 },

    #[error("channel already closed")]
    AlreadyClosed,

    #[error("balance {balance} exceeds channel deposit {deposit}")]
    InsufficientDeposit { balance: U256, deposit: U256 },

    #[error("balance increase {paid} does not cover price {price}")]
    InsufficientPayment { paid: U256, price: U256 },

    #[error("balance {0} does not fit in 192 bits")]
    BalanceOverflow(U256),

    #[error("channel pays {found}, expected receiver {expected}")]
    ReceiverMismatch { expected: Address, found: Address },

    #[error("signing failed: {0}")]
    SigningFailed(String),
}

impl ChannelError {
    /// Coarse machine-readable reason code. Safe to expose to clients.
    pub fn reason_code(&self) -> &'static str {
        match self {
            ChannelError::NotFound => "nonexisting_channel",
            ChannelError::ChannelNotOpen => "channel_not_open",
            ChannelError::InvalidSignature(_) => "invalid_signature",
            ChannelError::StaleBalance { .. } => "stale_balance",
            ChannelError::AlreadyClosed => "already_closed",
            ChannelError::InsufficientDeposit { .. } => "insufficient_deposit",
            ChannelError::InsufficientPayment { .. } => "insufficient_payment",
            ChannelError::BalanceOverflow(_) => "invalid_balance",
            ChannelError::ReceiverMismatch { .. } => "receiver_mismatch",
            ChannelError::SigningFailed(_) => "signing_failed",
        }
    }
}
