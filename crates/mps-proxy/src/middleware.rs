//! Per-request payment gating.
//!
//! A paid request must carry a balance proof whose balance exceeds the
//! channel's recorded balance by at least the content price. The check
//! and the balance update both go through the [`ChannelDirectory`](mps::ChannelDirectory),
//! whose manager serializes updates per channel.

use actix_web::{HttpRequest, HttpResponse};
use alloy::primitives::U256;
use mps::{ChannelError, ChannelKey, API_PATH};
use serde::Serialize;

use crate::headers::{self, extract_claimed_proof, ClaimedProof, HeaderError};
use crate::metrics::{PAYMENTS_ACCEPTED, PAYMENTS_REJECTED, REVENUE_TOTAL};
use crate::state::AppState;

/// Accepted payment for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaymentReceipt {
    pub key: ChannelKey,
    /// Balance increase this request paid
    pub cost: U256,
    /// Recorded balance after the update
    pub balance: U256,
}

/// Why a request was not served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Denial {
    PaymentRequired,
    InvalidHeaders(HeaderError),
    Channel(ChannelError),
}

impl Denial {
    pub fn reason(&self) -> &'static str {
        match self {
            Denial::PaymentRequired => "payment_required",
            Denial::InvalidHeaders(_) => "invalid_headers",
            Denial::Channel(e) => e.reason_code(),
        }
    }
}

impl From<ChannelError> for Denial {
    fn from(e: ChannelError) -> Self {
        Denial::Channel(e)
    }
}

/// Body of a 402 response. Carries the terms needed to pay, never internals.
#[derive(Debug, Serialize)]
pub struct PaymentRequiredBody {
    pub error: &'static str,
    #[serde(with = "mps::channel::amount")]
    pub price: U256,
    pub receiver_address: alloy::primitives::Address,
    pub contract_address: alloy::primitives::Address,
    pub token_address: alloy::primitives::Address,
    pub gateway_path: &'static str,
    #[serde(
        with = "mps::channel::amount::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub sender_balance: Option<U256>,
}

/// Verify `proof` pays `price` and record the new balance.
///
/// Early rejections use a snapshot; the final write is checked against the
/// balance it replaces.
pub fn check_payment(
    state: &AppState,
    price: U256,
    proof: &ClaimedProof,
) -> Result<PaymentReceipt, Denial> {
    let key = ChannelKey::new(proof.sender, proof.open_block);
    let channel = state.directory.get_channel(proof.sender, proof.open_block)?;
    if !channel.state.is_open() {
        return Err(ChannelError::ChannelNotOpen.into());
    }

    let signer = state.codec.recover_balance_signer(
        state.terms.receiver,
        proof.open_block,
        proof.balance,
        &proof.signature,
    )?;
    if signer != proof.sender {
        return Err(ChannelError::InvalidSignature("signer is not the channel sender".into()).into());
    }

    if proof.balance <= channel.balance {
        return Err(ChannelError::StaleBalance {
            proposed: proof.balance,
            recorded: channel.balance,
        }
        .into());
    }
    let paid = proof.balance - channel.balance;
    if paid < price {
        return Err(ChannelError::InsufficientPayment { paid, price }.into());
    }
    if !state
        .directory
        .has_sufficient_balance(proof.sender, proof.open_block, price)?
    {
        return Err(ChannelError::InsufficientDeposit {
            balance: proof.balance,
            deposit: channel.deposit,
        }
        .into());
    }

    // Stale, price and deposit are checked again under the channel lock.
    let update = state.directory.apply_payment(
        proof.sender,
        proof.open_block,
        proof.balance,
        price,
        &proof.signature,
    )?;

    Ok(PaymentReceipt {
        key,
        cost: update.increase(),
        balance: update.channel.balance,
    })
}

/// Gate a request for content priced at `price`.
///
/// Returns `Ok(None)` for free content, `Ok(Some(receipt))` once the payment
/// is recorded, or the 402 response to send.
pub fn require_payment(
    req: &HttpRequest,
    state: &AppState,
    price: U256,
) -> Result<Option<PaymentReceipt>, HttpResponse> {
    if price.is_zero() {
        return Ok(None);
    }

    let proof = match extract_claimed_proof(req) {
        Ok(Some(proof)) => proof,
        Ok(None) => return Err(deny(state, price, None, Denial::PaymentRequired)),
        Err(e) => return Err(deny(state, price, None, Denial::InvalidHeaders(e))),
    };

    match check_payment(state, price, &proof) {
        Ok(receipt) => {
            PAYMENTS_ACCEPTED.inc();
            REVENUE_TOTAL.inc_by(saturating_u64(receipt.cost));
            tracing::info!(
                channel = %receipt.key,
                cost = %receipt.cost,
                balance = %receipt.balance,
                "payment accepted"
            );
            Ok(Some(receipt))
        }
        Err(denial) => Err(deny(state, price, Some(&proof), denial)),
    }
}

fn deny(
    state: &AppState,
    price: U256,
    proof: Option<&ClaimedProof>,
    denial: Denial,
) -> HttpResponse {
    let reason = denial.reason();
    PAYMENTS_REJECTED.with_label_values(&[reason]).inc();
    tracing::debug!(reason, detail = ?denial, "payment denied");

    let sender_balance = proof.and_then(|p| {
        state
            .directory
            .get_channel(p.sender, p.open_block)
            .ok()
            .map(|c| c.balance)
    });
    payment_required_response(state, price, denial, sender_balance)
}

/// Build a 402 Payment Required HTTP response
pub fn payment_required_response(
    state: &AppState,
    price: U256,
    denial: Denial,
    sender_balance: Option<U256>,
) -> HttpResponse {
    let terms = state.terms;
    let reason = denial.reason();
    let mut builder = HttpResponse::PaymentRequired();
    builder
        .insert_header((headers::PRICE, price.to_string()))
        .insert_header((headers::RECEIVER_ADDRESS, format!("{:#x}", terms.receiver)))
        .insert_header((
            headers::CONTRACT_ADDRESS,
            format!("{:#x}", terms.contract_address),
        ))
        .insert_header((headers::TOKEN_ADDRESS, format!("{:#x}", terms.token_address)))
        .insert_header((headers::GATEWAY_PATH, API_PATH))
        .insert_header((headers::PAYMENT_ERROR, reason));

    match &denial {
        Denial::Channel(ChannelError::NotFound) => {
            builder.insert_header((headers::NONEXISTING_CHANNEL, "1"));
        }
        Denial::Channel(
            ChannelError::InvalidSignature(_)
            | ChannelError::StaleBalance { .. }
            | ChannelError::InsufficientPayment { .. }
            | ChannelError::BalanceOverflow(_),
        ) => {
            builder.insert_header((headers::INVALID_PROOF, "1"));
        }
        _ => {}
    }
    if let Some(balance) = sender_balance {
        builder.insert_header((headers::SENDER_BALANCE, balance.to_string()));
    }

    builder.json(PaymentRequiredBody {
        error: reason,
        price,
        receiver_address: terms.receiver,
        contract_address: terms.contract_address,
        token_address: terms.token_address,
        gateway_path: API_PATH,
        sender_balance,
    })
}

fn saturating_u64(value: U256) -> u64 {
    if value > U256::from(u64::MAX) {
        u64::MAX
    } else {
        value.as_limbs()[0]
    }
}
