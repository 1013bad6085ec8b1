//! `RDN-*` header names and parsing of the client's claimed balance proof.

use actix_web::HttpRequest;
use alloy::primitives::{Address, U256};
use mps::balance_proof::decode_signature_hex;

// Request headers carrying a balance proof
pub const SENDER_ADDRESS: &str = "RDN-Sender-Address";
pub const OPEN_BLOCK: &str = "RDN-Open-Block";
pub const BALANCE: &str = "RDN-Balance";
pub const BALANCE_SIGNATURE: &str = "RDN-Balance-Signature";

// Payment terms returned on 402
pub const PRICE: &str = "RDN-Price";
pub const RECEIVER_ADDRESS: &str = "RDN-Receiver-Address";
pub const CONTRACT_ADDRESS: &str = "RDN-Contract-Address";
pub const TOKEN_ADDRESS: &str = "RDN-Token-Address";
pub const GATEWAY_PATH: &str = "RDN-Gateway-Path";
pub const SENDER_BALANCE: &str = "RDN-Sender-Balance";

// Denial detail
pub const PAYMENT_ERROR: &str = "RDN-Error";
pub const NONEXISTING_CHANNEL: &str = "RDN-Nonexisting-Channel";
pub const INVALID_PROOF: &str = "RDN-Invalid-Balance-Proof";

// Success
pub const COST: &str = "RDN-Cost";

pub const REQUEST_HEADERS: [&str; 4] = [SENDER_ADDRESS, OPEN_BLOCK, BALANCE, BALANCE_SIGNATURE];

/// Balance proof claimed by a request. Not yet verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedProof {
    pub sender: Address,
    pub open_block: u32,
    pub balance: U256,
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeaderError {
    #[error("missing header {0}")]
    Missing(&'static str),

    #[error("malformed header {0}")]
    Malformed(&'static str),
}

fn header<'a>(req: &'a HttpRequest, name: &'static str) -> Result<Option<&'a str>, HeaderError> {
    req.headers()
        .get(name)
        .map(|v| v.to_str().map(str::trim).map_err(|_| HeaderError::Malformed(name)))
        .transpose()
}

/// Parse the proof headers. `Ok(None)` when the client sent none of them.
pub fn extract_claimed_proof(req: &HttpRequest) -> Result<Option<ClaimedProof>, HeaderError> {
    if REQUEST_HEADERS
        .iter()
        .all(|name| req.headers().get(*name).is_none())
    {
        return Ok(None);
    }

    let required = |name: &'static str| header(req, name)?.ok_or(HeaderError::Missing(name));

    let sender = required(SENDER_ADDRESS)?
        .parse::<Address>()
        .map_err(|_| HeaderError::Malformed(SENDER_ADDRESS))?;
    let open_block = required(OPEN_BLOCK)?
        .parse::<u32>()
        .map_err(|_| HeaderError::Malformed(OPEN_BLOCK))?;
    let balance = required(BALANCE)?
        .parse::<U256>()
        .map_err(|_| HeaderError::Malformed(BALANCE))?;
    let signature = decode_signature_hex(required(BALANCE_SIGNATURE)?)
        .map_err(|_| HeaderError::Malformed(BALANCE_SIGNATURE))?;

    Ok(Some(ClaimedProof {
        sender,
        open_block,
        balance,
        signature,
    }))
}
