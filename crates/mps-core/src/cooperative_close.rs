//! Cooperative channel close.
//!
//! The receiver counter-signs a balance proof for the final balance and the
//! channel manager closes the channel on that signature:
//!
//! 1. the requested balance defaults to the channel's recorded balance
//! 2. the codec encodes `(receiver, open_block, balance)`
//! 3. the receiver key signs the canonical bytes
//! 4. the directory submits the closing signature; the manager decides
//!
//! Only the receiver is accepted as counter-signer. Concurrent closes of the
//! same channel are arbitrated by the manager: the first accepted signature
//! wins and later attempts see [`ChannelError::AlreadyClosed`].

use alloy::primitives::{Address, U256};
use alloy::signers::local::PrivateKeySigner;

use crate::balance_proof::{encode_signature_hex, BalanceProofCodec};
use crate::channel::{ChannelFilter, ChannelKey, ChannelState};
use crate::directory::ChannelDirectory;
use crate::error::ChannelError;

/// Result of a successful cooperative close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosingProof {
    pub key: ChannelKey,
    pub balance: U256,
    /// Receiver's signature over the final balance, `0x`-prefixed hex.
    pub close_signature: String,
}

/// Outcome for one channel of a bulk close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseOutcome {
    pub key: ChannelKey,
    pub result: Result<ClosingProof, ChannelError>,
}

/// Per-channel outcomes of a bulk close, in processing order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkCloseReport {
    pub outcomes: Vec<CloseOutcome>,
}

impl BulkCloseReport {
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn closed(&self) -> impl Iterator<Item = &ClosingProof> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().ok())
    }

    pub fn failed(&self) -> impl Iterator<Item = (&ChannelKey, &ChannelError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (&o.key, e)))
    }

    pub fn all_closed(&self) -> bool {
        self.failed().next().is_none()
    }
}

/// Drives cooperative closes on behalf of the receiver.
pub struct CooperativeClose {
    directory: ChannelDirectory,
    codec: BalanceProofCodec,
    signer: PrivateKeySigner,
}

impl CooperativeClose {
    /// `signer` is the counter-party key; by default the channel receiver's.
    pub fn new(directory: ChannelDirectory, signer: PrivateKeySigner) -> Self {
        let codec = BalanceProofCodec::new(directory.contract_address());
        Self {
            directory,
            codec,
            signer,
        }
    }

    /// Use a codec with a custom signature scheme.
    pub fn with_codec(mut self, codec: BalanceProofCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Address of the counter-signing key.
    pub fn counterparty(&self) -> Address {
        self.signer.address()
    }

    /// Close one channel at `balance`, or at its recorded balance when `None`.
    pub fn close_channel(
        &self,
        key: ChannelKey,
        balance: Option<U256>,
    ) -> Result<ClosingProof, ChannelError> {
        let channel = self.directory.get_channel(key.sender, key.open_block)?;
        match channel.state {
            ChannelState::Closed => return Err(ChannelError::AlreadyClosed),
            ChannelState::Closing => return Err(ChannelError::ChannelNotOpen),
            ChannelState::Open => {}
        }

        let balance = balance.unwrap_or(channel.balance);
        let message = self
            .codec
            .encode(channel.receiver, channel.open_block, balance)?;
        let signature = self.codec.sign(&message, &self.signer)?;

        self.directory
            .close_cooperatively(&key, balance, &signature.as_bytes())?;

        tracing::info!(
            channel = %key,
            balance = %balance,
            counterparty = %self.signer.address(),
            "cooperative close accepted"
        );
        Ok(ClosingProof {
            key,
            balance,
            close_signature: encode_signature_hex(&signature),
        })
    }

    /// Apply [`close_channel`](Self::close_channel) to each key. A failure on
    /// one channel does not stop the others.
    pub fn close_channels<I>(&self, keys: I, balance: Option<U256>) -> BulkCloseReport
    where
        I: IntoIterator<Item = ChannelKey>,
    {
        let outcomes = keys
            .into_iter()
            .map(|key| {
                let result = self.close_channel(key, balance);
                if let Err(ref e) = result {
                    tracing::warn!(channel = %key, error = %e, "cooperative close failed");
                }
                CloseOutcome { key, result }
            })
            .collect();
        BulkCloseReport { outcomes }
    }

    /// Close every channel of `receiver` that is not already closed.
    pub fn close_all_for_receiver(
        &self,
        receiver: Address,
        balance: Option<U256>,
    ) -> BulkCloseReport {
        let keys: Vec<ChannelKey> = self
            .directory
            .list_channels(&ChannelFilter::default().receiver(receiver))
            .into_iter()
            .filter(|c| !c.state.is_closed())
            .map(|c| c.key())
            .collect();
        tracing::info!(receiver = %receiver, channels = keys.len(), "closing channels cooperatively");
        self.close_channels(keys, balance)
    }
}
