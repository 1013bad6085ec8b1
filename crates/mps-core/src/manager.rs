use std::sync::atomic::{AtomicBool, Ordering};

use alloy::primitives::{Address, U256};
use dashmap::DashMap;
use tokio::sync::watch;

use crate::balance_proof::{encode_signature_hex, BalanceProofCodec};
use crate::channel::{Channel, ChannelKey, ChannelState};
use crate::error::ChannelError;

/// Outcome of an accepted balance proof.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceUpdate {
    /// Recorded balance the update replaced
    pub previous: U256,
    pub channel: Channel,
}

impl BalanceUpdate {
    /// Amount this update added to the recorded balance.
    pub fn increase(&self) -> U256 {
        self.channel.balance - self.previous
    }
}

/// The channel subsystem a gateway runs on top of.
///
/// Implementations own channel state and must serialize updates per
/// [`ChannelKey`] so balances stay strictly increasing under concurrency.
/// Returned [`Channel`] values are snapshots.
pub trait ChannelManager: Send + Sync {
    /// Lifecycle hook, invoked once by the gateway at construction.
    fn start(&self);

    /// Address that receives payments on every channel of this manager.
    fn receiver(&self) -> Address;

    /// Channel contract the balance proofs are bound to.
    fn contract_address(&self) -> Address;

    /// Synchronization signal; becomes `true` once the manager has caught up.
    fn sync_status(&self) -> watch::Receiver<bool>;

    fn get_channel(&self, key: &ChannelKey) -> Option<Channel>;

    fn channels(&self) -> Vec<Channel>;

    /// Record a sender-signed balance proof for an open channel.
    ///
    /// The proof must raise the recorded balance by at least `min_increase`,
    /// checked against the recorded balance at the moment of the update.
    fn register_payment(
        &self,
        key: &ChannelKey,
        balance: U256,
        min_increase: U256,
        signature: &[u8],
    ) -> Result<BalanceUpdate, ChannelError>;

    /// Close a channel with a receiver-signed closing proof.
    fn close_cooperatively(
        &self,
        key: &ChannelKey,
        balance: U256,
        closing_signature: &[u8],
    ) -> Result<Channel, ChannelError>;
}

/// In-memory channel manager backed by DashMap. State is lost on restart.
///
/// Channel events that would normally come from the chain (open, top-up,
/// uncooperative close, settlement) are applied through inherent methods.
pub struct InMemoryChannelManager {
    receiver: Address,
    codec: BalanceProofCodec,
    channels: DashMap<ChannelKey, Channel>,
    synced: watch::Sender<bool>,
    manual_sync: bool,
    started: AtomicBool,
}

impl InMemoryChannelManager {
    pub fn new(receiver: Address, contract_address: Address) -> Self {
        Self::with_codec(receiver, BalanceProofCodec::new(contract_address))
    }

    pub fn with_codec(receiver: Address, codec: BalanceProofCodec) -> Self {
        let (synced, _) = watch::channel(false);
        Self {
            receiver,
            codec,
            channels: DashMap::new(),
            synced,
            manual_sync: false,
            started: AtomicBool::new(false),
        }
    }

    /// Do not report synchronized on `start()`; wait for [`mark_synced`](Self::mark_synced).
    pub fn with_manual_sync(mut self) -> Self {
        self.manual_sync = true;
        self
    }

    pub fn mark_synced(&self) {
        self.synced.send_replace(true);
        tracing::info!(channels = self.channels.len(), "channel manager synchronized");
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn codec(&self) -> &BalanceProofCodec {
        &self.codec
    }

    /// Apply a channel-open event. An existing channel with the same key is kept.
    pub fn open_channel(&self, key: ChannelKey, deposit: U256) -> Channel {
        self.channels
            .entry(key)
            .or_insert_with(|| {
                tracing::info!(channel = %key, deposit = %deposit, "channel opened");
                Channel::open(key, self.receiver, deposit)
            })
            .clone()
    }

    /// Load a channel snapshot as-is (e.g. from a seed file).
    ///
    /// Channels paying another receiver are rejected.
    pub fn restore_channel(&self, channel: Channel) -> Result<(), ChannelError> {
        if channel.receiver != self.receiver {
            return Err(ChannelError::ReceiverMismatch {
                expected: self.receiver,
                found: channel.receiver,
            });
        }
        self.channels.insert(channel.key(), channel);
        Ok(())
    }

    /// Apply a deposit top-up event.
    pub fn top_up(&self, key: &ChannelKey, amount: U256) -> Result<Channel, ChannelError> {
        let mut entry = self.channels.get_mut(key).ok_or(ChannelError::NotFound)?;
        let channel = entry.value_mut();
        if !channel.state.is_open() {
            return Err(ChannelError::ChannelNotOpen);
        }
        channel.deposit = channel.deposit.saturating_add(amount);
        tracing::info!(channel = %key, deposit = %channel.deposit, "channel topped up");
        Ok(channel.clone())
    }

    /// Apply an on-chain close request: the channel enters its challenge period.
    pub fn begin_uncooperative_close(&self, key: &ChannelKey) -> Result<Channel, ChannelError> {
        let mut entry = self.channels.get_mut(key).ok_or(ChannelError::NotFound)?;
        let channel = entry.value_mut();
        match channel.state {
            ChannelState::Closed => return Err(ChannelError::AlreadyClosed),
            ChannelState::Closing => return Err(ChannelError::ChannelNotOpen),
            ChannelState::Open => channel.state = ChannelState::Closing,
        }
        tracing::info!(channel = %key, "uncooperative close started");
        Ok(channel.clone())
    }

    /// Apply an on-chain settlement event after the challenge period.
    pub fn settle(&self, key: &ChannelKey) -> Result<Channel, ChannelError> {
        let mut entry = self.channels.get_mut(key).ok_or(ChannelError::NotFound)?;
        let channel = entry.value_mut();
        if channel.state.is_closed() {
            return Err(ChannelError::AlreadyClosed);
        }
        channel.state = ChannelState::Closed;
        tracing::info!(channel = %key, balance = %channel.balance, "channel settled");
        Ok(channel.clone())
    }
}

impl ChannelManager for InMemoryChannelManager {
    fn start(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            tracing::warn!("channel manager already started");
            return;
        }
        tracing::info!(receiver = %self.receiver, "channel manager started");
        if !self.manual_sync {
            self.mark_synced();
        }
    }

    fn receiver(&self) -> Address {
        self.receiver
    }

    fn contract_address(&self) -> Address {
        self.codec.contract_address()
    }

    fn sync_status(&self) -> watch::Receiver<bool> {
        self.synced.subscribe()
    }

    fn get_channel(&self, key: &ChannelKey) -> Option<Channel> {
        self.channels.get(key).map(|c| c.value().clone())
    }

    fn channels(&self) -> Vec<Channel> {
        self.channels.iter().map(|c| c.value().clone()).collect()
    }

    fn register_payment(
        &self,
        key: &ChannelKey,
        balance: U256,
        min_increase: U256,
        signature: &[u8],
    ) -> Result<BalanceUpdate, ChannelError> {
        // The shard write lock is held until the update is applied, which
        // serializes concurrent payments on the same channel.
        let mut entry = self.channels.get_mut(key).ok_or(ChannelError::NotFound)?;
        let channel = entry.value_mut();

        if !channel.state.is_open() {
            return Err(ChannelError::ChannelNotOpen);
        }
        if balance <= channel.balance {
            return Err(ChannelError::StaleBalance {
                proposed: balance,
                recorded: channel.balance,
            });
        }
        let paid = balance - channel.balance;
        if paid < min_increase {
            return Err(ChannelError::InsufficientPayment {
                paid,
                price: min_increase,
            });
        }
        if balance > channel.deposit {
            return Err(ChannelError::InsufficientDeposit {
                balance,
                deposit: channel.deposit,
            });
        }

        let signer =
            self.codec
                .recover_balance_signer(channel.receiver, key.open_block, balance, signature)?;
        if signer != key.sender {
            tracing::warn!(
                channel = %key,
                recovered = %signer,
                "balance proof not signed by channel sender"
            );
            return Err(ChannelError::InvalidSignature(
                "balance proof not signed by channel sender".to_string(),
            ));
        }

        let previous = channel.balance;
        channel.balance = balance;
        channel.last_signature = Some(format!("0x{}", alloy::hex::encode(signature)));
        tracing::debug!(channel = %key, balance = %balance, "balance proof accepted");
        Ok(BalanceUpdate {
            previous,
            channel: channel.clone(),
        })
    }

    fn close_cooperatively(
        &self,
        key: &ChannelKey,
        balance: U256,
        closing_signature: &[u8],
    ) -> Result<Channel, ChannelError> {
        let mut entry = self.channels.get_mut(key).ok_or(ChannelError::NotFound)?;
        let channel = entry.value_mut();

        match channel.state {
            ChannelState::Closed => return Err(ChannelError::AlreadyClosed),
            ChannelState::Closing => return Err(ChannelError::ChannelNotOpen),
            ChannelState::Open => {}
        }
        if balance < channel.balance {
            return Err(ChannelError::StaleBalance {
                proposed: balance,
                recorded: channel.balance,
            });
        }
        if balance > channel.deposit {
            return Err(ChannelError::InsufficientDeposit {
                balance,
                deposit: channel.deposit,
            });
        }

        let signer = self.codec.recover_balance_signer(
            channel.receiver,
            key.open_block,
            balance,
            closing_signature,
        )?;
        if signer != channel.receiver {
            tracing::warn!(
                channel = %key,
                recovered = %signer,
                "closing proof not signed by receiver"
            );
            return Err(ChannelError::InvalidSignature(
                "closing proof not signed by receiver".to_string(),
            ));
        }

        channel.balance = balance;
        channel.state = ChannelState::Closed;
        channel.close_signature = alloy::primitives::Signature::from_raw(closing_signature)
            .ok()
            .map(|sig| encode_signature_hex(&sig));
        tracing::info!(channel = %key, balance = %balance, "channel closed cooperatively");
        Ok(channel.clone())
    }
}
