//! Narrow query/command facade the gateway and admin routes use.
//!
//! Adds no caching: every call goes straight to the backing
//! [`ChannelManager`].

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, U256};

use crate::channel::{Channel, ChannelFilter, ChannelKey};
use crate::error::ChannelError;
use crate::manager::{BalanceUpdate, ChannelManager};

#[derive(Clone)]
pub struct ChannelDirectory {
    manager: Arc<dyn ChannelManager>,
}

impl ChannelDirectory {
    pub fn new(manager: Arc<dyn ChannelManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<dyn ChannelManager> {
        &self.manager
    }

    pub fn receiver(&self) -> Address {
        self.manager.receiver()
    }

    pub fn contract_address(&self) -> Address {
        self.manager.contract_address()
    }

    pub fn is_synced(&self) -> bool {
        *self.manager.sync_status().borrow()
    }

    /// Wait until the manager reports synchronized. Returns `false` on timeout
    /// or if the manager dropped its sync signal.
    pub async fn wait_sync(&self, timeout: Duration) -> bool {
        let mut status = self.manager.sync_status();
        let synced = matches!(
            tokio::time::timeout(timeout, status.wait_for(|synced| *synced)).await,
            Ok(Ok(_))
        );
        synced
    }

    pub fn get_channel(&self, sender: Address, open_block: u32) -> Result<Channel, ChannelError> {
        self.manager
            .get_channel(&ChannelKey::new(sender, open_block))
            .ok_or(ChannelError::NotFound)
    }

    /// Channels matching `filter`, ordered by sender then open block.
    pub fn list_channels(&self, filter: &ChannelFilter) -> Vec<Channel> {
        let mut channels: Vec<Channel> = self
            .manager
            .channels()
            .into_iter()
            .filter(|c| filter.matches(c))
            .collect();
        channels.sort_by_key(|c| c.key());
        channels
    }

    /// Whether the channel can absorb `required` more on top of its recorded balance.
    pub fn has_sufficient_balance(
        &self,
        sender: Address,
        open_block: u32,
        required: U256,
    ) -> Result<bool, ChannelError> {
        let channel = self
            .manager
            .get_channel(&ChannelKey::new(sender, open_block))
            .filter(|c| c.state.is_open())
            .ok_or(ChannelError::ChannelNotOpen)?;
        Ok(channel.remaining() >= required)
    }

    pub fn apply_balance_update(
        &self,
        sender: Address,
        open_block: u32,
        new_balance: U256,
        proof: &[u8],
    ) -> Result<Channel, ChannelError> {
        self.apply_payment(sender, open_block, new_balance, U256::ZERO, proof)
            .map(|update| update.channel)
    }

    /// Balance update that must also cover `price`. The increase is measured
    /// by the manager against the balance it replaces, not an earlier read.
    pub fn apply_payment(
        &self,
        sender: Address,
        open_block: u32,
        new_balance: U256,
        price: U256,
        proof: &[u8],
    ) -> Result<BalanceUpdate, ChannelError> {
        let key = ChannelKey::new(sender, open_block);
        self.manager
            .register_payment(&key, new_balance, price, proof)
            .inspect_err(|e| {
                tracing::debug!(channel = %key, error = %e, "balance update rejected");
            })
    }

    pub fn close_cooperatively(
        &self,
        key: &ChannelKey,
        balance: U256,
        closing_signature: &[u8],
    ) -> Result<Channel, ChannelError> {
        self.manager
            .close_cooperatively(key, balance, closing_signature)
    }
}
