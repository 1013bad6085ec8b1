//! Channel data model as seen by the gateway.
//!
//! Channels are owned by the [`ChannelManager`](crate::manager::ChannelManager);
//! everything handed out here is a point-in-time snapshot.

use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identity of a channel within one receiver's manager.
///
/// The receiver is fixed per manager, so `(sender, open_block)` is unique.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelKey {
    pub sender: Address,
    pub open_block: u32,
}

impl ChannelKey {
    pub fn new(sender: Address, open_block: u32) -> Self {
        Self { sender, open_block }
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}@{}", self.sender, self.open_block)
    }
}

/// Lifecycle state of a channel. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelState {
    Open,
    /// An on-chain (uncooperative) close is pending its challenge period.
    Closing,
    Closed,
}

impl ChannelState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelState::Open => "open",
            ChannelState::Closing => "closing",
            ChannelState::Closed => "closed",
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, ChannelState::Open)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, ChannelState::Closed)
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "open" => Ok(ChannelState::Open),
            "closing" => Ok(ChannelState::Closing),
            "closed" => Ok(ChannelState::Closed),
            other => Err(format!("unknown channel state '{other}'")),
        }
    }
}

/// Snapshot of a channel's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub sender: Address,
    pub receiver: Address,
    pub open_block: u32,
    /// Deposited capacity; the balance can never exceed it.
    #[serde(with = "amount")]
    pub deposit: U256,
    /// Cumulative balance transferred to the receiver.
    #[serde(with = "amount")]
    pub balance: U256,
    pub state: ChannelState,
    /// Sender's signature over the recorded balance, `0x`-prefixed hex.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_signature: Option<String>,
    /// Receiver's closing signature once cooperatively closed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close_signature: Option<String>,
}

impl Channel {
    /// A freshly opened channel with zero balance.
    pub fn open(key: ChannelKey, receiver: Address, deposit: U256) -> Self {
        Self {
            sender: key.sender,
            receiver,
            open_block: key.open_block,
            deposit,
            balance: U256::ZERO,
            state: ChannelState::Open,
            last_signature: None,
            close_signature: None,
        }
    }

    pub fn key(&self) -> ChannelKey {
        ChannelKey::new(self.sender, self.open_block)
    }

    /// Capacity still available for payments.
    pub fn remaining(&self) -> U256 {
        self.deposit.saturating_sub(self.balance)
    }
}

/// Selection criteria for listing channels. Empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelFilter {
    pub sender: Option<Address>,
    pub receiver: Option<Address>,
    pub state: Option<ChannelState>,
}

impl ChannelFilter {
    pub fn sender(mut self, sender: Address) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn receiver(mut self, receiver: Address) -> Self {
        self.receiver = Some(receiver);
        self
    }

    pub fn state(mut self, state: ChannelState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn matches(&self, channel: &Channel) -> bool {
        self.sender.map_or(true, |s| s == channel.sender)
            && self.receiver.map_or(true, |r| r == channel.receiver)
            && self.state.map_or(true, |st| st == channel.state)
    }
}

/// Serde helpers for token amounts as decimal strings (`"1000"`).
///
/// Deserialization also accepts `0x`-prefixed hex.
pub mod amount {
    use alloy::primitives::U256;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.trim()
            .parse::<U256>()
            .map_err(|e| serde::de::Error::custom(format!("invalid amount '{raw}': {e}")))
    }

    /// Same as the parent module, for `Option<U256>` fields.
    pub mod option {
        use alloy::primitives::U256;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            value: &Option<U256>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(v) => serializer.serialize_some(&v.to_string()),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<U256>, D::Error> {
            let raw: Option<String> = Option::deserialize(deserializer)?;
            raw.map(|s| {
                s.trim()
                    .parse::<U256>()
                    .map_err(|e| serde::de::Error::custom(format!("invalid amount '{s}': {e}")))
            })
            .transpose()
        }
    }
}
