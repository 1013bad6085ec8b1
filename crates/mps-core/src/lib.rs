//! Off-chain payment channel core for a paywalled HTTP gateway.
//!
//! A client opens a unidirectional channel to the gateway's receiver address
//! and pays for each request by signing a new cumulative balance. This crate
//! holds the pieces the gateway needs from that model:
//!
//! - [`BalanceProofCodec`] — canonical encoding, signing and signer recovery
//!   for `{receiver, open_block, balance}` proofs
//! - [`ChannelManager`] — the channel subsystem the gateway sits on, with an
//!   in-memory reference implementation ([`InMemoryChannelManager`])
//! - [`ChannelDirectory`] — the narrow query/command facade over a manager
//! - [`CooperativeClose`] — receiver counter-signed early channel closure
//!
//! # Quick example
//!
//! ```no_run
//! use std::sync::Arc;
//! use alloy::primitives::{Address, U256};
//! use alloy::signers::local::PrivateKeySigner;
//! use mps::{ChannelDirectory, ChannelKey, CooperativeClose, InMemoryChannelManager};
//!
//! let receiver = PrivateKeySigner::random();
//! let manager = Arc::new(InMemoryChannelManager::new(receiver.address(), Address::ZERO));
//! let key = ChannelKey::new(Address::repeat_byte(0xaa), 100);
//! manager.open_channel(key, U256::from(1000u64));
//!
//! let directory = ChannelDirectory::new(manager);
//! let proof = CooperativeClose::new(directory, receiver)
//!     .close_channel(key, None)
//!     .unwrap();
//! println!("closed at {} with {}", proof.balance, proof.close_signature);
//! ```

pub mod balance_proof;
pub mod channel;
pub mod constants;
pub mod cooperative_close;
pub mod directory;
pub mod error;
pub mod manager;
pub mod security;

pub use balance_proof::{BalanceProof, BalanceProofCodec, Secp256k1Scheme, SignatureScheme};
pub use channel::{Channel, ChannelFilter, ChannelKey, ChannelState};
pub use constants::*;
pub use cooperative_close::{BulkCloseReport, CloseOutcome, ClosingProof, CooperativeClose};
pub use directory::ChannelDirectory;
pub use error::ChannelError;
pub use manager::{BalanceUpdate, ChannelManager, InMemoryChannelManager};
