//! Paywalled HTTP proxy for off-chain payment channels.
//!
//! Clients pay for each request by sending a balance proof for their channel
//! to this proxy's receiver in `RDN-*` request headers. Requests without a
//! valid proof get `402 Payment Required` with the terms needed to open or
//! top up a channel.
//!
//! # Modules
//!
//! - [`lifecycle`] — [`PaywalledProxy`]: wait for channel sync, serve, stop
//! - [`routes`] — the static route table and its handlers
//! - [`middleware`] — per-request payment gating
//! - [`content`] — paywalled resource registry
//! - [`config`] — environment-driven configuration

pub mod config;
pub mod content;
pub mod cors;
pub mod error;
pub mod headers;
pub mod lifecycle;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod upstream;

pub use config::ProxyConfig;
pub use content::{ContentRegistry, PaywalledContent};
pub use error::ProxyError;
pub use lifecycle::{PaywalledProxy, ProxyState, StopPolicy};
pub use state::AppState;
