use alloy::primitives::U256;

/// Prefix of the channel management API.
pub const API_PATH: &str = "/api/1";

/// Largest balance the channel contract can store (`uint192`).
pub const MAX_BALANCE: U256 = U256::from_limbs([u64::MAX, u64::MAX, u64::MAX, 0]);

/// Default bound on the startup wait for channel synchronization.
pub const DEFAULT_SYNC_TIMEOUT_SECS: u64 = 60;

/// Default number of polls for the server to report started before stopping it.
pub const DEFAULT_STOP_ATTEMPTS: u32 = 5;

/// Default sleep between stop polls.
pub const DEFAULT_STOP_BACKOFF_MS: u64 = 1000;
