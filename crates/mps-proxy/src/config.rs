use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use mps::{Channel, DEFAULT_STOP_ATTEMPTS, DEFAULT_STOP_BACKOFF_MS, DEFAULT_SYNC_TIMEOUT_SECS};

use crate::lifecycle::StopPolicy;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 5000;
const DEFAULT_RATE_LIMIT_RPM: u32 = 600;

#[derive(Clone)]
pub struct ProxyConfig {
    /// Receiver key. Counter-signs cooperative closes.
    pub receiver_key: PrivateKeySigner,
    /// Channel contract the balance proofs are bound to
    pub contract_address: Address,
    /// Token the channels are denominated in, advertised to clients
    pub token_address: Address,
    pub host: String,
    pub port: u16,
    /// Directory served under `/js` (None = no static route)
    pub static_dir: Option<PathBuf>,
    /// JSON file listing paywalled resources
    pub content_file: Option<PathBuf>,
    /// JSON file of channels to seed the in-memory manager with
    pub channels_file: Option<PathBuf>,
    /// How long `start` waits for the channel manager to sync
    pub sync_timeout: Duration,
    /// Readiness polling applied by `stop`
    pub stop_policy: StopPolicy,
    /// Bearer token for mutating admin routes (None = mutations disabled)
    pub admin_token: Option<String>,
    /// Bearer token required for /metrics (None = public)
    pub metrics_token: Option<String>,
    /// CORS allowed origins
    pub allowed_origins: Vec<String>,
    /// Rate limit requests per minute (0 = off)
    pub rate_limit_rpm: u32,
}

impl std::fmt::Debug for ProxyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyConfig")
            .field("receiver_key", &"[REDACTED]")
            .field("receiver_address", &self.receiver_key.address())
            .field("contract_address", &self.contract_address)
            .field("token_address", &self.token_address)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("static_dir", &self.static_dir)
            .field("content_file", &self.content_file)
            .field("channels_file", &self.channels_file)
            .field("sync_timeout", &self.sync_timeout)
            .field("stop_policy", &self.stop_policy)
            .field("admin_token", &self.admin_token.as_ref().map(|_| "[REDACTED]"))
            .field(
                "metrics_token",
                &self.metrics_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("allowed_origins", &self.allowed_origins)
            .field("rate_limit_rpm", &self.rate_limit_rpm)
            .finish()
    }
}

impl ProxyConfig {
    /// Defaults for everything except the receiver key.
    pub fn new(receiver_key: PrivateKeySigner) -> Self {
        Self {
            receiver_key,
            contract_address: Address::ZERO,
            token_address: Address::ZERO,
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            static_dir: None,
            content_file: None,
            channels_file: None,
            sync_timeout: Duration::from_secs(DEFAULT_SYNC_TIMEOUT_SECS),
            stop_policy: StopPolicy::new(
                DEFAULT_STOP_ATTEMPTS,
                Duration::from_millis(DEFAULT_STOP_BACKOFF_MS),
            ),
            admin_token: None,
            metrics_token: None,
            allowed_origins: vec!["http://localhost:3000".to_string()],
            rate_limit_rpm: 0,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        // Required: receiver key
        let key_str = env::var("RECEIVER_PRIVATE_KEY")
            .map_err(|_| ConfigError::MissingRequired("RECEIVER_PRIVATE_KEY"))?;
        let receiver_key: PrivateKeySigner = key_str
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidPrivateKey)?;

        let contract_address = optional_address("CONTRACT_ADDRESS")?;
        let token_address = optional_address("TOKEN_ADDRESS")?;

        let host = env::var("HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string());
        let port = env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let static_dir = optional_path("STATIC_DIR");
        let content_file = optional_path("CONTENT_FILE");
        let channels_file = optional_path("CHANNELS_FILE");

        let sync_timeout = Duration::from_secs(parse_or(
            "SYNC_TIMEOUT_SECS",
            DEFAULT_SYNC_TIMEOUT_SECS,
        )?);
        let stop_policy = StopPolicy::new(
            parse_or("STOP_ATTEMPTS", DEFAULT_STOP_ATTEMPTS)?,
            Duration::from_millis(parse_or("STOP_BACKOFF_MS", DEFAULT_STOP_BACKOFF_MS)?),
        );

        let admin_token = env::var("ADMIN_TOKEN").ok().filter(|s| !s.is_empty());
        let metrics_token = env::var("METRICS_TOKEN").ok().filter(|s| !s.is_empty());

        let allowed_origins: Vec<String> = env::var("ALLOWED_ORIGINS")
            .map(|s| {
                s.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_else(|_| vec!["http://localhost:3000".to_string()]);

        let rate_limit_rpm = env::var("RATE_LIMIT_RPM")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_RATE_LIMIT_RPM);

        if contract_address == Address::ZERO {
            tracing::warn!("CONTRACT_ADDRESS not set, balance proofs bind to the zero address");
        }
        if admin_token.is_none() {
            tracing::warn!("ADMIN_TOKEN not set, channel close routes are disabled");
        }
        if metrics_token.is_none() {
            tracing::warn!("METRICS_TOKEN not set, /metrics endpoint is publicly accessible");
        }

        Ok(Self {
            receiver_key,
            contract_address,
            token_address,
            host,
            port,
            static_dir,
            content_file,
            channels_file,
            sync_timeout,
            stop_policy,
            admin_token,
            metrics_token,
            allowed_origins,
            rate_limit_rpm,
        })
    }

    pub fn receiver_address(&self) -> Address {
        self.receiver_key.address()
    }
}

fn optional_address(var: &'static str) -> Result<Address, ConfigError> {
    match env::var(var).ok().filter(|s| !s.trim().is_empty()) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidAddress(value)),
        None => Ok(Address::ZERO),
    }
}

fn optional_path(var: &str) -> Option<PathBuf> {
    env::var(var)
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
}

fn parse_or<T: std::str::FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(var).ok().filter(|s| !s.is_empty()) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { var, value }),
        None => Ok(default),
    }
}

/// Read a JSON array of channels, as written by `GET /api/1/channels`.
pub fn load_channels(path: &Path) -> Result<Vec<Channel>, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_json::from_str(&raw).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingRequired(&'static str),

    #[error("invalid receiver private key")]
    InvalidPrivateKey,

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid value for {var}: {value}")]
    InvalidNumber { var: &'static str, value: String },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
}
