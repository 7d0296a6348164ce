//! Shim configuration with validation.
//!
//! Options are read from the environment by the bootstrap binary and may be
//! overridden in code with the `with_*` setters.
//!
//! | Variable | Field | Default |
//! |----------|-------|---------|
//! | `CORE_CHAINCODE_ID_NAME` | `chaincode_id` | (required) |
//! | `CORE_PEER_ADDRESS` | `peer_address` | `127.0.0.1:7052` |
//! | `SHIM_REQUEST_TIMEOUT_MS` | `request_timeout_ms` | 30000 |
//! | `SHIM_REGISTRATION_TIMEOUT_MS` | `registration_timeout_ms` | 10000 |
//! | `SHIM_MAX_WORKERS` | `max_workers` | 16 |
//! | `SHIM_MAX_FRAME_SIZE` | `max_frame_size` | 100 MiB |

use serde::{Deserialize, Serialize};
use shim_stream::DEFAULT_MAX_FRAME_SIZE;
use shim_types::ChaincodeId;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// No chaincode name was provided.
    #[error("chaincode id is empty; set CORE_CHAINCODE_ID_NAME")]
    MissingChaincodeId,

    /// A timeout was zero.
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),

    /// A limit was zero.
    #[error("invalid limit: {0}")]
    InvalidLimit(String),

    /// An environment variable did not parse.
    #[error("invalid value for {var}: {value:?}")]
    InvalidValue { var: String, value: String },
}

/// Main shim configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShimConfig {
    /// Identity sent with REGISTER.
    pub chaincode_id: ChaincodeId,
    /// Peer chaincode-support endpoint, `host:port`.
    pub peer_address: String,
    /// Per-call timeout for state requests.
    pub request_timeout_ms: u64,
    /// How long to wait for READY after REGISTER.
    pub registration_timeout_ms: u64,
    /// Bound on concurrently executing chaincode invocations.
    pub max_workers: usize,
    /// Largest frame accepted or sent.
    pub max_frame_size: usize,
}

impl Default for ShimConfig {
    fn default() -> Self {
        Self {
            chaincode_id: ChaincodeId::new(""),
            peer_address: "127.0.0.1:7052".to_string(),
            request_timeout_ms: 30_000,
            registration_timeout_ms: 10_000,
            max_workers: 16,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl ShimConfig {
    /// Configuration for a named chaincode with defaults elsewhere.
    pub fn new(chaincode_name: impl Into<String>) -> Self {
        Self {
            chaincode_id: ChaincodeId::new(chaincode_name),
            ..Self::default()
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let chaincode_id = ChaincodeId {
            name: env::var("CORE_CHAINCODE_ID_NAME").unwrap_or_default(),
            version: env::var("CORE_CHAINCODE_ID_VERSION").ok(),
        };

        let config = Self {
            chaincode_id,
            peer_address: env::var("CORE_PEER_ADDRESS").unwrap_or(defaults.peer_address),
            request_timeout_ms: parse_var("SHIM_REQUEST_TIMEOUT_MS", defaults.request_timeout_ms)?,
            registration_timeout_ms: parse_var(
                "SHIM_REGISTRATION_TIMEOUT_MS",
                defaults.registration_timeout_ms,
            )?,
            max_workers: parse_var("SHIM_MAX_WORKERS", defaults.max_workers)?,
            max_frame_size: parse_var("SHIM_MAX_FRAME_SIZE", defaults.max_frame_size)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chaincode_id.name.trim().is_empty() {
            return Err(ConfigError::MissingChaincodeId);
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout(
                "request timeout cannot be 0".into(),
            ));
        }
        if self.registration_timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout(
                "registration timeout cannot be 0".into(),
            ));
        }
        if self.max_workers == 0 {
            return Err(ConfigError::InvalidLimit("max_workers cannot be 0".into()));
        }
        if self.max_frame_size == 0 {
            return Err(ConfigError::InvalidLimit(
                "max_frame_size cannot be 0".into(),
            ));
        }
        Ok(())
    }

    /// Per-call state request timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Handshake timeout.
    #[must_use]
    pub fn registration_timeout(&self) -> Duration {
        Duration::from_millis(self.registration_timeout_ms)
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_registration_timeout(mut self, timeout: Duration) -> Self {
        self.registration_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_peer_address(mut self, peer_address: impl Into<String>) -> Self {
        self.peer_address = peer_address.into();
        self
    }
}

fn parse_var<T: FromStr>(var: &str, default: T) -> Result<T, ConfigError> {
    match env::var(var) {
        Ok(value) => value.trim().parse().map_err(|_| ConfigError::InvalidValue {
            var: var.to_string(),
            value,
        }),
        Err(_) => Ok(default),
    }
}
