//! # Shim Telemetry
//!
//! Structured logging for the chaincode shim.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use shim_telemetry::{init_telemetry, TelemetryConfig};
//!
//! fn main() {
//!     let _guard = init_telemetry(TelemetryConfig::from_env()).expect("Failed to init telemetry");
//!     // Logs are now being collected
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `OTEL_SERVICE_NAME` | `chaincode-shim` | Service name on every log line |
//! | `SHIM_LOG_LEVEL` / `RUST_LOG` | `info` | Log level filter |
//! | `SHIM_CONSOLE_OUTPUT` | `true` | Emit to stdout |
//! | `SHIM_JSON_LOGS` | `false` (`true` in containers) | JSON formatted logs |

#![allow(missing_docs)]

mod config;
mod tracing_setup;

pub use config::TelemetryConfig;
pub use tracing_setup::TracingGuard;

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize tracing subscriber: {0}")]
    TracerInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Initialize logging for the process.
///
/// Returns a guard that should be held for the lifetime of the application.
/// Fails if a global subscriber is already installed.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TracingGuard, TelemetryError> {
    tracing_setup::init_tracing(&config)
}

