//! # Chaincode Shim Runtime
//!
//! Entry point for a chaincode process launched by a peer.
//!
//! ## Startup Sequence
//!
//! 1. Load configuration from the environment
//! 2. Initialize logging
//! 3. Connect to the peer and register
//! 4. Serve invocations until the stream is lost, then exit non-zero

use std::sync::Arc;

use anyhow::{Context, Result};
use shim_core::ShimConfig;
use shim_runtime::{KvChaincode, ShimRuntime};
use shim_telemetry::{init_telemetry, TelemetryConfig};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = ShimConfig::from_env().context("failed to load shim configuration")?;

    // Initialize logging
    let _telemetry = init_telemetry(TelemetryConfig::for_chaincode(&config.chaincode_id.name))
        .context("failed to initialize telemetry")?;

    info!(
        chaincode = %config.chaincode_id.name,
        peer = %config.peer_address,
        "Chaincode shim starting"
    );

    let runtime = ShimRuntime::new(config, Arc::new(KvChaincode));

    tokio::select! {
        result = runtime.run() => result,
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for shutdown signal")?;
            warn!("Interrupted, shutting down");
            Ok(())
        }
    }
}
