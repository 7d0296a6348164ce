//! # Shim Runtime Library
//!
//! Hosts one chaincode for the lifetime of one peer connection. The `main.rs`
//! binary wires it to the environment; tests drive it over an in-memory
//! transport.

#![allow(missing_docs)]

pub mod sample;

use std::sync::Arc;

use anyhow::{Context, Result};
use shim_core::{Chaincode, ChaincodeSupportClient, InvocationTaskManager, ShimConfig, ShimError};
use shim_stream::Transport;
use tracing::{error, info};

pub use sample::KvChaincode;

/// One chaincode bound to one configuration.
pub struct ShimRuntime {
    config: ShimConfig,
    chaincode: Arc<dyn Chaincode>,
}

impl ShimRuntime {
    pub fn new(config: ShimConfig, chaincode: Arc<dyn Chaincode>) -> Self {
        Self { config, chaincode }
    }

    pub fn config(&self) -> &ShimConfig {
        &self.config
    }

    /// Connect over TCP and serve until the stream is lost.
    pub async fn run(self) -> Result<()> {
        self.config
            .validate()
            .context("invalid shim configuration")?;

        let peer = self.config.peer_address.clone();
        let client = ChaincodeSupportClient::connect(self.config.clone())
            .await
            .with_context(|| format!("failed to connect to peer at {peer}"))?;

        let err = self.serve(client).await;
        Err(err).context("chaincode shim stopped")
    }

    /// Serve over an already connected transport.
    ///
    /// Returns the reason the connected lifetime ended.
    pub async fn run_with_transport(self, transport: Arc<dyn Transport>) -> ShimError {
        let client = ChaincodeSupportClient::new(transport, self.config.clone());
        self.serve(client).await
    }

    async fn serve(self, client: ChaincodeSupportClient) -> ShimError {
        let manager = Arc::new(InvocationTaskManager::new(self.chaincode, &self.config));
        info!(
            chaincode = %self.config.chaincode_id.name,
            max_workers = self.config.max_workers,
            "Starting chaincode shim"
        );

        match client.start(Some(manager)).await {
            Ok(()) => ShimError::Transport(shim_stream::TransportError::Closed),
            Err(e) => {
                error!(error = %e, fatal = e.is_fatal(), "Shim stopped");
                e
            }
        }
    }
}
