//! Support Client - connects, registers, and hands the stream to the manager.
//!
//! Handshake:
//!
//! ```text
//! shim                         peer
//!  │ ── REGISTER{ChaincodeId} ──► │
//!  │ ◄──────── REGISTERED ─────── │  (zero or more, skipped)
//!  │ ◄────────── READY ────────── │
//!  │        steady state          │
//! ```
//!
//! ERROR, an unexpected frame, stream loss or the registration timeout
//! before READY all fail with `ShimError::Registration`.

use crate::config::ShimConfig;
use crate::errors::{ShimError, ShimResult};
use crate::manager::InvocationTaskManager;
use shim_stream::{FramedTransport, StreamChannel, Transport};
use shim_types::{encode, ChaincodeMessage, MessageType};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Drives one connection to the peer.
pub struct ChaincodeSupportClient {
    transport: Arc<dyn Transport>,
    config: ShimConfig,
}

impl ChaincodeSupportClient {
    /// Wrap an already connected transport.
    pub fn new(transport: Arc<dyn Transport>, config: ShimConfig) -> Self {
        Self { transport, config }
    }

    /// Connect to `config.peer_address` over TCP.
    pub async fn connect(config: ShimConfig) -> ShimResult<Self> {
        config.validate()?;
        info!(peer = %config.peer_address, "Connecting to peer");
        let transport = FramedTransport::connect(&config.peer_address, config.max_frame_size).await?;
        Ok(Self::new(Arc::new(transport), config))
    }

    /// Register and serve until the stream closes.
    ///
    /// Never returns `Ok`: the connected lifetime ends with the closure
    /// reason as `ShimError::Transport`, after every active task has been
    /// cancelled.
    pub async fn start(self, task_manager: Option<Arc<InvocationTaskManager>>) -> ShimResult<()> {
        let Some(task_manager) = task_manager else {
            return Err(ShimError::InvalidArgument(
                "task manager is required".into(),
            ));
        };
        self.config.validate()?;

        let channel = StreamChannel::open(Arc::clone(&self.transport));

        if let Err(e) = self.register(&channel).await {
            error!(error = %e, "Registration failed");
            channel.close();
            return Err(e);
        }

        // Bound only once READY, so a failed handshake leaves the manager
        // without a dead sink.
        task_manager.bind(channel.clone());
        channel.subscribe(task_manager.clone())?;
        info!(chaincode = %self.config.chaincode_id.name, "Chaincode registered, serving");

        let reason = channel.closed().await;
        let cancelled = task_manager.shutdown();
        error!(reason = %reason, cancelled, "Peer stream lost");
        Err(ShimError::Transport(reason))
    }

    async fn register(&self, channel: &StreamChannel) -> ShimResult<()> {
        let payload = encode(&self.config.chaincode_id)?;
        channel.send(ChaincodeMessage::connection(MessageType::Register, payload))?;
        debug!(chaincode = %self.config.chaincode_id.name, "Sent REGISTER");

        let timeout = self.config.registration_timeout();
        match tokio::time::timeout(timeout, await_ready(channel)).await {
            Ok(result) => result,
            Err(_) => Err(ShimError::Registration(format!(
                "no READY within {}ms",
                timeout.as_millis()
            ))),
        }
    }
}

async fn await_ready(channel: &StreamChannel) -> ShimResult<()> {
    loop {
        let frame = channel.recv_next().await.map_err(|e| {
            ShimError::Registration(format!("stream closed during handshake: {e}"))
        })?;

        match frame.msg_type {
            MessageType::Ready => {
                debug!("Received READY");
                return Ok(());
            }
            MessageType::Registered => {
                debug!("Received REGISTERED, waiting for READY");
            }
            MessageType::Keepalive => {
                channel.send(ChaincodeMessage::keepalive(frame.payload))?;
            }
            MessageType::Error => {
                return Err(ShimError::Registration(frame.payload_text()));
            }
            other => {
                warn!(msg_type = %other, "Unexpected frame during handshake");
                return Err(ShimError::Registration(format!(
                    "unexpected {other} before READY"
                )));
            }
        }
    }
}
