//! # Transport
//!
//! The physical duplex seam. A `Transport` moves whole frames; it knows
//! nothing about subscribers, ordering guarantees, or transactions. Those
//! live in [`StreamChannel`](crate::StreamChannel).

use crate::errors::TransportError;
use async_trait::async_trait;
use parking_lot::Mutex;
use shim_types::ChaincodeMessage;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::debug;

/// A connected duplex carrying frames.
///
/// `send_frame` and `recv_frame` may be called concurrently from different
/// tasks. `recv_frame` returns `TransportError::Closed` once the remote
/// side has gone away.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Write one frame.
    async fn send_frame(&self, frame: ChaincodeMessage) -> Result<(), TransportError>;

    /// Read the next frame.
    async fn recv_frame(&self) -> Result<ChaincodeMessage, TransportError>;

    /// Close the local side. Idempotent.
    fn close(&self);

    /// Whether `close` has been called.
    fn is_closed(&self) -> bool;
}

/// In-process transport backed by a pair of tokio mpsc queues.
///
/// Used by tests and by embedders that host the peer in the same process.
pub struct MemoryTransport {
    /// Outbound half; taken on close so the remote side observes EOF.
    tx: Mutex<Option<mpsc::UnboundedSender<ChaincodeMessage>>>,
    /// Inbound half.
    rx: AsyncMutex<mpsc::UnboundedReceiver<ChaincodeMessage>>,
    closed: AtomicBool,
}

impl MemoryTransport {
    /// Create two connected endpoints.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (Self::new(a_tx, a_rx), Self::new(b_tx, b_rx))
    }

    fn new(
        tx: mpsc::UnboundedSender<ChaincodeMessage>,
        rx: mpsc::UnboundedReceiver<ChaincodeMessage>,
    ) -> Self {
        Self {
            tx: Mutex::new(Some(tx)),
            rx: AsyncMutex::new(rx),
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send_frame(&self, frame: ChaincodeMessage) -> Result<(), TransportError> {
        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            return Err(TransportError::Closed);
        };
        tx.send(frame).map_err(|_| TransportError::Closed)
    }

    async fn recv_frame(&self) -> Result<ChaincodeMessage, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let mut rx = self.rx.lock().await;
        rx.recv().await.ok_or(TransportError::Closed)
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.tx.lock().take();
            debug!("Memory transport closed");
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
