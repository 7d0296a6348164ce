//! # Stream Channel
//!
//! Owns one [`Transport`] for the connected lifetime of the shim.
//!
//! ```text
//!  send() ──► outbound queue ──► [writer task] ──► transport.send_frame
//!
//!  transport.recv_frame ──► [reader task] ──► inbound queue
//!                                               │
//!                           before subscribe:   ├──► recv_next()
//!                           after subscribe:    └──► [dispatch task] ──► consumer.on_frame
//!                                                                   └──► consumer.on_close (once)
//! ```
//!
//! ## Guarantees
//!
//! - Inbound frames reach exactly one consumer, in arrival order.
//! - Concurrent `send` callers never wait on the socket; the writer task
//!   serialises physical writes.
//! - The channel transitions to CLOSED once. After that, `send` fails fast
//!   and `on_close` is invoked exactly once.
//! - No reconnection.

use crate::errors::TransportError;
use crate::transport::Transport;
use parking_lot::Mutex;
use shim_types::ChaincodeMessage;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, trace, warn};

/// Sole consumer of inbound frames.
///
/// `on_frame` is called sequentially from the dispatch task and must not
/// block on long-running work; it should enqueue or resolve and return.
pub trait FrameConsumer: Send + Sync + 'static {
    /// Handle one inbound frame.
    fn on_frame(&self, frame: ChaincodeMessage);

    /// The stream has closed. Called exactly once, after the last frame.
    fn on_close(&self, reason: &TransportError);
}

/// Channel counters.
#[derive(Debug, Default)]
pub struct ChannelStats {
    /// Frames handed to the transport.
    pub frames_sent: AtomicU64,
    /// Frames read from the transport.
    pub frames_received: AtomicU64,
}

/// Shared close state.
struct CloseState {
    /// First recorded reason wins.
    reason: Mutex<Option<TransportError>>,
    /// Flips to `true` exactly once.
    closed_tx: watch::Sender<bool>,
}

impl CloseState {
    /// Record the closure. Returns `true` for the first caller only.
    fn close(&self, reason: TransportError) -> bool {
        {
            let mut slot = self.reason.lock();
            if slot.is_some() {
                return false;
            }
            *slot = Some(reason);
        }
        self.closed_tx.send_replace(true);
        true
    }

    fn is_closed(&self) -> bool {
        *self.closed_tx.borrow()
    }

    fn reason(&self) -> TransportError {
        self.reason.lock().clone().unwrap_or(TransportError::Closed)
    }
}

/// A connected, single-shot frame stream.
pub struct StreamChannel {
    transport: Arc<dyn Transport>,
    outbound: mpsc::UnboundedSender<ChaincodeMessage>,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<ChaincodeMessage>>>,
    state: Arc<CloseState>,
    stats: Arc<ChannelStats>,
}

impl StreamChannel {
    /// Take ownership of a connected transport and start the I/O tasks.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(transport: Arc<dyn Transport>) -> Arc<Self> {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (closed_tx, _) = watch::channel(false);

        let state = Arc::new(CloseState {
            reason: Mutex::new(None),
            closed_tx,
        });
        let stats = Arc::new(ChannelStats::default());

        tokio::spawn(write_loop(
            Arc::clone(&transport),
            outbound_rx,
            Arc::clone(&state),
            Arc::clone(&stats),
        ));
        tokio::spawn(read_loop(
            Arc::clone(&transport),
            inbound_tx,
            Arc::clone(&state),
            Arc::clone(&stats),
        ));

        debug!("Stream channel opened");

        Arc::new(Self {
            transport,
            outbound: outbound_tx,
            inbound: Mutex::new(Some(inbound_rx)),
            state,
            stats,
        })
    }

    /// Queue a frame for the peer.
    ///
    /// Fails with `TransportError::Closed` once the channel has closed.
    pub fn send(&self, frame: ChaincodeMessage) -> Result<(), TransportError> {
        if self.state.is_closed() {
            return Err(self.state.reason());
        }
        trace!(frame = %frame, "Queueing outbound frame");
        self.outbound
            .send(frame)
            .map_err(|_| TransportError::Closed)
    }

    /// Read the next inbound frame before a consumer is installed.
    ///
    /// Used for the registration handshake. Returns the close reason once
    /// the stream has ended, and `AlreadySubscribed` after `subscribe`.
    pub async fn recv_next(&self) -> Result<ChaincodeMessage, TransportError> {
        let Some(mut rx) = self.inbound.lock().take() else {
            return Err(TransportError::AlreadySubscribed);
        };
        let next = rx.recv().await;
        *self.inbound.lock() = Some(rx);
        next.ok_or_else(|| self.state.reason())
    }

    /// Install the sole consumer. Frames are delivered in arrival order on a
    /// dedicated dispatch task; `on_close` follows the last frame.
    pub fn subscribe(&self, consumer: Arc<dyn FrameConsumer>) -> Result<(), TransportError> {
        let Some(rx) = self.inbound.lock().take() else {
            return Err(TransportError::AlreadySubscribed);
        };
        tokio::spawn(dispatch_loop(rx, consumer, Arc::clone(&self.state)));
        debug!("Frame consumer installed");
        Ok(())
    }

    /// Wait until the channel has closed and return the reason.
    pub async fn closed(&self) -> TransportError {
        let mut rx = self.state.closed_tx.subscribe();
        wait_closed(&mut rx).await;
        self.state.reason()
    }

    /// Close the channel locally.
    pub fn close(&self) {
        if self.state.close(TransportError::Closed) {
            debug!("Stream channel closed locally");
        }
        self.transport.close();
    }

    /// Whether the channel has closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    /// Channel counters.
    #[must_use]
    pub fn stats(&self) -> &ChannelStats {
        &self.stats
    }
}

impl Drop for StreamChannel {
    fn drop(&mut self) {
        self.transport.close();
    }
}

/// Resolve once the close flag is set, or its sender is gone.
async fn wait_closed(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

async fn write_loop(
    transport: Arc<dyn Transport>,
    mut outbound: mpsc::UnboundedReceiver<ChaincodeMessage>,
    state: Arc<CloseState>,
    stats: Arc<ChannelStats>,
) {
    let mut closed = state.closed_tx.subscribe();
    loop {
        let frame = tokio::select! {
            frame = outbound.recv() => frame,
            _ = wait_closed(&mut closed) => break,
        };
        let Some(frame) = frame else { break };

        if let Err(e) = transport.send_frame(frame).await {
            error!(error = %e, "Outbound write failed, closing stream");
            state.close(e);
            transport.close();
            break;
        }
        stats.frames_sent.fetch_add(1, Ordering::Relaxed);
    }
    debug!("Writer task exited");
}

async fn read_loop(
    transport: Arc<dyn Transport>,
    inbound: mpsc::UnboundedSender<ChaincodeMessage>,
    state: Arc<CloseState>,
    stats: Arc<ChannelStats>,
) {
    let mut closed = state.closed_tx.subscribe();
    loop {
        let result = tokio::select! {
            result = transport.recv_frame() => result,
            _ = wait_closed(&mut closed) => break,
        };

        match result {
            Ok(frame) => {
                stats.frames_received.fetch_add(1, Ordering::Relaxed);
                if inbound.send(frame).is_err() {
                    break;
                }
            }
            Err(e) => {
                if e == TransportError::Closed {
                    debug!("Peer closed the stream");
                } else {
                    error!(error = %e, "Inbound read failed, closing stream");
                }
                state.close(e);
                transport.close();
                break;
            }
        }
    }
    // Dropping `inbound` ends the dispatch loop after queued frames drain.
    debug!("Reader task exited");
}

async fn dispatch_loop(
    mut inbound: mpsc::UnboundedReceiver<ChaincodeMessage>,
    consumer: Arc<dyn FrameConsumer>,
    state: Arc<CloseState>,
) {
    while let Some(frame) = inbound.recv().await {
        trace!(frame = %frame, "Dispatching inbound frame");
        consumer.on_frame(frame);
    }

    // Local close also ends the reader, so the reason is always recorded here.
    let reason = state.reason();
    warn!(reason = %reason, "Stream ended, notifying consumer");
    consumer.on_close(&reason);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;
    use shim_types::{MessageType, TxKey};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::time::timeout;

    #[derive(Default)]
    struct Recorder {
        frames: Mutex<Vec<ChaincodeMessage>>,
        closes: AtomicUsize,
    }

    impl FrameConsumer for Recorder {
        fn on_frame(&self, frame: ChaincodeMessage) {
            self.frames.lock().push(frame);
        }

        fn on_close(&self, _reason: &TransportError) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn tx_frame(txid: &str) -> ChaincodeMessage {
        ChaincodeMessage::new(MessageType::Transaction, &TxKey::new("ch", txid), Vec::new())
    }

    #[tokio::test]
    async fn test_frames_delivered_in_order() {
        let (local, peer) = MemoryTransport::pair();
        let channel = StreamChannel::open(Arc::new(local));
        let recorder = Arc::new(Recorder::default());
        channel.subscribe(recorder.clone()).unwrap();

        for i in 0..50 {
            peer.send_frame(tx_frame(&format!("t{i}"))).await.unwrap();
        }
        peer.close();

        timeout(Duration::from_secs(1), channel.closed()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let frames = recorder.frames.lock();
        assert_eq!(frames.len(), 50);
        for (i, frame) in frames.iter().enumerate() {
            assert_eq!(frame.txid, format!("t{i}"));
        }
    }

    #[tokio::test]
    async fn test_on_close_called_once() {
        let (local, peer) = MemoryTransport::pair();
        let channel = StreamChannel::open(Arc::new(local));
        let recorder = Arc::new(Recorder::default());
        channel.subscribe(recorder.clone()).unwrap();

        peer.close();
        timeout(Duration::from_secs(1), channel.closed()).await.unwrap();
        channel.close();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(recorder.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_second_subscribe_rejected() {
        let (local, _peer) = MemoryTransport::pair();
        let channel = StreamChannel::open(Arc::new(local));
        channel.subscribe(Arc::new(Recorder::default())).unwrap();
        let second = channel.subscribe(Arc::new(Recorder::default()));
        assert_eq!(second, Err(TransportError::AlreadySubscribed));
    }

    #[tokio::test]
    async fn test_send_after_close_fails_fast() {
        let (local, _peer) = MemoryTransport::pair();
        let channel = StreamChannel::open(Arc::new(local));
        channel.close();
        assert!(channel.is_closed());
        let result = channel.send(ChaincodeMessage::keepalive(Vec::new()));
        assert_eq!(result, Err(TransportError::Closed));
    }

    #[tokio::test]
    async fn test_concurrent_senders() {
        let (local, peer) = MemoryTransport::pair();
        let channel = StreamChannel::open(Arc::new(local));

        let mut handles = Vec::new();
        for i in 0..8 {
            let channel = Arc::clone(&channel);
            handles.push(tokio::spawn(async move {
                for j in 0..10 {
                    channel.send(tx_frame(&format!("{i}-{j}"))).unwrap();
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        for _ in 0..80 {
            timeout(Duration::from_secs(1), peer.recv_frame())
                .await
                .unwrap()
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_recv_next_before_subscribe() {
        let (local, peer) = MemoryTransport::pair();
        let channel = StreamChannel::open(Arc::new(local));
        peer.send_frame(ChaincodeMessage::connection(MessageType::Ready, Vec::new()))
            .await
            .unwrap();

        let frame = timeout(Duration::from_secs(1), channel.recv_next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame.msg_type, MessageType::Ready);

        channel.subscribe(Arc::new(Recorder::default())).unwrap();
        assert_eq!(
            channel.recv_next().await,
            Err(TransportError::AlreadySubscribed)
        );
    }

    #[tokio::test]
    async fn test_stats_count_frames() {
        let (local, peer) = MemoryTransport::pair();
        let channel = StreamChannel::open(Arc::new(local));
        channel.send(ChaincodeMessage::keepalive(Vec::new())).unwrap();
        peer.recv_frame().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(channel.stats().frames_sent.load(Ordering::Relaxed), 1);
    }
}
