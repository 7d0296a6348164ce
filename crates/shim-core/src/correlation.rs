//! Correlation Table - suspends a task until the peer answers its state request.
//!
//! One table per execution context. At most one entry exists at a time.
//!
//! Flow:
//! 1. Worker calls `register()` and gets a oneshot receiver
//! 2. Worker sends the state request frame
//! 3. Dispatch receives RESPONSE/ERROR and calls `resolve()`
//! 4. Worker awaits the receiver, or times out and calls `cancel_pending()`

use crate::errors::ShimError;
use parking_lot::Mutex;
use shim_types::{MessageType, TxKey};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// What a suspended caller is resumed with.
pub type Reply = Result<Vec<u8>, ShimError>;

/// The single outstanding request of a context.
struct PendingEntry {
    /// Outbound request type (for logging and diagnostics)
    request: MessageType,
    /// Channel to resume the caller
    sender: oneshot::Sender<Reply>,
    /// When the request was registered
    created_at: Instant,
}

/// Statistics for one correlation table
#[derive(Debug, Default)]
pub struct CorrelationStats {
    /// Total requests registered
    pub registered: AtomicU64,
    /// Total requests resolved by a reply
    pub completed: AtomicU64,
    /// Total requests removed by timeout or send failure
    pub timed_out: AtomicU64,
    /// Total requests cancelled by shutdown
    pub cancelled: AtomicU64,
}

/// Per-context correlation table.
pub struct CorrelationTable {
    key: TxKey,
    slot: Mutex<Option<PendingEntry>>,
    stats: CorrelationStats,
}

impl CorrelationTable {
    pub fn new(key: TxKey) -> Self {
        Self {
            key,
            slot: Mutex::new(None),
            stats: CorrelationStats::default(),
        }
    }

    /// Register the outstanding request.
    ///
    /// Fails with `ProtocolViolation` if another request is still pending.
    pub fn register(&self, request: MessageType) -> Result<oneshot::Receiver<Reply>, ShimError> {
        let mut slot = self.slot.lock();
        if let Some(existing) = slot.as_ref() {
            return Err(ShimError::violation(
                &self.key,
                format!(
                    "{request} issued while {} is still outstanding",
                    existing.request
                ),
            ));
        }

        let (tx, rx) = oneshot::channel();
        *slot = Some(PendingEntry {
            request,
            sender: tx,
            created_at: Instant::now(),
        });
        self.stats.registered.fetch_add(1, Ordering::Relaxed);

        debug!(txid = %self.key, request = %request, "Registered pending request");
        Ok(rx)
    }

    /// Resolve the outstanding request with a reply.
    ///
    /// Returns false if nothing was pending; the reply is dropped.
    pub fn resolve(&self, reply: Reply) -> bool {
        let Some(entry) = self.slot.lock().take() else {
            warn!(txid = %self.key, "Reply with no outstanding request, dropping");
            return false;
        };

        let elapsed = entry.created_at.elapsed();
        if entry.sender.send(reply).is_err() {
            // Caller gave up between timeout and removal
            self.stats.cancelled.fetch_add(1, Ordering::Relaxed);
            debug!(txid = %self.key, request = %entry.request, "Pending caller dropped");
            return false;
        }

        self.stats.completed.fetch_add(1, Ordering::Relaxed);
        debug!(
            txid = %self.key,
            request = %entry.request,
            response_time_ms = elapsed.as_millis(),
            "Completed pending request"
        );
        true
    }

    /// Remove the entry without resolving it (timeout or send failure).
    ///
    /// Returns false if a reply already took it.
    pub fn cancel_pending(&self) -> bool {
        match self.slot.lock().take() {
            Some(entry) => {
                self.stats.timed_out.fetch_add(1, Ordering::Relaxed);
                warn!(
                    txid = %self.key,
                    request = %entry.request,
                    elapsed_ms = entry.created_at.elapsed().as_millis(),
                    "Removed pending request without reply"
                );
                true
            }
            None => false,
        }
    }

    /// Resolve any outstanding entry with `TaskCancelled`.
    pub fn cancel_all(&self) -> bool {
        let Some(entry) = self.slot.lock().take() else {
            return false;
        };
        self.stats.cancelled.fetch_add(1, Ordering::Relaxed);
        debug!(txid = %self.key, request = %entry.request, "Cancelling pending request");
        let _ = entry.sender.send(Err(ShimError::TaskCancelled {
            key: self.key.to_string(),
        }));
        true
    }

    /// Check if a request is outstanding
    pub fn is_pending(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Type of the outstanding request, if any
    pub fn pending_type(&self) -> Option<MessageType> {
        self.slot.lock().as_ref().map(|e| e.request)
    }

    /// Get statistics
    pub fn stats(&self) -> &CorrelationStats {
        &self.stats
    }
}
