//! # Invocation Task Manager
//!
//! Sole consumer of inbound frames once the handshake is done. Routes each
//! frame by `(channel_id, txid)`:
//!
//! | Frame | Known key | Unknown key |
//! |-------|-----------|-------------|
//! | KEEPALIVE | echo | echo |
//! | INIT / TRANSACTION | reject, ERROR reply | create and start task |
//! | RESPONSE / ERROR | resume the task | drop |
//! | anything else | drop | drop |
//!
//! Dispatch never waits: task bodies run on a bounded worker pool and acquire
//! their permit inside the worker.
//!
//! One manager serves one connection. After `shutdown` it drops every frame.

use crate::chaincode::Chaincode;
use crate::config::ShimConfig;
use crate::errors::ShimError;
use crate::sink::FrameSink;
use crate::task::{InvocationTask, TaskRegistry};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use shim_stream::{FrameConsumer, TransportError};
use shim_types::{ChaincodeMessage, MessageType, TxKey};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// What happened to one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// A new task was created and started.
    Started,
    /// The frame resumed a suspended task.
    Delivered,
    /// Duplicate start frame; an ERROR was sent for the key.
    Rejected(ShimError),
    /// Stale, unmatched or unexpected frame.
    Dropped,
    /// KEEPALIVE answered.
    KeepaliveEchoed,
}

/// Manager counters.
#[derive(Debug, Default)]
pub struct ManagerStats {
    pub tasks_started: AtomicU64,
    pub duplicates_rejected: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub keepalives: AtomicU64,
    pub tasks_cancelled: AtomicU64,
}

/// Registry of active invocations for one chaincode identity.
pub struct InvocationTaskManager {
    chaincode: Arc<dyn Chaincode>,
    request_timeout: Duration,
    registry: Arc<TaskRegistry>,
    workers: Arc<Semaphore>,
    sink: RwLock<Option<Arc<dyn FrameSink>>>,
    /// Held for reading across each registry insert, so `shutdown` never
    /// misses a task that is being added.
    shut_down: RwLock<bool>,
    stats: ManagerStats,
}

impl InvocationTaskManager {
    pub fn new(chaincode: Arc<dyn Chaincode>, config: &ShimConfig) -> Self {
        Self {
            chaincode,
            request_timeout: config.request_timeout(),
            registry: Arc::new(DashMap::new()),
            workers: Arc::new(Semaphore::new(config.max_workers.max(1))),
            sink: RwLock::new(None),
            shut_down: RwLock::new(false),
            stats: ManagerStats::default(),
        }
    }

    /// Attach the outbound side of the stream.
    pub fn bind(&self, sink: Arc<dyn FrameSink>) {
        *self.sink.write() = Some(sink);
    }

    fn sink(&self) -> Option<Arc<dyn FrameSink>> {
        self.sink.read().clone()
    }

    /// Route one inbound frame. Never blocks.
    pub fn on_inbound_frame(&self, frame: ChaincodeMessage) -> Dispatch {
        let Some(sink) = self.sink() else {
            warn!(frame = %frame, "No stream bound, dropping frame");
            return self.dropped();
        };

        if frame.msg_type == MessageType::Keepalive {
            self.stats.keepalives.fetch_add(1, Ordering::Relaxed);
            if let Err(e) = sink.send_frame(ChaincodeMessage::keepalive(frame.payload)) {
                warn!(error = %e, "Keepalive echo failed");
            }
            return Dispatch::KeepaliveEchoed;
        }

        if self.is_shut_down() {
            debug!(frame = %frame, "Manager shut down, dropping frame");
            return self.dropped();
        }

        if frame.msg_type.is_start() {
            return self.start_task(frame, sink);
        }

        let key = frame.key();
        let task = self.registry.get(&key).map(|e| Arc::clone(e.value()));
        match task {
            Some(task) => {
                if task.handle_inbound(frame) {
                    Dispatch::Delivered
                } else {
                    self.dropped()
                }
            }
            None => {
                warn!(
                    txid = %key,
                    msg_type = %frame.msg_type,
                    "Frame for unknown transaction, dropping"
                );
                self.dropped()
            }
        }
    }

    fn start_task(&self, frame: ChaincodeMessage, sink: Arc<dyn FrameSink>) -> Dispatch {
        let key = frame.key();
        let gate = self.shut_down.read();
        if *gate {
            debug!(txid = %key, "Manager shut down, dropping start frame");
            return self.dropped();
        }
        let task = match self.registry.entry(key.clone()) {
            Entry::Occupied(_) => {
                let err = ShimError::violation(
                    &key,
                    format!("duplicate {} for active transaction", frame.msg_type),
                );
                warn!(txid = %key, error = %err, "Rejecting duplicate start frame");
                self.stats.duplicates_rejected.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = sink.send_frame(ChaincodeMessage::error(&key, err.to_string())) {
                    warn!(txid = %key, error = %e, "Rejection not delivered");
                }
                return Dispatch::Rejected(err);
            }
            Entry::Vacant(slot) => {
                let task = Arc::new(InvocationTask::new(
                    key.clone(),
                    sink,
                    self.request_timeout,
                    Arc::downgrade(&self.registry),
                ));
                slot.insert(Arc::clone(&task));
                task
            }
        };
        drop(gate);

        match task.start(frame, Arc::clone(&self.chaincode), Arc::clone(&self.workers)) {
            Ok(()) => {
                self.stats.tasks_started.fetch_add(1, Ordering::Relaxed);
                debug!(txid = %key, "Task started");
                Dispatch::Started
            }
            Err(e) => {
                task.fail(&e);
                Dispatch::Rejected(e)
            }
        }
    }

    fn dropped(&self) -> Dispatch {
        self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
        Dispatch::Dropped
    }

    /// Remove a task. Returns whether anything was removed.
    pub fn deregister(&self, key: &TxKey) -> bool {
        self.registry.remove(key).is_some()
    }

    /// Cancel every active task and clear the registry.
    ///
    /// Returns the number of tasks cancelled. Later calls return 0.
    pub fn shutdown(&self) -> usize {
        {
            let mut shut_down = self.shut_down.write();
            if *shut_down {
                return 0;
            }
            *shut_down = true;
        }
        self.workers.close();

        let tasks: Vec<Arc<InvocationTask>> =
            self.registry.iter().map(|e| Arc::clone(e.value())).collect();
        let cancelled = tasks.iter().filter(|t| t.cancel()).count();
        self.registry.clear();

        self.stats
            .tasks_cancelled
            .fetch_add(cancelled as u64, Ordering::Relaxed);
        info!(cancelled, "Task manager shut down");
        cancelled
    }

    /// Whether `shutdown` has run.
    pub fn is_shut_down(&self) -> bool {
        *self.shut_down.read()
    }

    /// Number of registered tasks.
    pub fn active_tasks(&self) -> usize {
        self.registry.len()
    }

    pub fn contains(&self, key: &TxKey) -> bool {
        self.registry.contains_key(key)
    }

    pub fn task(&self, key: &TxKey) -> Option<Arc<InvocationTask>> {
        self.registry.get(key).map(|e| Arc::clone(e.value()))
    }

    pub fn stats(&self) -> &ManagerStats {
        &self.stats
    }
}

impl FrameConsumer for InvocationTaskManager {
    fn on_frame(&self, frame: ChaincodeMessage) {
        let _ = self.on_inbound_frame(frame);
    }

    fn on_close(&self, reason: &TransportError) {
        warn!(reason = %reason, active = self.active_tasks(), "Stream closed, cancelling tasks");
        self.shutdown();
    }
}
