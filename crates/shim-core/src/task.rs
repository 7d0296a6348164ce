//! Invocation Task - one execution context for one `(channel_id, txid)`.
//!
//! ```text
//! New ──start──► Executing ──request_state──► AwaitingResponse
//!                   ▲  │                            │
//!                   │  │        RESPONSE / ERROR    │
//!                   │  └─────────◄──────────────────┘
//!                   │
//!                   ├──complete──► Completed   (COMPLETED frame)
//!                   ├──fail──────► Errored     (ERROR frame)
//!                   └──cancel────► Cancelled   (no frame)
//! ```
//!
//! The chaincode body runs on a worker; the dispatch path only ever calls
//! `handle_inbound`, which resolves and returns.

use crate::chaincode::Chaincode;
use crate::correlation::CorrelationTable;
use crate::errors::{ShimError, ShimResult};
use crate::sink::FrameSink;
use crate::stub::ChaincodeStub;
use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::Mutex;
use shim_types::{
    decode, encode, ChaincodeEvent, ChaincodeInput, ChaincodeMessage, MessageType, Response,
    TxKey,
};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, error, info_span, warn, Instrument};

/// Registry of live tasks, owned by the manager.
pub(crate) type TaskRegistry = DashMap<TxKey, Arc<InvocationTask>>;

/// Lifecycle of an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    New,
    Executing,
    AwaitingResponse,
    Completed,
    Errored,
    Cancelled,
}

impl TaskState {
    /// No further frames are sent once terminal.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Errored | Self::Cancelled)
    }
}

/// One execution context.
pub struct InvocationTask {
    key: TxKey,
    state: Mutex<TaskState>,
    correlation: CorrelationTable,
    sink: Arc<dyn FrameSink>,
    request_timeout: Duration,
    registry: Weak<TaskRegistry>,
}

impl InvocationTask {
    pub(crate) fn new(
        key: TxKey,
        sink: Arc<dyn FrameSink>,
        request_timeout: Duration,
        registry: Weak<TaskRegistry>,
    ) -> Self {
        Self {
            correlation: CorrelationTable::new(key.clone()),
            key,
            state: Mutex::new(TaskState::New),
            sink,
            request_timeout,
            registry,
        }
    }

    /// Context identity.
    pub fn key(&self) -> &TxKey {
        &self.key
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TaskState {
        *self.state.lock()
    }

    /// The task's correlation table.
    pub fn correlation(&self) -> &CorrelationTable {
        &self.correlation
    }

    /// Move to Executing and hand the chaincode body to a worker.
    ///
    /// Returns immediately. The worker acquires its pool permit itself, so
    /// the caller never waits on pool saturation.
    pub fn start(
        self: &Arc<Self>,
        initial: ChaincodeMessage,
        chaincode: Arc<dyn Chaincode>,
        workers: Arc<Semaphore>,
    ) -> ShimResult<()> {
        {
            let mut state = self.state.lock();
            if *state != TaskState::New {
                return Err(ShimError::violation(
                    &self.key,
                    format!("start in state {:?}", *state),
                ));
            }
            *state = TaskState::Executing;
        }

        let span = info_span!(
            "invocation",
            txid = %self.key.txid,
            channel = %self.key.channel_id,
            msg_type = %initial.msg_type,
        );
        let task = Arc::clone(self);
        tokio::spawn(task.run(initial, chaincode, workers).instrument(span));
        Ok(())
    }

    async fn run(
        self: Arc<Self>,
        initial: ChaincodeMessage,
        chaincode: Arc<dyn Chaincode>,
        workers: Arc<Semaphore>,
    ) {
        let Ok(_permit) = workers.acquire_owned().await else {
            debug!("Worker pool closed before the task ran");
            self.cancel();
            self.deregister();
            return;
        };
        if self.state() == TaskState::Cancelled {
            debug!("Task cancelled while queued");
            return;
        }

        debug!("Executing chaincode");
        let outcome = AssertUnwindSafe(self.execute(initial, chaincode))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok((response, event))) => {
                self.complete(response, event);
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Invocation failed");
                self.fail(&e);
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(panic = %message, "Chaincode panicked");
                self.fail(&ShimError::CapabilityFault(message));
            }
        }
    }

    async fn execute(
        self: &Arc<Self>,
        initial: ChaincodeMessage,
        chaincode: Arc<dyn Chaincode>,
    ) -> ShimResult<(Response, Option<ChaincodeEvent>)> {
        let input: ChaincodeInput = decode(&initial.payload)?;
        let mut stub = ChaincodeStub::new(Arc::clone(self), input.args);

        let response = if initial.msg_type == MessageType::Init {
            chaincode.init(&mut stub).await
        } else {
            chaincode.invoke(&mut stub).await
        };

        Ok((response, stub.take_event()))
    }

    /// Deliver a RESPONSE or ERROR frame to the suspended worker.
    ///
    /// Returns false when the frame matched nothing and was dropped.
    pub fn handle_inbound(&self, frame: ChaincodeMessage) -> bool {
        let reply = match frame.msg_type {
            MessageType::Response => Ok(frame.payload),
            MessageType::Error => Err(ShimError::PeerError(frame.payload_text())),
            other => {
                warn!(txid = %self.key, msg_type = %other, "Unexpected frame for active task, dropping");
                return false;
            }
        };

        let mut state = self.state.lock();
        if *state != TaskState::AwaitingResponse {
            warn!(
                txid = %self.key,
                msg_type = %frame.msg_type,
                state = ?*state,
                "Reply with no outstanding request, dropping"
            );
            return false;
        }
        // The slot is empty after resolve whether or not the caller was
        // still listening.
        let delivered = self.correlation.resolve(reply);
        *state = TaskState::Executing;
        delivered
    }

    /// Send a state request and suspend until it is answered.
    pub async fn request_state(&self, kind: MessageType, payload: Vec<u8>) -> ShimResult<Vec<u8>> {
        self.request_state_with_timeout(kind, payload, self.request_timeout)
            .await
    }

    /// As [`request_state`](Self::request_state) with an explicit timeout.
    pub async fn request_state_with_timeout(
        &self,
        kind: MessageType,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> ShimResult<Vec<u8>> {
        if !kind.is_state_request() {
            return Err(ShimError::InvalidArgument(format!(
                "{kind} is not a state request"
            )));
        }

        let mut rx = {
            let mut state = self.state.lock();
            match *state {
                TaskState::Executing => {}
                TaskState::Cancelled => {
                    return Err(ShimError::TaskCancelled {
                        key: self.key.to_string(),
                    })
                }
                other => {
                    return Err(ShimError::violation(
                        &self.key,
                        format!("{kind} issued in state {other:?}"),
                    ))
                }
            }
            let rx = self.correlation.register(kind)?;
            *state = TaskState::AwaitingResponse;
            rx
        };

        let mut guard = PendingGuard {
            task: self,
            armed: true,
        };

        self.sink
            .send_frame(ChaincodeMessage::new(kind, &self.key, payload))?;
        debug!(txid = %self.key, request = %kind, "Sent state request");

        let reply = match tokio::time::timeout(timeout, &mut rx).await {
            Ok(reply) => {
                guard.armed = false;
                reply
            }
            Err(_) => {
                guard.armed = false;
                if self.release_pending() {
                    return Err(ShimError::RequestTimeout {
                        key: self.key.to_string(),
                        request: kind,
                        timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    });
                }
                // A reply landed at the deadline.
                rx.await
            }
        };

        reply.unwrap_or_else(|_| {
            Err(ShimError::TaskCancelled {
                key: self.key.to_string(),
            })
        })
    }

    /// Drop the outstanding entry unresolved. Returns whether one was removed.
    fn release_pending(&self) -> bool {
        let mut state = self.state.lock();
        let removed = self.correlation.cancel_pending();
        if *state == TaskState::AwaitingResponse {
            *state = TaskState::Executing;
        }
        removed
    }

    /// Send the terminal frame for a chaincode response.
    ///
    /// Status at or above the error threshold becomes an ERROR frame.
    pub fn complete(&self, response: Response, event: Option<ChaincodeEvent>) -> bool {
        if response.status >= Response::ERROR_THRESHOLD {
            let message = if response.message.is_empty() {
                format!("chaincode returned status {}", response.status)
            } else {
                response.message
            };
            return self.finish(TaskState::Errored, ChaincodeMessage::error(&self.key, message));
        }

        match encode(&response) {
            Ok(payload) => self.finish(
                TaskState::Completed,
                ChaincodeMessage::completed(&self.key, payload, event),
            ),
            Err(e) => self.fail(&e.into()),
        }
    }

    /// Send an ERROR terminal frame.
    pub fn fail(&self, error: &ShimError) -> bool {
        self.finish(
            TaskState::Errored,
            ChaincodeMessage::error(&self.key, error.to_string()),
        )
    }

    fn finish(&self, terminal: TaskState, frame: ChaincodeMessage) -> bool {
        {
            let mut state = self.state.lock();
            if state.is_terminal() {
                debug!(txid = %self.key, state = ?*state, "Task already terminal, ignoring");
                return false;
            }
            *state = terminal;
        }

        // Deregister first so the peer may reuse the key as soon as it sees
        // the terminal frame.
        self.deregister();

        if let Err(e) = self.sink.send_frame(frame) {
            warn!(txid = %self.key, error = %e, "Terminal frame not delivered");
        } else {
            debug!(txid = %self.key, state = ?terminal, "Task finished");
        }
        true
    }

    /// Stream is gone: resume any suspended caller with `TaskCancelled`.
    /// Never sends a frame.
    pub fn cancel(&self) -> bool {
        let mut state = self.state.lock();
        if state.is_terminal() {
            return false;
        }
        *state = TaskState::Cancelled;
        self.correlation.cancel_all();
        debug!(txid = %self.key, "Task cancelled");
        true
    }

    #[cfg(test)]
    pub(crate) fn mark_executing(&self) {
        *self.state.lock() = TaskState::Executing;
    }

    fn deregister(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove_if(&self.key, |_, task| std::ptr::eq(Arc::as_ptr(task), self));
        }
    }
}

/// Releases the outstanding entry when the caller stops waiting early, either
/// by a failed send or by dropping the request future.
struct PendingGuard<'a> {
    task: &'a InvocationTask,
    armed: bool,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed && self.task.release_pending() {
            debug!(txid = %self.task.key, "State request abandoned");
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "chaincode panicked".to_string()
    }
}
