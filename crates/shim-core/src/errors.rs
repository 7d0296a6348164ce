//! Shim error taxonomy.
//!
//! | Error | Severity | Handling |
//! |-------|----------|----------|
//! | `Transport` | fatal | tears down every active task |
//! | `ProtocolViolation` | recoverable | offending frame rejected |
//! | `RequestTimeout` | recoverable | per call, entry released |
//! | `TaskCancelled` | propagated | shutdown only |
//! | `Registration` | fatal | startup only |
//! | `CapabilityFault` | contained | converted to an ERROR frame |

use crate::config::ConfigError;
use shim_stream::TransportError;
use shim_types::{CodecError, MessageType};

/// Errors surfaced by the shim.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShimError {
    /// The peer stream failed or closed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A frame broke the protocol state machine.
    #[error("protocol violation on {key}: {reason}")]
    ProtocolViolation { key: String, reason: String },

    /// A state request got no reply in time.
    #[error("{request} for {key} timed out after {timeout_ms}ms")]
    RequestTimeout {
        key: String,
        request: MessageType,
        timeout_ms: u64,
    },

    /// The task was cancelled because the stream closed.
    #[error("task {key} cancelled")]
    TaskCancelled { key: String },

    /// Handshake with the peer failed.
    #[error("registration failed: {0}")]
    Registration(String),

    /// The chaincode capability panicked or misbehaved.
    #[error("chaincode fault: {0}")]
    CapabilityFault(String),

    /// Caller passed something unusable.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The peer answered a state request with ERROR.
    #[error("peer error: {0}")]
    PeerError(String),

    /// Payload could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Configuration was rejected.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl ShimError {
    /// Errors that end the shim's connected lifetime.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Registration(_) | Self::Config(_))
    }

    /// Errors handled locally without tearing anything down.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ProtocolViolation { .. } | Self::RequestTimeout { .. } | Self::PeerError(_)
        )
    }

    pub(crate) fn violation(key: impl ToString, reason: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result alias used across the crate.
pub type ShimResult<T> = Result<T, ShimError>;
