//! # Error Types
//!
//! Errors shared by every crate that touches frame payloads.

use thiserror::Error;

/// Payload encoding / decoding failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Serialization failed.
    #[error("Encode failed: {0}")]
    Encode(String),

    /// Bytes did not decode into the expected payload.
    #[error("Decode failed: {0}")]
    Decode(String),
}
