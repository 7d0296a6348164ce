//! # Transport Errors

use shim_types::CodecError;
use thiserror::Error;

/// Failures on the physical stream. All of them are fatal to the channel.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The stream is closed, locally or by the remote side.
    #[error("Stream closed")]
    Closed,

    /// `subscribe` was called a second time.
    #[error("Stream already has a consumer")]
    AlreadySubscribed,

    /// Underlying I/O failed.
    #[error("I/O error: {0}")]
    Io(String),

    /// A length prefix exceeded the configured limit.
    #[error("Frame too large: {size} > {max} bytes")]
    FrameTooLarge { size: usize, max: usize },

    /// Frame bytes could not be (de)serialized.
    #[error("Frame codec error: {0}")]
    Codec(#[from] CodecError),
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset => TransportError::Closed,
            _ => TransportError::Io(e.to_string()),
        }
    }
}
