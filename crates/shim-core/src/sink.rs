//! Outbound frame seam.
//!
//! Tasks and the manager only ever push frames; they never read. Keeping the
//! push side behind a trait lets unit tests capture frames without a stream.

use shim_stream::{StreamChannel, TransportError};
use shim_types::ChaincodeMessage;

/// Something that accepts outbound frames without blocking.
pub trait FrameSink: Send + Sync + 'static {
    /// Queue a frame for the peer.
    fn send_frame(&self, frame: ChaincodeMessage) -> Result<(), TransportError>;
}

impl FrameSink for StreamChannel {
    fn send_frame(&self, frame: ChaincodeMessage) -> Result<(), TransportError> {
        self.send(frame)
    }
}
