//! # Shim Stream - The Peer Stream Channel
//!
//! Owns the single long-lived duplex connection between the chaincode shim
//! and its peer.
//!
//! ## Layers
//!
//! ```text
//! ┌──────────────────────────────┐
//! │        StreamChannel         │  ordered single-consumer delivery,
//! │  send() / subscribe() / ...  │  serialised writes, close-once
//! └──────────────┬───────────────┘
//!                │ Transport
//!     ┌──────────┴───────────┐
//!     ▼                      ▼
//! MemoryTransport      FramedTransport
//!  (in-process)      (TCP / any byte stream)
//! ```
//!
//! ## Rules
//!
//! - Exactly one frame consumer per channel.
//! - A closed channel never reopens; reconnection belongs to bootstrap.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod channel;
pub mod errors;
pub mod framed;
pub mod transport;

pub use channel::{ChannelStats, FrameConsumer, StreamChannel};
pub use errors::TransportError;
pub use framed::FramedTransport;
pub use transport::{MemoryTransport, Transport};

/// Largest frame accepted by `FramedTransport` unless configured otherwise.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 100 * 1024 * 1024;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_frame_limit() {
        assert_eq!(DEFAULT_MAX_FRAME_SIZE, 104_857_600);
    }
}
