//! # Shim Types Crate
//!
//! The frame, message types, and typed payloads spoken between the chaincode
//! shim and its peer.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: Every crate in the workspace uses these types
//!   for the wire contract.
//! - **Header Authority**: `(channel_id, txid)` on the frame is the only
//!   source of context identity; payloads never repeat it.

pub mod errors;
pub mod message;
pub mod payloads;

pub use errors::*;
pub use message::{ChaincodeMessage, MessageType, TxKey};
pub use payloads::*;
