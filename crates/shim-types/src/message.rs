//! # `ChaincodeMessage` Frame
//!
//! The unit of communication on the peer stream. Every frame carries a type,
//! an opaque payload, and the `(channel_id, txid)` pair that names the
//! execution context it belongs to.
//!
//! ## Properties
//!
//! - **Immutability**: Frames are built once through constructors and never
//!   mutated on the dispatch path.
//! - **Context Identity**: `(channel_id, txid)` uniquely identifies one
//!   execution context ([`TxKey`]).
//! - **Single Outstanding Request**: A context has at most one synchronous
//!   state request in flight at any time.

use crate::payloads::ChaincodeEvent;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};
use std::fmt;

// =============================================================================
// MESSAGE TYPES
// =============================================================================

/// Protocol message types exchanged with the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    /// Shim → peer: registration with the chaincode identity.
    Register,
    /// Peer → shim: interim registration acknowledgement.
    Registered,
    /// Peer → shim: handshake complete, transactions may follow.
    Ready,
    /// Peer → shim: instantiate/upgrade invocation.
    Init,
    /// Peer → shim: regular invocation.
    Transaction,
    /// Peer → shim: successful reply to a state request.
    Response,
    /// Both directions: failure reply or failed transaction.
    Error,
    /// Shim → peer: transaction finished successfully.
    Completed,
    /// Shim → peer: read a key.
    GetState,
    /// Shim → peer: write a key.
    PutState,
    /// Shim → peer: delete a key.
    DelState,
    /// Shim → peer: open a range query.
    GetStateByRange,
    /// Shim → peer: fetch the next page of an open query.
    QueryStateNext,
    /// Shim → peer: release an open query.
    QueryStateClose,
    /// Shim → peer: call another chaincode.
    InvokeChaincode,
    /// Both directions: liveness probe and its echo.
    Keepalive,
}

impl MessageType {
    /// Returns true for types that begin a new invocation.
    #[must_use]
    pub fn is_start(self) -> bool {
        matches!(self, Self::Init | Self::Transaction)
    }

    /// Returns true for types that answer an outstanding state request.
    #[must_use]
    pub fn is_reply(self) -> bool {
        matches!(self, Self::Response | Self::Error)
    }

    /// Returns true for shim-originated state requests.
    #[must_use]
    pub fn is_state_request(self) -> bool {
        matches!(
            self,
            Self::GetState
                | Self::PutState
                | Self::DelState
                | Self::GetStateByRange
                | Self::QueryStateNext
                | Self::QueryStateClose
                | Self::InvokeChaincode
        )
    }

    /// Wire-style upper-case name, used in logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Register => "REGISTER",
            Self::Registered => "REGISTERED",
            Self::Ready => "READY",
            Self::Init => "INIT",
            Self::Transaction => "TRANSACTION",
            Self::Response => "RESPONSE",
            Self::Error => "ERROR",
            Self::Completed => "COMPLETED",
            Self::GetState => "GET_STATE",
            Self::PutState => "PUT_STATE",
            Self::DelState => "DEL_STATE",
            Self::GetStateByRange => "GET_STATE_BY_RANGE",
            Self::QueryStateNext => "QUERY_STATE_NEXT",
            Self::QueryStateClose => "QUERY_STATE_CLOSE",
            Self::InvokeChaincode => "INVOKE_CHAINCODE",
            Self::Keepalive => "KEEPALIVE",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// CONTEXT KEY
// =============================================================================

/// Identity of one execution context: `(channel_id, txid)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxKey {
    /// Channel the transaction runs on.
    pub channel_id: String,
    /// Transaction identifier assigned by the peer.
    pub txid: String,
}

impl TxKey {
    /// Create a key from its parts.
    pub fn new(channel_id: impl Into<String>, txid: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            txid: txid.into(),
        }
    }
}

impl fmt::Display for TxKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.channel_id.is_empty() {
            f.write_str(&self.txid)
        } else {
            write!(f, "{}:{}", self.channel_id, self.txid)
        }
    }
}

// =============================================================================
// FRAME
// =============================================================================

/// One discrete protocol message on the stream.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChaincodeMessage {
    /// What this frame means.
    pub msg_type: MessageType,
    /// Type-specific payload, usually an encoded struct from `payloads`.
    #[serde_as(as = "Bytes")]
    pub payload: Vec<u8>,
    /// Transaction identifier. Empty for connection-level frames.
    pub txid: String,
    /// Channel identifier. Empty for connection-level frames.
    pub channel_id: String,
    /// Chaincode event attached to a COMPLETED frame.
    pub event: Option<ChaincodeEvent>,
}

impl ChaincodeMessage {
    /// Create a frame addressed to a context.
    pub fn new(msg_type: MessageType, key: &TxKey, payload: Vec<u8>) -> Self {
        Self {
            msg_type,
            payload,
            txid: key.txid.clone(),
            channel_id: key.channel_id.clone(),
            event: None,
        }
    }

    /// Create a connection-level frame (no transaction context).
    pub fn connection(msg_type: MessageType, payload: Vec<u8>) -> Self {
        Self {
            msg_type,
            payload,
            txid: String::new(),
            channel_id: String::new(),
            event: None,
        }
    }

    /// COMPLETED frame carrying an encoded `Response` and optional event.
    pub fn completed(key: &TxKey, payload: Vec<u8>, event: Option<ChaincodeEvent>) -> Self {
        let mut msg = Self::new(MessageType::Completed, key, payload);
        msg.event = event;
        msg
    }

    /// ERROR frame whose payload is a UTF-8 message.
    pub fn error(key: &TxKey, message: impl AsRef<str>) -> Self {
        Self::new(MessageType::Error, key, message.as_ref().as_bytes().to_vec())
    }

    /// KEEPALIVE frame echoing the probe's payload.
    pub fn keepalive(payload: Vec<u8>) -> Self {
        Self::connection(MessageType::Keepalive, payload)
    }

    /// The execution context this frame belongs to.
    #[must_use]
    pub fn key(&self) -> TxKey {
        TxKey::new(self.channel_id.clone(), self.txid.clone())
    }

    /// Payload interpreted as UTF-8, lossy. Used for ERROR messages.
    #[must_use]
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

impl fmt::Display for ChaincodeMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{}] ({} bytes)",
            self.msg_type,
            self.key(),
            self.payload.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_types() {
        assert!(MessageType::Init.is_start());
        assert!(MessageType::Transaction.is_start());
        assert!(!MessageType::Response.is_start());
        assert!(!MessageType::Keepalive.is_start());
    }

    #[test]
    fn test_reply_types() {
        assert!(MessageType::Response.is_reply());
        assert!(MessageType::Error.is_reply());
        assert!(!MessageType::Completed.is_reply());
    }

    #[test]
    fn test_state_request_types() {
        assert!(MessageType::GetState.is_state_request());
        assert!(MessageType::InvokeChaincode.is_state_request());
        assert!(MessageType::QueryStateClose.is_state_request());
        assert!(!MessageType::Transaction.is_state_request());
        assert!(!MessageType::Register.is_state_request());
    }

    #[test]
    fn test_key_display() {
        assert_eq!(TxKey::new("ch1", "t1").to_string(), "ch1:t1");
        assert_eq!(TxKey::new("", "t1").to_string(), "t1");
    }

    #[test]
    fn test_error_frame_payload_is_text() {
        let key = TxKey::new("ch1", "t1");
        let msg = ChaincodeMessage::error(&key, "boom");
        assert_eq!(msg.msg_type, MessageType::Error);
        assert_eq!(msg.payload_text(), "boom");
        assert_eq!(msg.key(), key);
    }

    #[test]
    fn test_completed_carries_event() {
        let key = TxKey::new("ch1", "t1");
        let event = ChaincodeEvent {
            event_name: "transfer".into(),
            payload: b"x".to_vec(),
        };
        let msg = ChaincodeMessage::completed(&key, Vec::new(), Some(event.clone()));
        assert_eq!(msg.event, Some(event));
    }

    #[test]
    fn test_connection_frame_has_no_context() {
        let msg = ChaincodeMessage::connection(MessageType::Register, vec![1]);
        assert!(msg.txid.is_empty());
        assert!(msg.channel_id.is_empty());
    }
}
