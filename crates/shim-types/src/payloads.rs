//! # Frame Payloads
//!
//! Typed bodies carried inside [`ChaincodeMessage::payload`](crate::ChaincodeMessage).
//!
//! ## Design Rules
//!
//! - Payloads never repeat `txid`/`channel_id`; the frame header is the
//!   only source of context identity.
//! - All payloads are encoded with `bincode` through [`encode`] / [`decode`].

use crate::errors::CodecError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};

// =============================================================================
// CODEC
// =============================================================================

/// Encode a payload struct into frame bytes.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    bincode::serialize(value).map_err(|e| CodecError::Encode(e.to_string()))
}

/// Decode frame bytes into a payload struct.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    bincode::deserialize(bytes).map_err(|e| CodecError::Decode(e.to_string()))
}

// =============================================================================
// HANDSHAKE
// =============================================================================

/// Chaincode identity sent with REGISTER.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChaincodeId {
    /// Chaincode name, e.g. `mycc`.
    pub name: String,
    /// Optional version tag.
    pub version: Option<String>,
}

impl ChaincodeId {
    /// Identity without a version.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
        }
    }
}

// =============================================================================
// INVOCATION
// =============================================================================

/// Arguments carried by INIT / TRANSACTION.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChaincodeInput {
    /// Raw arguments; by convention the first is the function name.
    pub args: Vec<Vec<u8>>,
}

impl ChaincodeInput {
    /// Build from string arguments.
    pub fn from_strs<S: AsRef<str>>(args: &[S]) -> Self {
        Self {
            args: args.iter().map(|a| a.as_ref().as_bytes().to_vec()).collect(),
        }
    }
}

/// Result returned by the chaincode capability.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// HTTP-like status code.
    pub status: i32,
    /// Human readable message, set on failure.
    pub message: String,
    /// Result bytes.
    #[serde_as(as = "Bytes")]
    pub payload: Vec<u8>,
}

impl Response {
    /// Success.
    pub const OK: i32 = 200;
    /// Statuses at or above this value are failures.
    pub const ERROR_THRESHOLD: i32 = 400;
    /// Generic failure.
    pub const ERROR: i32 = 500;

    /// Successful response with a payload.
    pub fn success(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            status: Self::OK,
            message: String::new(),
            payload: payload.into(),
        }
    }

    /// Failed response with a message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Self::ERROR,
            message: message.into(),
            payload: Vec::new(),
        }
    }

    /// Returns true if the status is below the error threshold.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status < Self::ERROR_THRESHOLD
    }
}

/// Event emitted by a transaction, attached to COMPLETED.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChaincodeEvent {
    /// Event name.
    pub event_name: String,
    /// Event body.
    #[serde_as(as = "Bytes")]
    pub payload: Vec<u8>,
}

// =============================================================================
// STATE REQUESTS (shim → peer)
// =============================================================================

/// GET_STATE body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetState {
    pub key: String,
    /// Private data collection; empty for public state.
    pub collection: String,
}

/// PUT_STATE body.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutState {
    pub key: String,
    #[serde_as(as = "Bytes")]
    pub value: Vec<u8>,
    pub collection: String,
}

/// DEL_STATE body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelState {
    pub key: String,
    pub collection: String,
}

/// GET_STATE_BY_RANGE body. `end_key` is exclusive; empty means unbounded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetStateByRange {
    pub start_key: String,
    pub end_key: String,
    pub collection: String,
}

/// QUERY_STATE_NEXT body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryStateNext {
    /// Query handle returned in the previous `QueryResponse`.
    pub id: String,
}

/// QUERY_STATE_CLOSE body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryStateClose {
    pub id: String,
}

/// INVOKE_CHAINCODE body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvokeChaincodeSpec {
    /// Target chaincode, optionally `name/channel`.
    pub chaincode_name: String,
    pub input: ChaincodeInput,
}

// =============================================================================
// QUERY RESULTS (peer → shim)
// =============================================================================

/// One ledger entry.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    #[serde_as(as = "Bytes")]
    pub value: Vec<u8>,
}

/// A page of range results carried in RESPONSE.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub results: Vec<KeyValue>,
    /// More pages can be fetched with QUERY_STATE_NEXT.
    pub has_more: bool,
    /// Query handle.
    pub id: String,
}
