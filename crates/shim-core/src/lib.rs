// Allow missing docs for internal items in development
#![allow(missing_docs)]

//! Shim Core - runs chaincode invocations on behalf of a peer.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                          SHIM CORE                            │
//! ├───────────────────────────────────────────────────────────────┤
//! │  ChaincodeSupportClient   REGISTER ─► READY, then subscribe   │
//! │              │                                                │
//! │  ┌───────────┴──────────────────────────────┐                 │
//! │  │         InvocationTaskManager             │  sole consumer  │
//! │  │   DashMap<TxKey, Arc<InvocationTask>>     │                 │
//! │  └───────────┬──────────────────────────────┘                 │
//! │              │ start / handle_inbound                         │
//! │  ┌───────────┴───────────┐    ┌────────────────────┐          │
//! │  │    InvocationTask     │───►│  CorrelationTable  │          │
//! │  │ (worker + Chaincode)  │    │ (oneshot bridge)   │          │
//! │  └───────────────────────┘    └────────────────────┘          │
//! └──────────────────────────────┬────────────────────────────────┘
//!                                │
//!                          StreamChannel
//!                                │
//!                               peer
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use shim_core::{ChaincodeSupportClient, InvocationTaskManager, ShimConfig};
//!
//! let config = ShimConfig::from_env()?;
//! let manager = Arc::new(InvocationTaskManager::new(Arc::new(MyChaincode), &config));
//! let client = ChaincodeSupportClient::connect(config).await?;
//! client.start(Some(manager)).await?;
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod chaincode;
pub mod client;
pub mod config;
pub mod correlation;
pub mod errors;
pub mod manager;
pub mod sink;
pub mod stub;
pub mod task;

pub use chaincode::{Chaincode, EmptyChaincode};
pub use client::ChaincodeSupportClient;
pub use config::{ConfigError, ShimConfig};
pub use correlation::{CorrelationStats, CorrelationTable, Reply};
pub use errors::{ShimError, ShimResult};
pub use manager::{Dispatch, InvocationTaskManager, ManagerStats};
pub use sink::FrameSink;
pub use stub::{ChaincodeStub, StateRangeIterator};
pub use task::{InvocationTask, TaskState};

pub use shim_types::{ChaincodeEvent, KeyValue, Response};
