//! The chaincode capability.

use crate::stub::ChaincodeStub;
use async_trait::async_trait;
use shim_types::Response;

/// User logic executed for INIT and TRANSACTION frames.
///
/// Both methods run on a pool worker and may suspend on state access through
/// the stub. A response with status at or above
/// [`Response::ERROR_THRESHOLD`] is reported to the peer as a failed
/// transaction. Panics are contained and reported the same way.
#[async_trait]
pub trait Chaincode: Send + Sync + 'static {
    /// Called for INIT frames.
    async fn init(&self, stub: &mut ChaincodeStub) -> Response;

    /// Called for TRANSACTION frames.
    async fn invoke(&self, stub: &mut ChaincodeStub) -> Response;
}

/// Chaincode that accepts everything and does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyChaincode;

#[async_trait]
impl Chaincode for EmptyChaincode {
    async fn init(&self, _stub: &mut ChaincodeStub) -> Response {
        Response::success(Vec::new())
    }

    async fn invoke(&self, _stub: &mut ChaincodeStub) -> Response {
        Response::success(Vec::new())
    }
}
