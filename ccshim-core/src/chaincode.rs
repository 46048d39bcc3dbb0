//! The application seam: chaincode implementations driven by the shim.

use crate::stub::ChaincodeStub;
use async_trait::async_trait;
use ccshim_protocol::TxResponse;

/// Application code hosted by the shim.
///
/// The handler calls `init` for Init messages and `invoke` for
/// Transaction messages, passing a stub scoped to that invocation.
/// Implementations must end with [`TxResponse::success`] or
/// [`TxResponse::error`]; a response with an unset status is treated
/// as a bug and reported to the peer as an error.
#[async_trait]
pub trait Chaincode: Send + Sync {
    async fn init(&self, stub: &ChaincodeStub) -> TxResponse;

    async fn invoke(&self, stub: &ChaincodeStub) -> TxResponse;
}
