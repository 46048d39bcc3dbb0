//! Chaincode shim for connecting smart contracts to a blockchain peer.
//!
//! Implement [`Chaincode`] (or build one from an [`InvocationMap`] or
//! [`ContractRouter`]) and hand it to [`start`] with a [`ShimConfig`]:
//!
//! ```no_run
//! use ccshim::{Chaincode, ChaincodeStub, ShimConfig, TxResponse};
//! use std::sync::Arc;
//!
//! struct MyChaincode;
//!
//! #[ccshim::async_trait]
//! impl Chaincode for MyChaincode {
//!     async fn init(&self, _stub: &ChaincodeStub) -> TxResponse {
//!         TxResponse::success(vec![])
//!     }
//!
//!     async fn invoke(&self, stub: &ChaincodeStub) -> TxResponse {
//!         match stub.get_state("asset1").await {
//!             Ok(value) => TxResponse::success(value),
//!             Err(e) => TxResponse::error(e.to_string()),
//!         }
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ccshim::ShimError> {
//!     let config = ShimConfig::new("peer0.org1:7051", "mycc");
//!     ccshim::start(config, Arc::new(MyChaincode)).await
//! }
//! ```

pub use async_trait::async_trait;

pub use ccshim_core::{
    connect, start, Chaincode, ChaincodeStub, Contract, ContractContext, ContractRouter,
    DecodedProposal, FunctionAndParameters, Handler, HistoryQueryIterator, InvocationMap,
    PeerStream, QueryIterator, QueryResult, QueryResultElement, RouteTable, ShimConfig, ShimError,
    StateQueryIterator, TlsConfig,
};

pub use ccshim_protocol::{
    ChaincodeEvent, ChaincodeId, ChaincodeInput, ChaincodeMessage, KeyModification, Kv,
    MessageType, QueryResponse, SerializedIdentity, SignedProposal, TxResponse, STATUS_ERROR,
    STATUS_OK,
};
