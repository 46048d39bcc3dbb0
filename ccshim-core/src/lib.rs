//! Chaincode shim engine.
//!
//! Connects a chaincode process to its peer over a persistent duplex
//! stream: the [`handler`] drives the registration handshake and the
//! message loop, the [`stub`] gives application code access to ledger
//! state, and the [`dispatch`]/[`contract`] layers route invocations to
//! application functions. Start everything with [`shim::start`].

pub mod chaincode;
pub mod config;
pub mod contract;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod iter;
mod queue;
pub mod shim;
pub mod stream;
pub mod stub;
pub mod tls;
mod writer;

#[cfg(test)]
mod testutil;

pub use chaincode::Chaincode;
pub use config::{ShimConfig, TlsConfig};
pub use contract::{Contract, ContractContext, ContractRouter, RouteTable};
pub use dispatch::{BoxFuture, InvocationMap};
pub use error::ShimError;
pub use handler::Handler;
pub use iter::{
    HistoryQueryIterator, QueryIterator, QueryResult, QueryResultElement, StateQueryIterator,
};
pub use shim::{connect, start};
pub use stream::PeerStream;
pub use stub::{ChaincodeStub, DecodedProposal, FunctionAndParameters};
