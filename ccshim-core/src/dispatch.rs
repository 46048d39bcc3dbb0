//! Flat function dispatch.
//!
//! Maps the invocation's function name straight to an async handler.
//! For multi-contract chaincodes with namespaced functions, see
//! [`crate::contract::ContractRouter`].

use crate::chaincode::Chaincode;
use crate::error::ShimError;
use crate::stub::ChaincodeStub;
use async_trait::async_trait;
use ccshim_protocol::TxResponse;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

type InvocationHandler = Box<
    dyn for<'a> Fn(&'a ChaincodeStub, Vec<String>) -> BoxFuture<'a, Result<Vec<u8>, ShimError>>
        + Send
        + Sync,
>;

/// Function name → handler table implementing [`Chaincode`].
///
/// Names are matched case-insensitively: the stub lowercases the
/// invoked function name, and registration lowercases the key.
/// A handler error or an unknown name becomes an error response; a
/// successful handler's payload is wrapped as a success response.
#[derive(Default)]
pub struct InvocationMap {
    handlers: HashMap<String, InvocationHandler>,
}

impl InvocationMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: &str, handler: F)
    where
        F: for<'a> Fn(&'a ChaincodeStub, Vec<String>) -> BoxFuture<'a, Result<Vec<u8>, ShimError>>
            + Send
            + Sync
            + 'static,
    {
        self.handlers.insert(name.to_lowercase(), Box::new(handler));
    }

    async fn dispatch(&self, stub: &ChaincodeStub) -> TxResponse {
        let Some(fp) = stub.get_function_and_parameters() else {
            return TxResponse::error("chaincode invoked without a function name".to_string());
        };

        let Some(handler) = self.handlers.get(&fp.function) else {
            return TxResponse::error(format!(
                "chaincode invoked with unknown method name: {}",
                fp.function
            ));
        };

        tracing::debug!("dispatching invocation to {}", fp.function);
        match handler(stub, fp.parameters).await {
            Ok(payload) => TxResponse::success(payload),
            Err(e) => TxResponse::error(e.to_string()),
        }
    }
}

#[async_trait]
impl Chaincode for InvocationMap {
    async fn init(&self, stub: &ChaincodeStub) -> TxResponse {
        self.dispatch(stub).await
    }

    async fn invoke(&self, stub: &ChaincodeStub) -> TxResponse {
        self.dispatch(stub).await
    }
}
