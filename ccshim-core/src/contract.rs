//! Namespaced multi-contract dispatch.
//!
//! Functions are invoked as `"{namespace}_{function}"`. Each contract
//! registers its functions in an explicit route table built once at
//! startup; dispatch splits the invoked name on the first underscore,
//! finds the contract by namespace and the route by function name,
//! checks the parameter count, and runs the call wrapped by the
//! contract's before/after hooks.

use crate::chaincode::Chaincode;
use crate::dispatch::BoxFuture;
use crate::error::ShimError;
use crate::stub::ChaincodeStub;
use async_trait::async_trait;
use ccshim_protocol::TxResponse;
use std::collections::HashMap;
use std::sync::Arc;

/// Per-invocation view handed to contract functions and hooks.
pub struct ContractContext<'a> {
    stub: &'a ChaincodeStub,
}

impl<'a> ContractContext<'a> {
    fn new(stub: &'a ChaincodeStub) -> Self {
        Self { stub }
    }

    pub fn stub(&self) -> &ChaincodeStub {
        self.stub
    }
}

/// A contract: a namespace plus optional hooks around every call.
#[async_trait]
pub trait Contract: Send + Sync {
    /// Namespace this contract's functions are invoked under. An
    /// empty or whitespace name falls back to `"contract"`.
    fn namespace(&self) -> &str;

    /// Runs before the routed function; an error aborts the call.
    async fn before_invocation(&self, _context: &ContractContext<'_>) -> Result<(), ShimError> {
        Ok(())
    }

    /// Runs after the routed function returned successfully; an error
    /// turns the call into an error response.
    async fn after_invocation(
        &self,
        _context: &ContractContext<'_>,
        _result: &[u8],
    ) -> Result<(), ShimError> {
        Ok(())
    }

    /// Called when an unknown function is invoked in this namespace.
    /// Whatever this returns, the dispatch still answers with an error
    /// naming the missing function.
    async fn unknown_function_called(
        &self,
        _context: &ContractContext<'_>,
        function: &str,
    ) -> Result<(), ShimError> {
        Err(ShimError::Contract(format!(
            "invocation of {} failed: function does not exist",
            function
        )))
    }
}

type RouteHandler = Box<
    dyn for<'a> Fn(
            &'a ContractContext<'a>,
            &'a [String],
        ) -> BoxFuture<'a, Result<Vec<u8>, ShimError>>
        + Send
        + Sync,
>;

struct Route {
    arity: usize,
    handler: RouteHandler,
}

/// The functions one contract exposes, keyed by lowercased name, with
/// the parameter count fixed at registration.
#[derive(Default)]
pub struct RouteTable {
    routes: HashMap<String, Route>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route<F>(mut self, name: &str, arity: usize, handler: F) -> Self
    where
        F: for<'a> Fn(
                &'a ContractContext<'a>,
                &'a [String],
            ) -> BoxFuture<'a, Result<Vec<u8>, ShimError>>
            + Send
            + Sync
            + 'static,
    {
        self.routes.insert(
            name.to_lowercase(),
            Route {
                arity,
                handler: Box::new(handler),
            },
        );
        self
    }
}

struct RegisteredContract {
    contract: Arc<dyn Contract>,
    routes: HashMap<String, Route>,
}

/// Namespace → contract registry implementing [`Chaincode`].
#[derive(Default)]
pub struct ContractRouter {
    contracts: HashMap<String, RegisteredContract>,
}

impl ContractRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a contract with its route table. Fails if the table is
    /// empty or the namespace is already taken.
    pub fn register(
        &mut self,
        contract: Arc<dyn Contract>,
        routes: RouteTable,
    ) -> Result<(), ShimError> {
        let namespace = normalize_namespace(contract.namespace());

        if routes.routes.is_empty() {
            return Err(ShimError::Contract(format!(
                "contract {} does not register any function",
                namespace
            )));
        }
        if self.contracts.contains_key(&namespace) {
            return Err(ShimError::Contract(format!(
                "namespace {} is already registered",
                namespace
            )));
        }

        tracing::info!(
            "registered contract namespace {} with {} functions",
            namespace,
            routes.routes.len()
        );
        self.contracts.insert(
            namespace,
            RegisteredContract {
                contract,
                routes: routes.routes,
            },
        );
        Ok(())
    }

    async fn dispatch(&self, stub: &ChaincodeStub) -> TxResponse {
        let Some(fp) = stub.get_function_and_parameters() else {
            return TxResponse::error("chaincode invoked without a function name".to_string());
        };

        let Some((namespace, function)) = fp.function.split_once('_') else {
            return TxResponse::error(format!(
                "function {} carries no namespace",
                fp.function
            ));
        };

        let Some(registered) = self.contracts.get(namespace) else {
            return TxResponse::error(format!("namespace {} is not known", namespace));
        };

        let context = ContractContext::new(stub);

        let Some(route) = registered.routes.get(function) else {
            if let Err(e) = registered
                .contract
                .unknown_function_called(&context, function)
                .await
            {
                tracing::debug!("unknown function hook raised: {}", e);
            }
            return TxResponse::error(format!(
                "unknown function {} called in namespace {}",
                function, namespace
            ));
        };

        if fp.parameters.len() != route.arity {
            return TxResponse::error(format!(
                "expected {} parameters, but got {}",
                route.arity,
                fp.parameters.len()
            ));
        }

        if let Err(e) = registered.contract.before_invocation(&context).await {
            return TxResponse::error(e.to_string());
        }

        tracing::debug!("invoking {} in namespace {}", function, namespace);
        let result = match (route.handler)(&context, &fp.parameters).await {
            Ok(result) => result,
            Err(e) => return TxResponse::error(e.to_string()),
        };

        if let Err(e) = registered.contract.after_invocation(&context, &result).await {
            return TxResponse::error(e.to_string());
        }

        TxResponse::success(result)
    }
}

#[async_trait]
impl Chaincode for ContractRouter {
    async fn init(&self, stub: &ChaincodeStub) -> TxResponse {
        self.dispatch(stub).await
    }

    async fn invoke(&self, stub: &ChaincodeStub) -> TxResponse {
        self.dispatch(stub).await
    }
}

fn normalize_namespace(namespace: &str) -> String {
    let trimmed = namespace.trim();
    if trimmed.is_empty() {
        "contract".to_string()
    } else {
        trimmed.to_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{idle_handler, stub_with_args};
    use ccshim_protocol::STATUS_ERROR;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct AssetContract {
        hook_calls: AtomicUsize,
    }

    #[async_trait]
    impl Contract for AssetContract {
        fn namespace(&self) -> &str {
            "Assets"
        }

        async fn before_invocation(
            &self,
            _context: &ContractContext<'_>,
        ) -> Result<(), ShimError> {
            self.hook_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn after_invocation(
            &self,
            _context: &ContractContext<'_>,
            _result: &[u8],
        ) -> Result<(), ShimError> {
            self.hook_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct AnonymousContract;

    #[async_trait]
    impl Contract for AnonymousContract {
        fn namespace(&self) -> &str {
            "   "
        }
    }

    fn asset_routes() -> RouteTable {
        RouteTable::new().route("Transfer", 2, |_context, params| {
            Box::pin(async move {
                Ok(format!("{}->{}", params[0], params[1]).into_bytes())
            })
        })
    }

    fn sample_router() -> (Arc<AssetContract>, ContractRouter) {
        let contract = Arc::new(AssetContract::default());
        let mut router = ContractRouter::new();
        router.register(contract.clone(), asset_routes()).unwrap();
        (contract, router)
    }

    #[tokio::test]
    async fn test_routed_call_runs_hooks_and_handler() {
        let handler = idle_handler();
        let stub = stub_with_args(&handler, &["Assets_Transfer", "alice", "bob"]);

        let (contract, router) = sample_router();
        let response = router.invoke(&stub).await;
        assert!(response.is_ok());
        assert_eq!(response.payload, b"alice->bob");
        assert_eq!(contract.hook_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unknown_namespace_named_in_error() {
        let handler = idle_handler();
        let stub = stub_with_args(&handler, &["Ghost_Transfer", "a", "b"]);

        let (_contract, router) = sample_router();
        let response = router.invoke(&stub).await;
        assert_eq!(response.status, STATUS_ERROR);
        assert!(response.message.contains("namespace ghost is not known"));
    }

    #[tokio::test]
    async fn test_unknown_function_named_in_error() {
        let handler = idle_handler();
        let stub = stub_with_args(&handler, &["Assets_Vanish"]);

        let (_contract, router) = sample_router();
        let response = router.invoke(&stub).await;
        assert_eq!(response.status, STATUS_ERROR);
        assert!(response
            .message
            .contains("unknown function vanish called in namespace assets"));
    }

    #[tokio::test]
    async fn test_arity_mismatch_names_both_counts() {
        let handler = idle_handler();
        let stub = stub_with_args(&handler, &["Assets_Transfer", "only-one"]);

        let (_contract, router) = sample_router();
        let response = router.invoke(&stub).await;
        assert_eq!(response.status, STATUS_ERROR);
        assert!(response.message.contains("expected 2 parameters, but got 1"));
    }

    #[tokio::test]
    async fn test_name_without_underscore_is_error() {
        let handler = idle_handler();
        let stub = stub_with_args(&handler, &["plainfunction"]);

        let (_contract, router) = sample_router();
        let response = router.invoke(&stub).await;
        assert_eq!(response.status, STATUS_ERROR);
        assert!(response.message.contains("carries no namespace"));
    }

    #[tokio::test]
    async fn test_blank_namespace_falls_back_to_contract() {
        let handler = idle_handler();
        let stub = stub_with_args(&handler, &["contract_Ping"]);

        let mut router = ContractRouter::new();
        router
            .register(
                Arc::new(AnonymousContract),
                RouteTable::new().route("Ping", 0, |_context, _params| {
                    Box::pin(async move { Ok(b"pong".to_vec()) })
                }),
            )
            .unwrap();

        let response = router.invoke(&stub).await;
        assert!(response.is_ok());
        assert_eq!(response.payload, b"pong");
    }

    #[test]
    fn test_register_rejects_empty_table_and_duplicates() {
        let mut router = ContractRouter::new();
        let err = router
            .register(Arc::new(AssetContract::default()), RouteTable::new())
            .unwrap_err();
        assert!(err.to_string().contains("does not register any function"));

        router
            .register(Arc::new(AssetContract::default()), asset_routes())
            .unwrap();
        let err = router
            .register(Arc::new(AssetContract::default()), asset_routes())
            .unwrap_err();
        assert!(err.to_string().contains("already registered"));
    }
}
