//! Ethereum-surface method handlers and their registration table.
//!
//! Handlers stay thin: validation happened in the dispatcher, so they
//! unpack arguments, enforce payload limits, and delegate to the backend.
//! `eth_sendRawTransaction` is the one mutating path and routes through
//! the sender serializer.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{error, warn};

use mirrorgate_common::context::RequestContext;
use mirrorgate_common::error::RpcError;
use mirrorgate_common::utils::{decode_hex, to_hex_quantity};

use crate::backend::{BackendError, MirrorBackend};
use crate::dispatch::{ParamLayout, ParamSpec, RpcDispatcher, RpcHandler};
use crate::serialize::{SenderSerializer, SerializeError};

/// Upper bound on distinct addresses accepted in an eth_getLogs filter.
const MAX_FILTER_ADDRESSES: usize = 10;

#[derive(Clone, Debug)]
pub struct EthServiceConfig {
    /// Byte cap on eth_call input data.
    pub call_data_size_limit: usize,
    /// Byte cap on raw transactions.
    pub send_raw_transaction_size_limit: usize,
}

impl Default for EthServiceConfig {
    fn default() -> Self {
        Self {
            call_data_size_limit: 131_072,
            send_raw_transaction_size_limit: 133_120,
        }
    }
}

pub struct EthService {
    backend: Arc<dyn MirrorBackend>,
    serializer: Arc<SenderSerializer>,
    config: EthServiceConfig,
}

fn backend_error(request_id: &str, err: BackendError) -> RpcError {
    match err {
        BackendError::NotFound(what) => {
            RpcError::invalid_params(format!("{what} not found"))
        }
        BackendError::Unavailable(reason) => {
            error!(request_id, reason = %reason, "backend fault");
            RpcError::internal_error("Backend unavailable")
        }
    }
}

fn arg<'a>(params: &'a [Value], index: usize) -> Option<&'a Value> {
    params.get(index).filter(|v| !v.is_null())
}

fn str_arg(params: &[Value], index: usize) -> Result<String, RpcError> {
    arg(params, index)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| RpcError::missing_required_parameter(&index.to_string()))
}

fn block_arg(params: &[Value], index: usize) -> Value {
    arg(params, index).cloned().unwrap_or(json!("latest"))
}

impl EthService {
    pub fn new(
        backend: Arc<dyn MirrorBackend>,
        serializer: Arc<SenderSerializer>,
        config: EthServiceConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            backend,
            serializer,
            config,
        })
    }

    /// Attach every exposed method to the dispatcher, together with its
    /// parameter schema and argument layout.
    pub fn register(self: &Arc<Self>, dispatcher: &mut RpcDispatcher) {
        self.method(dispatcher, "eth_chainId", vec![], ParamLayout::RequestDetailsOnly, Self::chain_id);
        self.method(dispatcher, "eth_blockNumber", vec![], ParamLayout::RequestDetailsOnly, Self::block_number);
        self.method(dispatcher, "eth_gasPrice", vec![], ParamLayout::RequestDetailsOnly, Self::gas_price);
        self.method(dispatcher, "net_version", vec![], ParamLayout::RequestDetailsOnly, Self::net_version);
        self.method(dispatcher, "web3_clientVersion", vec![], ParamLayout::RequestDetailsOnly, Self::client_version);
        self.method(
            dispatcher,
            "eth_getBalance",
            vec![ParamSpec::required("address"), ParamSpec::optional("blockParams")],
            ParamLayout::Default,
            Self::get_balance,
        );
        self.method(
            dispatcher,
            "eth_getTransactionCount",
            vec![ParamSpec::required("address"), ParamSpec::optional("blockParams")],
            ParamLayout::Default,
            Self::get_transaction_count,
        );
        self.method(
            dispatcher,
            "eth_getTransactionByHash",
            vec![ParamSpec::required("transactionHash")],
            ParamLayout::Default,
            Self::get_transaction_by_hash,
        );
        self.method(
            dispatcher,
            "eth_getLogs",
            vec![ParamSpec::required("filterObject")],
            ParamLayout::Default,
            Self::get_logs,
        );
        self.method(
            dispatcher,
            "eth_call",
            vec![ParamSpec::required("transactionObject"), ParamSpec::optional("blockParams")],
            ParamLayout::Default,
            Self::call,
        );
        self.method(
            dispatcher,
            "eth_sendRawTransaction",
            vec![ParamSpec::required("hexEvenLength")],
            ParamLayout::Default,
            Self::send_raw_transaction,
        );
        // The wrapper object is split into (tracer, tracerConfig) so the
        // handler does not re-parse it.
        self.method(
            dispatcher,
            "debug_traceTransaction",
            vec![
                ParamSpec::required("transactionHash|transactionId"),
                ParamSpec::optional("tracerConfigWrapper"),
            ],
            ParamLayout::Custom(split_tracer_wrapper),
            Self::trace_transaction,
        );
    }

    fn method(
        self: &Arc<Self>,
        dispatcher: &mut RpcDispatcher,
        name: &str,
        params: Vec<ParamSpec>,
        layout: ParamLayout,
        call: for<'a> fn(
            &'a Self,
            Vec<Value>,
            RequestContext,
        )
            -> std::pin::Pin<Box<dyn Future<Output = Result<Value, RpcError>> + Send + 'a>>,
    ) {
        let service = self.clone();
        let handler: RpcHandler = Arc::new(move |params, ctx| {
            let service = service.clone();
            Box::pin(async move { call(&service, params, ctx).await })
        });
        dispatcher.register(name, params, layout, handler);
    }

    fn chain_id(
        &self,
        _params: Vec<Value>,
        ctx: RequestContext,
    ) -> std::pin::Pin<Box<dyn Future<Output = Result<Value, RpcError>> + Send + '_>> {
        Box::pin(async move {
            let id = self
                .backend
                .chain_id()
                .await
                .map_err(|e| backend_error(&ctx.request_id, e))?;
            Ok(json!(to_hex_quantity(id)))
        })
    }

    fn block_number(
        &self,
        _params: Vec<Value>,
        ctx: RequestContext,
    ) -> std::pin::Pin<Box<dyn Future<Output = Result<Value, RpcError>> + Send + '_>> {
        Box::pin(async move {
            let number = self
                .backend
                .block_number()
                .await
                .map_err(|e| backend_error(&ctx.request_id, e))?;
            Ok(json!(to_hex_quantity(number)))
        })
    }

    fn gas_price(
        &self,
        _params: Vec<Value>,
        ctx: RequestContext,
    ) -> std::pin::Pin<Box<dyn Future<Output = Result<Value, RpcError>> + Send + '_>> {
        Box::pin(async move {
            let price = self
                .backend
                .gas_price()
                .await
                .map_err(|e| backend_error(&ctx.request_id, e))?;
            Ok(json!(to_hex_quantity(price)))
        })
    }

    fn net_version(
        &self,
        _params: Vec<Value>,
        ctx: RequestContext,
    ) -> std::pin::Pin<Box<dyn Future<Output = Result<Value, RpcError>> + Send + '_>> {
        Box::pin(async move {
            let id = self
                .backend
                .chain_id()
                .await
                .map_err(|e| backend_error(&ctx.request_id, e))?;
            Ok(json!(id.to_string()))
        })
    }

    fn client_version(
        &self,
        _params: Vec<Value>,
        _ctx: RequestContext,
    ) -> std::pin::Pin<Box<dyn Future<Output = Result<Value, RpcError>> + Send + '_>> {
        Box::pin(async move {
            Ok(json!(format!("mirrorgate/{}", env!("CARGO_PKG_VERSION"))))
        })
    }

    fn get_balance(
        &self,
        params: Vec<Value>,
        ctx: RequestContext,
    ) -> std::pin::Pin<Box<dyn Future<Output = Result<Value, RpcError>> + Send + '_>> {
        Box::pin(async move {
            let address = str_arg(&params, 0)?;
            let block = block_arg(&params, 1);
            let balance = self
                .backend
                .balance(&address, &block)
                .await
                .map_err(|e| backend_error(&ctx.request_id, e))?;
            Ok(json!(balance))
        })
    }

    fn get_transaction_count(
        &self,
        params: Vec<Value>,
        ctx: RequestContext,
    ) -> std::pin::Pin<Box<dyn Future<Output = Result<Value, RpcError>> + Send + '_>> {
        Box::pin(async move {
            let address = str_arg(&params, 0)?;
            let block = block_arg(&params, 1);
            let count = self
                .backend
                .transaction_count(&address, &block)
                .await
                .map_err(|e| backend_error(&ctx.request_id, e))?;
            Ok(json!(count))
        })
    }

    fn get_transaction_by_hash(
        &self,
        params: Vec<Value>,
        ctx: RequestContext,
    ) -> std::pin::Pin<Box<dyn Future<Output = Result<Value, RpcError>> + Send + '_>> {
        Box::pin(async move {
            let hash = str_arg(&params, 0)?;
            let transaction = self
                .backend
                .transaction_by_hash(&hash)
                .await
                .map_err(|e| backend_error(&ctx.request_id, e))?;
            Ok(transaction.unwrap_or(Value::Null))
        })
    }

    fn get_logs(
        &self,
        params: Vec<Value>,
        ctx: RequestContext,
    ) -> std::pin::Pin<Box<dyn Future<Output = Result<Value, RpcError>> + Send + '_>> {
        Box::pin(async move {
            let filter = arg(&params, 0)
                .cloned()
                .ok_or_else(|| RpcError::missing_required_parameter("0"))?;

            if let Some(addresses) = filter.get("address").and_then(Value::as_array) {
                if addresses.len() > MAX_FILTER_ADDRESSES {
                    return Err(RpcError::limit_exceeded(format!(
                        "Too many addresses in filter: {} (max {MAX_FILTER_ADDRESSES})",
                        addresses.len()
                    )));
                }
            }

            let logs = self
                .backend
                .logs(&filter)
                .await
                .map_err(|e| backend_error(&ctx.request_id, e))?;
            Ok(Value::Array(logs))
        })
    }

    fn call(
        &self,
        params: Vec<Value>,
        ctx: RequestContext,
    ) -> std::pin::Pin<Box<dyn Future<Output = Result<Value, RpcError>> + Send + '_>> {
        Box::pin(async move {
            let transaction = arg(&params, 0)
                .cloned()
                .ok_or_else(|| RpcError::missing_required_parameter("0"))?;
            let block = block_arg(&params, 1);

            let data = transaction
                .get("data")
                .or_else(|| transaction.get("input"))
                .and_then(Value::as_str)
                .unwrap_or("0x");
            let data_bytes = data.len().saturating_sub(2) / 2;
            if data_bytes > self.config.call_data_size_limit {
                return Err(RpcError::invalid_params(format!(
                    "Call data size {data_bytes} exceeds limit of {} bytes",
                    self.config.call_data_size_limit
                )));
            }

            let output = self
                .backend
                .call(&transaction, &block)
                .await
                .map_err(|e| backend_error(&ctx.request_id, e))?;
            Ok(json!(output))
        })
    }

    fn send_raw_transaction(
        &self,
        params: Vec<Value>,
        ctx: RequestContext,
    ) -> std::pin::Pin<Box<dyn Future<Output = Result<Value, RpcError>> + Send + '_>> {
        Box::pin(async move {
            let raw_hex = str_arg(&params, 0)?;
            let raw = decode_hex(&raw_hex).ok_or_else(|| {
                RpcError::invalid_parameter("0", "Expected 0x prefixed hex bytes", &params[0])
            })?;

            if raw.len() > self.config.send_raw_transaction_size_limit {
                return Err(RpcError::invalid_params(format!(
                    "Transaction size {} exceeds limit of {} bytes",
                    raw.len(),
                    self.config.send_raw_transaction_size_limit
                )));
            }

            let backend = self.backend.clone();
            let submission = {
                let raw = raw.clone();
                move || async move { backend.submit_transaction(&raw).await }
            };

            match self
                .serializer
                .run_exclusive(&raw, &ctx, submission)
                .await
            {
                Ok(Ok(hash)) => Ok(json!(hash)),
                Ok(Err(err)) => Err(backend_error(&ctx.request_id, err)),
                Err(SerializeError::AcquireTimeout) => {
                    warn!(request_id = %ctx.request_id, "sender serialization timed out");
                    Err(RpcError::internal_error(
                        "Timed out waiting to serialize transaction submission",
                    ))
                }
            }
        })
    }

    fn trace_transaction(
        &self,
        params: Vec<Value>,
        ctx: RequestContext,
    ) -> std::pin::Pin<Box<dyn Future<Output = Result<Value, RpcError>> + Send + '_>> {
        Box::pin(async move {
            let id = str_arg(&params, 0)?;
            let tracer = arg(&params, 1).cloned().unwrap_or(json!("callTracer"));
            let tracer_config = arg(&params, 2).cloned().unwrap_or(json!({}));
            let trace = self
                .backend
                .trace_transaction(&id, &tracer, &tracer_config)
                .await
                .map_err(|e| backend_error(&ctx.request_id, e))?;
            Ok(trace)
        })
    }
}

/// `[hash, { tracer, tracerConfig }]` -> `[hash, tracer, tracerConfig]`.
fn split_tracer_wrapper(mut params: Vec<Value>) -> Vec<Value> {
    let wrapper = if params.len() > 1 { params.remove(1) } else { Value::Null };
    let tracer = wrapper.get("tracer").cloned().unwrap_or(Value::Null);
    let tracer_config = wrapper.get("tracerConfig").cloned().unwrap_or(Value::Null);
    params.push(tracer);
    params.push(tracer_config);
    params
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::backend::MemoryBackend;
    use crate::dispatch::{DispatcherConfig, RpcDispatcher};
    use mirrorgate_common::envelope::RpcRequest;
    use mirrorgate_lock::{LocalLockStrategy, LockConfig, LockMetrics};

    fn pipeline() -> (RpcDispatcher, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new(298));
        let metrics = Arc::new(LockMetrics::unregistered());
        let strategy = Arc::new(LocalLockStrategy::new(&LockConfig::default(), metrics));
        let serializer = Arc::new(SenderSerializer::new(strategy, Duration::from_secs(5)));

        let mut dispatcher = RpcDispatcher::new(DispatcherConfig::default());
        let service = EthService::new(backend.clone(), serializer, EthServiceConfig::default());
        service.register(&mut dispatcher);
        (dispatcher, backend)
    }

    fn request(method: &str, params: Value) -> RpcRequest {
        serde_json::from_value(json!({
            "jsonrpc": "2.0", "id": 1, "method": method, "params": params
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_read_methods() {
        let (dispatcher, _) = pipeline();
        let ctx = RequestContext::internal();

        let chain_id = dispatcher
            .execute(&request("eth_chainId", json!([])), &ctx)
            .await
            .unwrap();
        assert_eq!(chain_id, json!("0x12a"));

        let version = dispatcher
            .execute(&request("net_version", json!([])), &ctx)
            .await
            .unwrap();
        assert_eq!(version, json!("298"));

        let addr = format!("0x{}", "ab".repeat(20));
        let balance = dispatcher
            .execute(&request("eth_getBalance", json!([addr, "latest"])), &ctx)
            .await
            .unwrap();
        assert_eq!(balance, json!("0x0"));
    }

    #[tokio::test]
    async fn test_get_balance_rejects_bad_address() {
        let (dispatcher, _) = pipeline();
        let err = dispatcher
            .execute(
                &request("eth_getBalance", json!([42, true])),
                &RequestContext::internal(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, mirrorgate_common::error::INVALID_PARAMS);
        assert!(!err.message.is_empty());
    }

    #[tokio::test]
    async fn test_send_raw_transaction_submits_through_serializer() {
        let (dispatcher, backend) = pipeline();
        let hash = dispatcher
            .execute(
                &request("eth_sendRawTransaction", json!(["0x0102"])),
                &RequestContext::internal(),
            )
            .await
            .unwrap();
        // Unparseable as a signed tx: serialization is skipped but the
        // submission still goes through.
        assert!(hash.as_str().unwrap().starts_with("0x"));
        assert_eq!(backend.submissions(), vec![vec![1, 2]]);
    }

    #[tokio::test]
    async fn test_send_raw_transaction_size_limit() {
        let backend = Arc::new(MemoryBackend::new(298));
        let metrics = Arc::new(LockMetrics::unregistered());
        let strategy = Arc::new(LocalLockStrategy::new(&LockConfig::default(), metrics));
        let serializer = Arc::new(SenderSerializer::new(strategy, Duration::from_secs(5)));
        let mut dispatcher = RpcDispatcher::new(DispatcherConfig::default());
        EthService::new(
            backend,
            serializer,
            EthServiceConfig {
                send_raw_transaction_size_limit: 4,
                ..EthServiceConfig::default()
            },
        )
        .register(&mut dispatcher);

        let err = dispatcher
            .execute(
                &request("eth_sendRawTransaction", json!(["0x0102030405"])),
                &RequestContext::internal(),
            )
            .await
            .unwrap_err();
        assert!(err.message.contains("exceeds limit"));
    }

    #[tokio::test]
    async fn test_call_data_size_limit() {
        let backend = Arc::new(MemoryBackend::new(298));
        let metrics = Arc::new(LockMetrics::unregistered());
        let strategy = Arc::new(LocalLockStrategy::new(&LockConfig::default(), metrics));
        let serializer = Arc::new(SenderSerializer::new(strategy, Duration::from_secs(5)));
        let mut dispatcher = RpcDispatcher::new(DispatcherConfig::default());
        EthService::new(
            backend,
            serializer,
            EthServiceConfig {
                call_data_size_limit: 8,
                ..EthServiceConfig::default()
            },
        )
        .register(&mut dispatcher);

        let to = format!("0x{}", "cd".repeat(20));
        let err = dispatcher
            .execute(
                &request(
                    "eth_call",
                    json!([{ "to": to, "data": format!("0x{}", "ff".repeat(16)) }, "latest"]),
                ),
                &RequestContext::internal(),
            )
            .await
            .unwrap_err();
        assert!(err.message.contains("Call data size"));
    }

    #[tokio::test]
    async fn test_get_logs_address_cap() {
        let (dispatcher, _) = pipeline();
        let addr = format!("0x{}", "ab".repeat(20));
        let addresses: Vec<_> = (0..11).map(|_| addr.clone()).collect();
        let err = dispatcher
            .execute(
                &request("eth_getLogs", json!([{ "address": addresses }])),
                &RequestContext::internal(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, mirrorgate_common::error::LIMIT_EXCEEDED);
    }

    #[tokio::test]
    async fn test_trace_transaction_wrapper_split() {
        let (dispatcher, _) = pipeline();
        let hash = format!("0x{}", "77".repeat(32));
        let trace = dispatcher
            .execute(
                &request(
                    "debug_traceTransaction",
                    json!([hash, { "tracer": "callTracer", "tracerConfig": { "onlyTopCall": true } }]),
                ),
                &RequestContext::internal(),
            )
            .await
            .unwrap();
        assert_eq!(trace["tracer"], json!("callTracer"));

        // transaction id form is accepted too
        let trace = dispatcher
            .execute(
                &request("debug_traceTransaction", json!(["0.0.1234-1700000000-1"])),
                &RequestContext::internal(),
            )
            .await
            .unwrap();
        assert_eq!(trace["tracer"], json!("callTracer"));
    }

    #[tokio::test]
    async fn test_filter_validation_flows_through_get_logs() {
        let (dispatcher, _) = pipeline();
        let hash = format!("0x{}", "88".repeat(32));
        let err = dispatcher
            .execute(
                &request(
                    "eth_getLogs",
                    json!([{ "blockHash": hash, "fromBlock": "0x1" }]),
                ),
                &RequestContext::internal(),
            )
            .await
            .unwrap_err();
        assert!(err.message.contains("blockHash"));
    }
}
