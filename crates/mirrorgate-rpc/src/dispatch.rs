//! Method registry and dispatch.
//!
//! Handlers are registered explicitly at startup together with their
//! positional parameter schemas and an argument layout. Dispatch validates
//! the envelope, gates the request through the rate limiter, validates
//! parameters, reshapes them per the layout, and invokes the handler.
//! Batches are bounded by a configurable cap and may exclude individual
//! methods without aborting the rest of the batch.

use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use mirrorgate_common::context::RequestContext;
use mirrorgate_common::envelope::{RpcRequest, RpcResponse};
use mirrorgate_common::error::RpcError;

use crate::validation;

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, RpcError>> + Send>>;
pub type RpcHandler = Arc<dyn Fn(Vec<Value>, RequestContext) -> HandlerFuture + Send + Sync>;

/// Admission decision made before dispatch; returns true when the request
/// must be rejected. Wired to the rate limiter by the server.
pub type RateGate =
    Arc<dyn Fn(String, RequestContext) -> Pin<Box<dyn Future<Output = bool> + Send>> + Send + Sync>;

/// How validated params are turned into handler arguments.
#[derive(Clone)]
pub enum ParamLayout {
    /// Pass the positional params through unchanged.
    Default,
    /// Drop the params; the handler only needs the request context.
    RequestDetailsOnly,
    /// Apply a pure reshaping transform before invocation.
    Custom(fn(Vec<Value>) -> Vec<Value>),
}

/// Positional parameter declaration.
pub struct ParamSpec {
    pub type_spec: &'static str,
    pub required: bool,
}

impl ParamSpec {
    pub const fn required(type_spec: &'static str) -> Self {
        Self { type_spec, required: true }
    }

    pub const fn optional(type_spec: &'static str) -> Self {
        Self { type_spec, required: false }
    }
}

struct MethodEntry {
    params: Vec<ParamSpec>,
    layout: ParamLayout,
    handler: RpcHandler,
}

#[derive(Clone, Debug)]
pub struct DispatcherConfig {
    pub batch_enabled: bool,
    pub batch_max_size: usize,
    pub batch_disallowed_methods: HashSet<String>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            batch_enabled: true,
            batch_max_size: 100,
            batch_disallowed_methods: HashSet::new(),
        }
    }
}

pub struct RpcDispatcher {
    methods: HashMap<String, MethodEntry>,
    config: DispatcherConfig,
    rate_gate: Option<RateGate>,
}

impl RpcDispatcher {
    pub fn new(config: DispatcherConfig) -> Self {
        Self {
            methods: HashMap::new(),
            config,
            rate_gate: None,
        }
    }

    /// Install the admission gate consulted before every dispatch.
    pub fn set_rate_gate(&mut self, gate: RateGate) {
        self.rate_gate = Some(gate);
    }

    pub fn register(
        &mut self,
        method: &str,
        params: Vec<ParamSpec>,
        layout: ParamLayout,
        handler: RpcHandler,
    ) {
        debug!(method, "registered RPC method");
        self.methods
            .insert(method.to_string(), MethodEntry { params, layout, handler });
    }

    pub fn has_method(&self, method: &str) -> bool {
        self.methods.contains_key(method)
    }

    pub fn method_names(&self) -> Vec<&str> {
        self.methods.keys().map(String::as_str).collect()
    }

    /// Execute a single well-formed-or-not request through the full
    /// pipeline. Every failure comes back as an `RpcError` for the caller
    /// to wrap into a response envelope.
    pub async fn execute(
        &self,
        request: &RpcRequest,
        ctx: &RequestContext,
    ) -> Result<Value, RpcError> {
        request.check_well_formed()?;
        let method = request.method.as_deref().unwrap_or_default();

        if let Some(gate) = &self.rate_gate {
            if gate(method.to_string(), ctx.clone()).await {
                return Err(RpcError::ip_rate_limit_exceeded(method));
            }
        }

        let entry = self
            .methods
            .get(method)
            .ok_or_else(|| RpcError::method_not_found(method))?;

        let mut params = request.params_vec()?;
        for (index, spec) in entry.params.iter().enumerate() {
            let location = index.to_string();
            match params.get_mut(index) {
                Some(value) if !value.is_null() => {
                    validation::validate_value(&location, value, spec.type_spec)?;
                }
                _ if spec.required => {
                    return Err(RpcError::missing_required_parameter(&location));
                }
                _ => {}
            }
        }

        let args = match &entry.layout {
            ParamLayout::Default => params,
            ParamLayout::RequestDetailsOnly => Vec::new(),
            ParamLayout::Custom(transform) => transform(params),
        };

        (entry.handler)(args, ctx.clone()).await
    }

    /// Execute a batch, preserving positional order in the result.
    ///
    /// An oversized batch maps every slot to the batch-size error without
    /// dispatching anything; a disabled batch mode rejects the whole
    /// request with a single error.
    pub async fn execute_batch(
        &self,
        requests: &[RpcRequest],
        ctx: &RequestContext,
    ) -> Result<Vec<RpcResponse>, RpcError> {
        if !self.config.batch_enabled {
            return Err(RpcError::batch_requests_disabled());
        }

        if requests.len() > self.config.batch_max_size {
            let error = RpcError::batch_size_exceeded(requests.len(), self.config.batch_max_size);
            return Ok(requests
                .iter()
                .map(|request| {
                    RpcResponse::failure(
                        request.id.clone().unwrap_or(Value::Null),
                        error.clone(),
                    )
                })
                .collect());
        }

        let slots = requests.iter().map(|request| async {
            let id = request.id.clone().unwrap_or(Value::Null);
            if let Some(method) = request.method.as_deref() {
                if self.config.batch_disallowed_methods.contains(method) {
                    return RpcResponse::failure(
                        id,
                        RpcError::method_not_allowed_in_batch(method),
                    );
                }
            }
            RpcResponse::from_result(id, self.execute(request, ctx).await)
        });

        Ok(futures::future::join_all(slots).await)
    }
}
