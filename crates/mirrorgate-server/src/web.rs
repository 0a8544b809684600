//! HTTP JSON-RPC facade.
//!
//! One POST endpoint at `/` accepting a single request object or a batch
//! array, plus health and metrics endpoints. Status-code policy: parse
//! errors and malformed envelopes are always 400; other client-caused
//! JSON-RPC errors use the configured status (200 error-in-envelope by
//! default, optionally 400). Gateway faults never turn into HTTP 5xx for
//! client-caused conditions.

use actix_web::http::StatusCode;
use actix_web::{HttpRequest, HttpResponse, web};
use serde_json::{Value, json};
use tracing::debug;

use mirrorgate_common::context::RequestContext;
use mirrorgate_common::envelope::{RpcRequest, RpcResponse};
use mirrorgate_common::error::{INVALID_REQUEST, PARSE_ERROR, RpcError};
use mirrorgate_rpc::RpcDispatcher;

pub struct AppState {
    pub dispatcher: RpcDispatcher,
    /// HTTP status for client-caused JSON-RPC errors on valid requests.
    pub client_error_status: u16,
    pub registry: prometheus::Registry,
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::post().to(rpc_endpoint))
        .route("/health/liveness", web::get().to(health))
        .route("/health/readiness", web::get().to(health))
        .route("/metrics", web::get().to(metrics))
        .default_service(web::to(method_not_allowed));
}

fn request_context(req: &HttpRequest) -> RequestContext {
    let client_ip = req
        .connection_info()
        .realip_remote_addr()
        .unwrap_or("unknown")
        .to_string();
    let connection_id = req
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    RequestContext::new(client_ip, connection_id)
}

/// Pick the HTTP status for a single-response envelope.
fn response_status(response: &RpcResponse, client_error_status: u16) -> StatusCode {
    let Some(error) = &response.error else {
        return StatusCode::OK;
    };
    // Broken requests are 400 regardless of policy.
    if matches!(error.code, PARSE_ERROR | INVALID_REQUEST) {
        return StatusCode::BAD_REQUEST;
    }
    if error.is_client_error() && client_error_status == 400 {
        return StatusCode::BAD_REQUEST;
    }
    StatusCode::OK
}

async fn rpc_endpoint(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Bytes,
) -> HttpResponse {
    let ctx = request_context(&req);

    let Ok(payload) = serde_json::from_slice::<Value>(&body) else {
        let response = RpcResponse::failure(Value::Null, RpcError::parse_error());
        return HttpResponse::BadRequest().json(response);
    };

    match payload {
        Value::Array(entries) => batch_call(&state, entries, &ctx).await,
        single => single_call(&state, single, &ctx).await,
    }
}

async fn single_call(state: &AppState, payload: Value, ctx: &RequestContext) -> HttpResponse {
    let request: RpcRequest = match serde_json::from_value(payload) {
        Ok(request) => request,
        Err(_) => {
            let response = RpcResponse::failure(
                Value::Null,
                RpcError::invalid_request("request must be an object"),
            );
            return HttpResponse::BadRequest().json(response);
        }
    };

    let id = request.id.clone().unwrap_or(Value::Null);
    let method = request.method.clone().unwrap_or_default();
    let outcome = state.dispatcher.execute(&request, ctx).await;
    debug!(
        request_id = %ctx.request_id,
        method = %method,
        ok = outcome.is_ok(),
        "rpc call completed"
    );

    let response = RpcResponse::from_result(id, outcome);
    let status = response_status(&response, state.client_error_status);
    HttpResponse::build(status).json(response)
}

async fn batch_call(state: &AppState, entries: Vec<Value>, ctx: &RequestContext) -> HttpResponse {
    if entries.is_empty() {
        let response = RpcResponse::failure(
            Value::Null,
            RpcError::invalid_request("empty batch"),
        );
        return HttpResponse::BadRequest().json(response);
    }

    // A non-object entry still occupies its slot, failing as malformed.
    let requests: Vec<RpcRequest> = entries
        .into_iter()
        .map(|entry| serde_json::from_value(entry).unwrap_or(RpcRequest {
            jsonrpc: None,
            id: None,
            method: None,
            params: None,
        }))
        .collect();

    match state.dispatcher.execute_batch(&requests, ctx).await {
        Ok(responses) => {
            debug!(request_id = %ctx.request_id, size = responses.len(), "batch completed");
            HttpResponse::Ok().json(responses)
        }
        Err(error) => {
            let response = RpcResponse::failure(Value::Null, error);
            let status = response_status(&response, state.client_error_status);
            HttpResponse::build(status).json(response)
        }
    }
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "UP" }))
}

async fn metrics(state: web::Data<AppState>) -> HttpResponse {
    match prometheus::TextEncoder::new().encode_to_string(&state.registry.gather()) {
        Ok(body) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(body),
        Err(_) => HttpResponse::InternalServerError().finish(),
    }
}

/// Anything that is not POST / (or the health/metrics routes) gets a 405
/// with a JSON-RPC-shaped envelope.
async fn method_not_allowed() -> HttpResponse {
    let response = RpcResponse::failure(
        Value::Null,
        RpcError::new(INVALID_REQUEST, "HTTP method not allowed, POST JSON-RPC to /"),
    );
    HttpResponse::MethodNotAllowed().json(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response_with(error: Option<RpcError>) -> RpcResponse {
        match error {
            Some(error) => RpcResponse::failure(Value::Null, error),
            None => RpcResponse::success(Value::Null, json!("0x1")),
        }
    }

    #[test]
    fn test_status_policy() {
        // success is always 200
        assert_eq!(response_status(&response_with(None), 200), StatusCode::OK);
        assert_eq!(response_status(&response_with(None), 400), StatusCode::OK);

        // invalid params follows the policy knob
        let invalid = Some(RpcError::invalid_params("bad"));
        assert_eq!(
            response_status(&response_with(invalid.clone()), 200),
            StatusCode::OK
        );
        assert_eq!(
            response_status(&response_with(invalid), 400),
            StatusCode::BAD_REQUEST
        );

        // malformed envelopes are 400 under either policy
        let malformed = Some(RpcError::invalid_request("missing id"));
        assert_eq!(
            response_status(&response_with(malformed), 200),
            StatusCode::BAD_REQUEST
        );

        // internal faults never follow the 400 policy
        let internal = Some(RpcError::internal_error("boom"));
        assert_eq!(
            response_status(&response_with(internal), 400),
            StatusCode::OK
        );
    }
}
