//! Process wiring: logging, store connection, strategy and limiter
//! selection, dispatcher assembly, HTTP server construction.

use std::sync::Arc;

use actix_web::dev::Server;
use actix_web::{App, HttpServer, middleware::Logger, web};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mirrorgate_lock::{LockMetrics, create_lock_strategy};
use mirrorgate_rpc::dispatch::RateGate;
use mirrorgate_rpc::{EthService, MemoryBackend, RpcDispatcher, SenderSerializer};
use mirrorgate_store::{KvStore, RedisStore};

use crate::config::Configuration;
use crate::limit::{RateLimitService, create_rate_limiter};
use crate::web::{AppState, routes};

pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Connect to the shared store when enabled; a connection failure logs a
/// warning and falls back to local strategies rather than aborting.
pub async fn connect_store(configuration: &Configuration) -> Option<Arc<dyn KvStore>> {
    if !configuration.redis_enabled() {
        info!("shared store disabled by configuration");
        return None;
    }
    match RedisStore::connect(&configuration.redis_url()).await {
        Ok(store) => Some(Arc::new(store)),
        Err(err) => {
            warn!(error = %err, "shared store unreachable, falling back to local strategies");
            None
        }
    }
}

/// Assemble the full request pipeline into an `AppState`.
pub async fn build_state(configuration: &Configuration) -> anyhow::Result<AppState> {
    let registry = prometheus::Registry::new();
    let lock_metrics = Arc::new(
        LockMetrics::new(&registry).map_err(|e| anyhow::anyhow!("metric registration: {e}"))?,
    );

    let store = connect_store(configuration).await;

    let strategy = create_lock_strategy(&configuration.lock_config(), store.clone(), lock_metrics);
    let serializer = Arc::new(SenderSerializer::new(
        strategy,
        configuration.lock_acquire_timeout(),
    ));

    let rate_limiter = create_rate_limiter(
        configuration.rate_limit_disabled(),
        configuration.limit_duration(),
        store,
    );

    let backend = Arc::new(MemoryBackend::new(configuration.chain_id()));
    let mut dispatcher = RpcDispatcher::new(configuration.dispatcher_config());
    EthService::new(backend, serializer, configuration.eth_service_config()).register(&mut dispatcher);
    dispatcher.set_rate_gate(rate_gate(rate_limiter, configuration.default_rate_limit()));

    info!(
        methods = dispatcher.method_names().len(),
        "rpc dispatcher assembled"
    );

    Ok(AppState {
        dispatcher,
        client_error_status: configuration.on_valid_response_status_code(),
        registry,
    })
}

/// Bridge the rate limiter into the dispatcher's admission gate.
pub fn rate_gate(limiter: Arc<dyn RateLimitService>, limit: u32) -> RateGate {
    Arc::new(move |method, ctx| {
        let limiter = limiter.clone();
        Box::pin(async move {
            limiter
                .should_rate_limit(&ctx.client_ip, &method, limit, &ctx.request_id)
                .await
        })
    })
}

/// Create and bind the HTTP server.
pub fn http_server(state: Arc<AppState>, address: String, port: u16) -> std::io::Result<Server> {
    let data = web::Data::from(state);
    Ok(HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .app_data(data.clone())
            .configure(routes)
    })
    .bind((address, port))?
    .run())
}
