//! Main entry point for the Mirrorgate JSON-RPC gateway.

use std::sync::Arc;

use tracing::info;

use mirrorgate_server::config::Configuration;
use mirrorgate_server::startup;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let configuration = Configuration::new();
    startup::init_logging(&configuration.log_level());

    let address = configuration.http_address();
    let port = configuration.http_port();

    let state = Arc::new(startup::build_state(&configuration).await?);

    info!("starting JSON-RPC gateway on {address}:{port}");
    startup::http_server(state, address, port)?.await?;

    info!("mirrorgate shutdown complete");
    Ok(())
}
