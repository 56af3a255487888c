use std::{fs::File, sync::Arc};

use anyhow::{Context, Result};
use tracing::{info, warn};
use tx_ledger::{
    account::InMemoryAccountStore,
    api::{ApiRouter, ApiV1, V1_PREFIX},
    bin_utils::Service,
    config::CoordinatorConfig,
    coordinator::simple_coordinator::SimpleCoordinator,
    logging,
};

const USAGE: &str = "Usage: tx-ledger <file.csv> | tx-ledger serve [address]";
const DEFAULT_ADDRESS: &str = "127.0.0.1:8080";

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    let mut args = std::env::args().skip(1);
    let first = args.next().context(USAGE)?;
    let config = CoordinatorConfig::from_env().context("Invalid configuration")?;

    if first == "serve" {
        let address = args.next().unwrap_or_else(|| DEFAULT_ADDRESS.to_owned());
        return serve(&address, &config).await;
    }

    let file = File::open(&first).with_context(|| format!("Failed to open `{first}`"))?;
    let service = Service {
        input: file,
        output: &mut std::io::stdout(),
        config,
        error_printer: Box::new(|line, outcome| {
            // business rejections are expected, keep them at warn level
            warn!(line, %outcome, "command rejected");
        }),
    };
    service.run()
}

async fn serve(address: &str, config: &CoordinatorConfig) -> Result<()> {
    let store = Arc::new(InMemoryAccountStore::new());
    let coordinator = Arc::new(SimpleCoordinator::with_config(Arc::clone(&store), config));
    let app = ApiRouter::new(ApiV1::new(coordinator, store))
        .base_path("api")
        .enable_v1(V1_PREFIX)
        .build();

    let listener = tokio::net::TcpListener::bind(address)
        .await
        .with_context(|| format!("Failed to bind `{address}`"))?;
    info!(address, "serving ledger API");
    axum::serve(listener, app).await.context("Server failed")
}
