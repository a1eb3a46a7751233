//! Orchestrator binary.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vforge_bus::{BusConfig, DispatchQueue, EventBus};
use vforge_db::Db;
use vforge_orchestrator::{
    BusTransport, EventConsumer, Orchestrator, OrchestratorConfig,
};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS connections)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(EnvFilter::from_default_env().add_directive("vforge=info".parse().unwrap()))
        .init();

    info!("Starting vforge-orchestrator");

    let config = OrchestratorConfig::from_env();
    info!("Orchestrator config: {:?}", config);

    let db = match Db::from_env().await {
        Ok(db) => db,
        Err(e) => {
            error!("Failed to connect to metadata store: {}", e);
            std::process::exit(1);
        }
    };

    let bus_config = BusConfig::from_env();
    let dispatch = match DispatchQueue::new(bus_config.clone()) {
        Ok(q) => q,
        Err(e) => {
            error!("Failed to create dispatch queue: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = dispatch.init().await {
        error!("Failed to initialize dispatch queue: {}", e);
        std::process::exit(1);
    }
    let events = match EventBus::new(bus_config) {
        Ok(bus) => Arc::new(bus),
        Err(e) => {
            error!("Failed to create event bus: {}", e);
            std::process::exit(1);
        }
    };

    let transport = Arc::new(BusTransport::new(dispatch, events.as_ref().clone()));
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(db.jobs()),
        Arc::new(db.tasks()),
        transport,
        config.clone(),
    ));

    let consumer = Arc::new(EventConsumer::new(orchestrator, events, config));

    // Setup signal handler
    let consumer_for_signal = Arc::clone(&consumer);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        consumer_for_signal.shutdown();
    });

    if let Err(e) = consumer.run().await {
        error!("Event consumer error: {}", e);
        std::process::exit(1);
    }

    info!("Orchestrator shutdown complete");
}
