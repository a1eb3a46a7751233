//! Worker binary.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vforge_bus::{BusConfig, DispatchQueue, EventBus};
use vforge_db::Db;
use vforge_plugins::PluginHost;
use vforge_worker::{Worker, WorkerConfig};

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

    info!("Starting vforge-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    let db = match Db::from_env().await {
        Ok(db) => db,
        Err(e) => {
            error!("Failed to connect to metadata store: {}", e);
            std::process::exit(1);
        }
    };

    let bus_config = BusConfig::from_env();
    let queue = match DispatchQueue::new(bus_config.clone()) {
        Ok(q) => q,
        Err(e) => {
            error!("Failed to create dispatch queue: {}", e);
            std::process::exit(1);
        }
    };
    let events = match EventBus::new(bus_config) {
        Ok(bus) => Arc::new(bus),
        Err(e) => {
            error!("Failed to create event bus: {}", e);
            std::process::exit(1);
        }
    };

    let plugins = match &config.plugin_dir {
        Some(dir) => match PluginHost::load(dir).await {
            Ok(host) => {
                for (capability, ids) in host.registry().summary() {
                    if !ids.is_empty() {
                        info!("Plugins loaded for {}: {:?}", capability, ids);
                    }
                }
                host
            }
            Err(e) => {
                error!("Failed to load plugins: {}", e);
                std::process::exit(1);
            }
        },
        None => PluginHost::empty(),
    };
    let plugins = Arc::new(plugins);

    let worker = Arc::new(Worker::new(
        config,
        queue,
        events,
        Arc::new(db.tasks()),
        Arc::clone(&plugins),
    ));

    // Setup signal handler
    let worker_for_signal = Arc::clone(&worker);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        worker_for_signal.shutdown();
    });

    if let Err(e) = worker.run().await {
        error!("Worker error: {}", e);
        std::process::exit(1);
    }

    plugins.shutdown().await;
    info!("Worker shutdown complete");
}
