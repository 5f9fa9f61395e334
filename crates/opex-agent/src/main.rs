//! Opex analytics agent
//!
//! Samples cluster usage into the series store, periodically exports
//! trends and cost histograms, and serves them with health and metrics
//! endpoints.

use anyhow::{Context, Result};
use clap::Parser;
use opex_lib::{
    health::{components, HealthRegistry},
    observability::{OpexMetrics, StructuredLogger},
    AnalyticsEngine, ArtifactPublisher, ExporterConfig, ExporterLoop, FileSeriesStore,
    K8sApiClient, RetentionPolicy, SamplerLoop,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(name = "opex-agent", version, about = "Kubernetes usage and cost analytics agent")]
struct Args {
    /// Port of the HTTP API
    #[arg(long, env = "KOA_LISTEN_PORT", default_value_t = 5483)]
    port: u16,
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(fmt::layer().json())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = config::AgentConfig::load()?;
    init_tracing(config.enable_debug);

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(e);
    }
    let cost_model = config.cost_model()?;
    let polling_interval = config.polling_interval();

    let logger = StructuredLogger::new(&config.k8s_api_endpoint);
    logger.log_startup(AGENT_VERSION, &cost_model.to_string(), polling_interval);

    let health_registry = HealthRegistry::new();
    for name in components::ALL {
        health_registry.register(name).await;
    }
    let metrics = OpexMetrics::new();

    let db_location = config.db_location();
    let store = Arc::new(
        FileSeriesStore::open(
            &db_location,
            RetentionPolicy::for_step(polling_interval.as_secs() as i64),
        )
        .with_context(|| format!("Failed to open series store at {:?}", db_location))?,
    );
    info!(db_location = %db_location.display(), "Series store opened");

    let publisher = ArtifactPublisher::new(config.data_dir())?;
    publisher.write_backend_info(cost_model, &config.billing_currency_symbol)?;

    let client = Arc::new(
        K8sApiClient::new(config.client_config()).context("Failed to create cluster API client")?,
    );

    let (shutdown_tx, _) = broadcast::channel(1);

    let sampler = SamplerLoop::new(
        client,
        store.clone(),
        publisher.clone(),
        config.sampler_config(),
        health_registry.clone(),
        logger.clone(),
    );
    let sampler_handle = tokio::spawn(sampler.run(shutdown_tx.subscribe()));

    let engine = AnalyticsEngine::new(store, config.analytics_config()?, metrics);
    let exporter = ExporterLoop::new(
        engine,
        publisher.clone(),
        ExporterConfig::from_polling_interval(polling_interval),
        health_registry.clone(),
        logger.clone(),
    );
    let exporter_handle = tokio::spawn(exporter.run(shutdown_tx.subscribe()));

    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        publisher.dir().to_path_buf(),
    ));
    let api_handle = tokio::spawn(api::serve(args.port, app_state));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            logger.log_shutdown("SIGINT received");
        }
        result = api_handle => {
            let reason = match result {
                Ok(Ok(())) => "API server stopped".to_string(),
                Ok(Err(e)) => format!("API server failed: {}", e),
                Err(e) => format!("API server task failed: {}", e),
            };
            error!(reason = %reason, "Stopping agent");
            logger.log_shutdown(&reason);
        }
    }

    let _ = shutdown_tx.send(());
    let _ = tokio::join!(sampler_handle, exporter_handle);
    info!("Shutdown complete");

    Ok(())
}
