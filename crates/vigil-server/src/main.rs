//! # Vigil
//!
//! Sensor monitor for an IoT node publishing over MQTT.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings (public HiveMQ broker)
//! vigil
//!
//! # Run with custom config
//! vigil --config /path/to/vigil.toml
//!
//! # Run with environment variables
//! VIGIL__BROKER__URL=mqtt://localhost:1883 VIGIL__HTTP__PORT=8081 vigil
//! ```

mod config;
mod handlers;
mod metrics;
mod supervisor;

use anyhow::{Context, Result};
use clap::Parser;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vigil_core::Router;
use vigil_transport::MqttTransport;

use crate::handlers::AppState;
use crate::supervisor::Supervisor;

/// Sensor monitor for gas, temperature and humidity readings.
#[derive(Debug, Parser)]
#[command(name = "vigil", version, about)]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "vigil=info,vigil_core=info,vigil_transport=info,tower_http=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load(args.config.as_deref())?;

    tracing::info!(broker = %config.broker.url, "Starting Vigil");

    // Initialize metrics
    metrics::init_metrics();
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            tracing::error!("Failed to start metrics server: {}", e);
        }
    }

    let router = Arc::new(Router::with_config(
        config.router(),
        config.thresholds.build(),
    ));
    let recorder = metrics::spawn_event_recorder(&router);

    let transport =
        MqttTransport::new(config.mqtt()).context("Failed to configure broker transport")?;
    let supervisor = Arc::new(Supervisor::new(
        Arc::new(transport),
        Arc::clone(&router),
        config.supervisor.clone(),
    ));
    let supervisor_task = tokio::spawn({
        let supervisor = Arc::clone(&supervisor);
        async move { supervisor.run().await }
    });

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutdown requested");
    };
    let served = serve(&config, Arc::clone(&supervisor), supervisor_task, shutdown).await;
    recorder.abort();

    served
}

/// Serve HTTP until `shutdown` resolves or the server fails, then stop the
/// supervisor either way.
async fn serve(
    config: &config::Config,
    supervisor: Arc<Supervisor>,
    supervisor_task: JoinHandle<()>,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    let state = Arc::new(AppState {
        supervisor: Arc::clone(&supervisor),
    });

    let served = tokio::select! {
        result = handlers::run_server(config, state) => result,
        () = shutdown => Ok(()),
    };

    supervisor.shutdown();
    if let Err(e) = supervisor_task.await {
        tracing::warn!(error = %e, "Supervisor task ended abnormally");
    }

    served
}
