//! Prometheus metrics exporter.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};

use metrics_exporter_common::init_tracing;
use prometheus_metrics_exporter::runtime::register_runtime_metrics;
use prometheus_metrics_exporter::{ExporterConfig, FamilyRegistry, HttpServer, RuleSet};

/// Prometheus metrics exporter.
#[derive(Parser, Debug)]
#[command(name = "prometheus-metrics-exporter")]
#[command(about = "Expose application and runtime metrics to Prometheus")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    config: Option<String>,

    /// HTTP listen address (overrides config).
    #[arg(long)]
    listen: Option<String>,

    /// Log level (trace, debug, info, warn, error; overrides config).
    #[arg(long)]
    log_level: Option<String>,

    /// Export host and process metrics (overrides config).
    #[arg(long)]
    runtime: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        ExporterConfig::load_from_file(config_path)?
    } else {
        ExporterConfig::default()
    };

    // CLI overrides
    if let Some(listen) = args.listen {
        config.http.listen = listen;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    if args.runtime {
        config.runtime.enabled = true;
    }
    config.validate()?;

    init_tracing(&config.logging)?;

    info!("Starting Prometheus metrics exporter");

    let rules = RuleSet::new(&config.rules)?;
    let registry = Arc::new(FamilyRegistry::new(rules));
    register_runtime_metrics(&registry, &config.runtime)?;

    let listen_addr = config
        .http
        .listen
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid listen address: {}", e))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let http_server = HttpServer::new(registry.clone(), listen_addr, config.http.path.clone());
    let http_task = tokio::spawn(async move {
        if let Err(e) = http_server.run(shutdown_rx).await {
            error!("HTTP server error: {}", e);
        }
    });

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate() => {
            info!("Received SIGTERM, shutting down...");
        }
    }

    shutdown_tx.send(true)?;

    let _ = tokio::time::timeout(Duration::from_secs(5), http_task).await;

    let stats = registry.stats();
    info!(
        registered = stats.registered,
        excluded = stats.excluded,
        dropped_invalid_name = stats.dropped_invalid_name,
        dropped_kind_conflict = stats.dropped_kind_conflict,
        unregistered = stats.unregistered,
        families = registry.snapshot().len(),
        "Final statistics"
    );

    info!("Exporter stopped");
    Ok(())
}

#[cfg(unix)]
async fn terminate() {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            error!("Cannot listen for SIGTERM: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
