//! Prometheus exporter for myStrom WiFi switches.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};

use mystrom_exporter::{
    DeviceTable, DiscoveryListener, DiscoveryRoutes, ExporterConfig, ExporterMetrics,
    HttpDeviceClient, HttpServer, Scraper, create_router,
};

/// Prometheus exporter for myStrom WiFi switches.
#[derive(Parser, Debug)]
#[command(name = "mystrom-exporter")]
#[command(about = "Export myStrom device measurements as Prometheus metrics")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    config: Option<String>,

    /// Address to listen on for the web interface (overrides config).
    #[arg(long = "web.listen-address")]
    listen: Option<String>,

    /// Path under which to expose the exporter's own metrics (overrides config).
    #[arg(long = "web.metrics-path")]
    metrics_path: Option<String>,

    /// Path under which to expose device metrics (overrides config).
    #[arg(long = "web.device-path")]
    device_path: Option<String>,

    /// Listen for device broadcasts and serve a service-discovery manifest.
    #[arg(long = "discovery.enabled")]
    discovery: bool,

    /// Log level (trace, debug, info, warn, error). Defaults to the configured level.
    #[arg(long)]
    log_level: Option<String>,
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
        config.web.listen = listen;
    }
    if let Some(path) = args.metrics_path {
        config.web.metrics_path = path;
    }
    if let Some(path) = args.device_path {
        config.web.device_path = path;
    }
    if args.discovery {
        config.discovery.enabled = true;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }

    config.validate()?;

    // Initialize logging
    mystrom_common::init_tracing(&config.logging)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting myStrom exporter"
    );

    let listen_addr = config.web.listen_addr()?;

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Create components
    let metrics = Arc::new(ExporterMetrics::new());
    let client = HttpDeviceClient::new(config.device.timeout())?;
    let scraper = Arc::new(Scraper::new(client, metrics));

    let mut discovery_handle = None;
    let discovery_routes = if config.discovery.enabled {
        let table = Arc::new(DeviceTable::new());
        let handle = DiscoveryListener::new(config.discovery.clone(), table.clone())
            .start(listen_addr)
            .await?;

        let routes = DiscoveryRoutes {
            table,
            exporter_address: handle.exporter_address().to_string(),
        };
        discovery_handle = Some(handle);
        Some(routes)
    } else {
        None
    };

    let router = create_router(scraper, discovery_routes, &config.web);
    let http_server = HttpServer::bind(router, listen_addr).await?;

    // Start HTTP server
    let mut http_task = tokio::spawn(http_server.run(shutdown_rx.clone()));

    // Wait for shutdown signal, or for the server to stop on its own
    let server_error = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
            None
        }
        _ = terminate() => {
            info!("Received SIGTERM, shutting down...");
            None
        }
        result = &mut http_task => Some(match result {
            Ok(Ok(())) => anyhow::anyhow!("HTTP server stopped unexpectedly"),
            Ok(Err(e)) => e,
            Err(e) => anyhow::Error::from(e),
        }),
    };

    // Signal shutdown
    let _ = shutdown_tx.send(true);

    // Wait for tasks to complete
    let server_stopped = server_error.is_some();
    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        if let Some(handle) = discovery_handle {
            handle.stop().await;
        }
        if !server_stopped {
            let _ = http_task.await;
        }
    })
    .await;

    if let Some(e) = server_error {
        error!("HTTP server error: {}", e);
        return Err(e);
    }

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
            error!("Failed to install SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
