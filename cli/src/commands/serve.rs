// Copyright (c) 2026 Spider Platform Contributors
// SPDX-License-Identifier: AGPL-3.0

//! HTTP server with periodic maintenance

use anyhow::{Context, Result};
use clap::Args;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};

use spider_core::application::SpiderServices;
use spider_core::infrastructure::spawn_security_log;
use spider_core::presentation::app;

use super::load_config;

#[derive(Args)]
pub struct ServeArgs {
    /// Bind address (default: from configuration)
    #[arg(long, env = "SPIDER_HOST")]
    pub host: Option<String>,

    /// HTTP port (default: from configuration)
    #[arg(long, env = "SPIDER_PORT")]
    pub port: Option<u16>,

    /// Seconds between maintenance passes; 0 disables them
    #[arg(long, default_value = "300")]
    pub maintenance_interval: u64,
}

pub async fn execute(args: ServeArgs, config_path: Option<PathBuf>) -> Result<()> {
    let mut manifest = load_config(config_path)?;
    if let Some(host) = args.host {
        manifest.spec.server.bind_address = host;
    }
    if let Some(port) = args.port {
        manifest.spec.server.port = port;
    }

    if let Some(metrics_port) = manifest.spec.observability.metrics_port {
        let addr = SocketAddr::from(([0, 0, 0, 0], metrics_port));
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("Failed to install Prometheus exporter")?;
        info!("Metrics exporter listening on {}", addr);
    }

    let addr = format!("{}:{}", manifest.spec.server.bind_address, manifest.spec.server.port);
    let services = SpiderServices::from_config(manifest.spec)
        .await
        .context("Failed to initialize services")?;
    spawn_security_log(&services.event_bus);

    if args.maintenance_interval > 0 {
        tokio::spawn(maintenance_loop(
            services.clone(),
            Duration::from_secs(args.maintenance_interval),
        ));
    }

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Spider listening on {}", addr);

    axum::serve(listener, app(services))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("Spider shutting down");
    Ok(())
}

async fn maintenance_loop(services: SpiderServices, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    // the first tick completes immediately
    ticker.tick().await;
    loop {
        ticker.tick().await;
        match services.run_maintenance().await {
            Ok(report) => info!(
                contents = report.purge.contents,
                components = report.purge.components,
                failures = report.purge.failures,
                expired_tokens = report.expired_tokens,
                idle_sessions = report.idle_sessions,
                "Maintenance pass finished"
            ),
            Err(e) => error!(error = %e, "Maintenance pass failed"),
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
