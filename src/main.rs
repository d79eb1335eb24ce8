//! PingTrail - Reachability Monitoring Utility
//!
//! Continuously pings a small set of addresses and persists the measurements
//! to rotating log files for later querying.

mod config;
mod monitor;
mod probe;
mod route;
mod store;
mod web;

use config::{ProbeKind, ServerConfig};
use monitor::Monitor;
use probe::{IcmpProber, Prober, SimulatedProber};
use store::{LogRepository, LogWriter};
use web::Server;

use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("pingtrail=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting PingTrail on port {}...", cfg.http_port);
    tracing::info!("Using log directory {}", cfg.log_dir.display());

    // Open the log storage; without it nothing can be monitored.
    let writer = LogWriter::open(&cfg.log_dir, cfg.max_rows_per_file, cfg.queue_capacity)?;
    let writer_handle = writer.handle();
    let writer_join = writer.start();
    let repository = LogRepository::new(&cfg.log_dir, writer_handle.clone());

    // Select the probe variant
    let prober: Arc<dyn Prober> = match cfg.probe {
        ProbeKind::Icmp => Arc::new(IcmpProber::new()),
        ProbeKind::Simulated => Arc::new(SimulatedProber::new(route::CLOUD_ADDRESS)),
    };

    let monitor = Arc::new(Monitor::new(
        prober,
        writer_handle.clone(),
        repository.clone(),
        cfg.max_sessions,
    ));

    // Seed default targets: nearby hops plus the cloud address, capped at
    // the session maximum. Discovery failure just means fewer defaults.
    let mut default_targets = route::discover_route(cfg.max_sessions.saturating_sub(1)).await;
    if !default_targets.contains(&route::CLOUD_ADDRESS.to_string()) {
        default_targets.push(route::CLOUD_ADDRESS.to_string());
    }
    default_targets.truncate(cfg.max_sessions);
    tracing::info!("Default monitoring targets: {:?}", default_targets);

    // Start web server
    let server = Server::new(cfg, monitor.clone(), repository, default_targets);
    let serve = server.start();
    tokio::pin!(serve);

    tokio::select! {
        result = &mut serve => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
            monitor.stop_all().await;
            writer_handle.stop().await;
            // Let in-flight writes finish, but never hang shutdown on them.
            if tokio::time::timeout(Duration::from_secs(5), writer_join).await.is_err() {
                tracing::warn!("Log writer did not stop within the grace period");
            }
        }
    }

    Ok(())
}
