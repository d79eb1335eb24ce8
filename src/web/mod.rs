//! Web server module.

mod handlers;

pub use handlers::*;

use crate::config::ServerConfig;
use crate::monitor::Monitor;
use crate::store::LogRepository;

use axum::{
    routing::{delete, get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub monitor: Arc<Monitor>,
    pub repository: LogRepository,
    /// Targets discovered at startup, used when a start request names none.
    pub default_targets: Vec<String>,
}

/// Web server for PingTrail.
pub struct Server {
    state: AppState,
}

impl Server {
    /// Create a new server with the given dependencies.
    pub fn new(
        config: ServerConfig,
        monitor: Arc<Monitor>,
        repository: LogRepository,
        default_targets: Vec<String>,
    ) -> Self {
        Self {
            state: AppState {
                config,
                monitor,
                repository,
                default_targets,
            },
        }
    }

    /// Build the router with all routes.
    fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

        Router::new()
            .route("/api/monitor/start", post(handlers::handle_start_monitor))
            .route("/api/monitor/stop", post(handlers::handle_stop_monitor))
            .route("/api/monitor/active", get(handlers::handle_active))
            .route("/api/records", get(handlers::handle_get_records))
            .route("/api/records", post(handlers::handle_save_record))
            .route("/api/records", delete(handlers::handle_clear_records))
            .route("/api/loss/{ip}", get(handlers::handle_lost_ratio))
            .route("/api/status", get(handlers::handle_status))
            .layer(cors)
            .with_state(self.state.clone())
    }

    /// Start the server on the configured port.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let router = self.routes();

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}
