//! API server implementation

use axum::{
    Router,
    http::Method,
};
use std::future::Future;
use tower_http::cors::{CorsLayer, Any};
use tower_http::trace::TraceLayer;
use crate::api::routes;
use crate::error::{MonitorError, Result};
use crate::trackers::Trackers;

pub struct ApiServer {
    trackers: Trackers,
    port: u16,
}

impl ApiServer {
    pub fn new(trackers: Trackers, port: u16) -> Self {
        Self { trackers, port }
    }

    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(Any);

        let trackers = &self.trackers;
        Router::new()
            .nest("/api/v1", Router::new()
                .merge(routes::peers::routes(trackers.registry.clone()))
                .merge(routes::validators::routes(trackers.validators.clone()))
                .merge(routes::consensus::routes(trackers.validators.clone(), trackers.alerting.clone()))
                .merge(routes::blocks::routes(trackers.blocks.clone()))
                .merge(routes::alerts::routes(trackers.alerting.clone()))
                .merge(routes::nodes::routes(trackers.node_health.clone()))
            )
            .layer(TraceLayer::new_for_http())
            .layer(cors)
    }

    /// Serves until `shutdown` resolves.
    pub async fn start<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = self.router();
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = tokio::net::TcpListener::bind(&addr).await
            .map_err(|e| MonitorError::Internal(format!("Failed to bind {}: {}", addr, e)))?;

        tracing::info!("API server listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| MonitorError::Internal(format!("Server error: {}", e)))?;

        Ok(())
    }
}
