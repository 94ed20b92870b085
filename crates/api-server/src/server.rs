//! API server — HTTP REST surface over the sequence engine plus the
//! Prometheus metrics exporter.

use std::net::SocketAddr;
use std::time::Instant;

use axum::routing::{get, post, put};
use axum::Router;
use outreach_core::config::AppConfig;
use outreach_sequences::SequenceEngine;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::rest::{self, AppState};

pub struct ApiServer {
    config: AppConfig,
    engine: SequenceEngine,
}

/// Builds the REST router with its middleware stack.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Sequences
        .route(
            "/v1/sequences",
            get(rest::list_sequences).post(rest::create_sequence),
        )
        .route(
            "/v1/sequences/:id",
            get(rest::get_sequence).delete(rest::delete_sequence),
        )
        .route("/v1/sequences/:id/status", put(rest::set_sequence_status))
        .route("/v1/sequences/:id/settings", put(rest::update_settings))
        .route("/v1/sequences/:id/steps", post(rest::add_step))
        .route(
            "/v1/sequences/:id/steps/:step_id",
            put(rest::update_step).delete(rest::remove_step),
        )
        .route("/v1/sequences/:id/step-order", put(rest::reorder_steps))
        .route("/v1/sequences/:id/analytics", get(rest::sequence_analytics))
        // Enrollments
        .route(
            "/v1/sequences/:id/enrollments",
            get(rest::list_enrollments).post(rest::enroll_lead),
        )
        .route("/v1/enrollments/:id", get(rest::get_enrollment))
        .route("/v1/enrollments/:id/reply", post(rest::handle_reply))
        .route("/v1/enrollments/:id/meeting", post(rest::handle_meeting_booked))
        .route("/v1/enrollments/:id/pause", post(rest::pause_enrollment))
        .route("/v1/enrollments/:id/resume", post(rest::resume_enrollment))
        .route("/v1/enrollments/:id/executions", get(rest::list_executions))
        // Executions and provider callbacks
        .route("/v1/executions/:id", get(rest::get_execution))
        .route("/v1/executions/:id/complete", post(rest::complete_execution))
        .route("/v1/events", post(rest::handle_event))
        // Operational endpoints
        .route("/health", get(rest::health_check))
        .route("/ready", get(rest::readiness))
        .route("/live", get(rest::liveness))
        // Middleware
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

impl ApiServer {
    pub fn new(config: AppConfig, engine: SequenceEngine) -> Self {
        Self { config, engine }
    }

    pub fn router(&self) -> Router {
        router(AppState {
            engine: self.engine.clone(),
            node_id: self.config.node_id.clone(),
            start_time: Instant::now(),
        })
    }

    /// Start the HTTP REST server.
    pub async fn start_http(&self) -> anyhow::Result<()> {
        let app = self.router();
        let addr = SocketAddr::new(self.config.api.host.parse()?, self.config.api.http_port);

        info!(addr = %addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }

    /// Start the metrics exporter on a separate port.
    pub async fn start_metrics(&self) -> anyhow::Result<()> {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(SocketAddr::new(
                self.config.api.host.parse()?,
                self.config.metrics.port,
            ))
            .install()?;

        info!(port = self.config.metrics.port, "Metrics exporter started");
        Ok(())
    }
}
