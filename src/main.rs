use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

mod api;
mod auth;
mod cache;
mod config;
mod context;
mod errors;
mod logging;
mod metrics;
mod models;
mod monitoring;
mod rate_limit;
mod services;

use crate::config::AppConfig;
use crate::metrics::MetricsRegistry;
use crate::monitoring::{ModelMonitor, MonitorConfig};
use crate::rate_limit::RateLimiter;
use crate::services::analyzer::{Analyzer, LlmClient, VectorSearchClient};
use crate::services::tracker::Tracker;

pub struct AppState {
    pub config: AppConfig,
    pub monitor: Arc<ModelMonitor>,
    pub rate_limiter: Arc<RateLimiter>,
    pub metrics: MetricsRegistry,
    pub tracker: Arc<Tracker>,
    pub analyzer: Analyzer,
}

impl AppState {
    pub fn new(config: AppConfig, metrics: MetricsRegistry) -> anyhow::Result<Self> {
        let monitor = Arc::new(ModelMonitor::new(MonitorConfig::from(&config.monitoring)));
        monitor.set_reference_distribution(&config.monitoring.reference_labels);

        let rate_limiter = Arc::new(RateLimiter::from_settings(config.rate_limit.clone())?);
        let tracker = Arc::new(Tracker::new(&config.tracking)?);

        let llm = LlmClient::new(&config.llm)?;
        let search = VectorSearchClient::new(
            &config.vector_search,
            Duration::from_secs(config.llm.timeout_secs),
        )?;
        let analyzer = Analyzer::new(llm, search, monitor.clone(), tracker.clone());

        Ok(Self {
            config,
            monitor,
            rate_limiter,
            metrics,
            tracker,
            analyzer,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    dotenvy::dotenv().ok();
    let config = AppConfig::load()?;

    let _logging_guard = logging::init_logging(&config.logging)?;

    tracing::info!("Starting {} v{}", config.server.project_name, env!("CARGO_PKG_VERSION"));
    tracing::info!("Environment: {}", config.server.environment);

    let metrics = MetricsRegistry::install()?;
    tracing::info!("Prometheus recorder installed");

    let state = Arc::new(AppState::new(config.clone(), metrics)?);
    tracing::info!(
        "Rate limiter initialized (backend: {}, window: {}s)",
        state.rate_limiter.backend(),
        config.rate_limit.window_seconds
    );
    if state.tracker.is_enabled() {
        tracing::info!("Prediction tracking enabled (model version: {})", state.tracker.model_version());
    } else {
        tracing::warn!("Prediction tracking disabled - no tracking backend configured");
    }

    let app = api::routes::create_app(state);

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
