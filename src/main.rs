use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use epstats::server::collaborator::NullDataCollaborator;

/// Startup configuration read once from the environment (SPEC_FULL §10.3).
/// Mirrors clarium's own `CLARIUM_*` env-var convention in shape, under this
/// service's `EPSTATS_*` prefix.
struct Config {
    http_port: u16,
    worker_pool_size: usize,
    default_confidence_level: f64,
}

impl Config {
    fn from_env() -> Self {
        let http_port = std::env::var("EPSTATS_HTTP_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(8080);
        let worker_pool_size =
            std::env::var("EPSTATS_WORKER_POOL_SIZE").ok().and_then(|v| v.parse().ok()).unwrap_or(5);
        let default_confidence_level = std::env::var("EPSTATS_DEFAULT_CONFIDENCE_LEVEL")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(epstats::stats::DEFAULT_CONFIDENCE_LEVEL);
        Config { http_port, worker_pool_size, default_confidence_level }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info")).unwrap();
    fmt().with_env_filter(filter).init();

    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    let config = Config::from_env();
    info!(
        target: "epstats",
        "epstats starting: RUST_LOG='{}', http_port={}, worker_pool_size={}, default_confidence_level={}",
        rust_log, config.http_port, config.worker_pool_size, config.default_confidence_level
    );

    // Force the process-wide metric registry to initialize before the first request.
    once_cell::sync::Lazy::force(&epstats::metrics_registry::METRICS);

    let collaborator = Arc::new(NullDataCollaborator);
    epstats::server::run(
        config.http_port,
        config.worker_pool_size,
        collaborator,
        config.default_confidence_level,
    )
    .await
}
