//! API server entry point.

use std::time::Duration;

use api::config::{Config, LogFormat};
use domain::PromotionHandle;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// How long shutdown waits for queued promotions.
const PROMOTION_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Serves `app` until a shutdown signal, then lets the promotion worker drain.
async fn serve(app: axum::Router, addr: String, promotions: PromotionHandle) {
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // The router (and with it the last promotion sender) is gone by now.
    if tokio::time::timeout(PROMOTION_DRAIN_TIMEOUT, promotions.join())
        .await
        .is_err()
    {
        tracing::warn!("promotion worker did not drain before timeout");
    }

    tracing::info!("server shut down gracefully");
}

#[tokio::main]
async fn main() {
    // 1. Load configuration and initialize tracing
    let config = Config::from_env();
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let prometheus_builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    let metrics_handle = prometheus_builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Create stores and application state, then serve
    let engine = config.engine_config();
    tracing::info!(?engine, "engine configuration");

    match &config.database_url {
        Some(url) => {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(config.db_max_connections)
                .connect(url)
                .await
                .expect("failed to connect to database");
            registration_store::run_migrations(&pool)
                .await
                .expect("failed to run migrations");

            let (state, promotions) = api::create_postgres_state(pool, engine);
            let app = api::create_app(state, metrics_handle);
            serve(app, config.addr(), promotions).await;
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory stores");
            let (state, promotions) = api::create_in_memory_state(engine);
            let app = api::create_app(state, metrics_handle);
            serve(app, config.addr(), promotions).await;
        }
    }
}
