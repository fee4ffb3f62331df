//! CourseDesk API Gateway binary

use coursedesk_common::{
    backend::{BackendApi, BackendClient},
    config::{AppConfig, ObservabilityConfig},
    db::{DbPool, Repository},
    enrollment::EnrollmentStore,
    lockout::{LoginThrottle, RedisAttemptStore},
    metrics,
};
use coursedesk_gateway::{create_router, AppState};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::{signal, sync::Notify};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Arc::new(AppConfig::load()?);
    init_tracing(&config.observability);

    info!("Starting CourseDesk API Gateway v{}", coursedesk_common::VERSION);

    // Metrics
    if config.observability.metrics_port != 0 {
        PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], config.observability.metrics_port))
            .set_buckets(metrics::LATENCY_BUCKETS)?
            .install()?;
        info!(port = config.observability.metrics_port, "Prometheus exporter listening");
    }
    metrics::register_metrics();

    // Relational store (optional)
    let store: Option<Arc<dyn EnrollmentStore>> = match &config.database.url {
        Some(url) => {
            let pool = DbPool::connect(url, &config.database).await?;
            if config.database.run_migrations {
                pool.migrate().await?;
            }
            let repository: Arc<dyn EnrollmentStore> = Arc::new(Repository::new(pool));
            Some(repository)
        }
        None => {
            warn!("No database configured; enrollments depend on the backend relation endpoint");
            None
        }
    };

    let backend: Arc<dyn BackendApi> = Arc::new(BackendClient::new(&config.backend)?);
    info!(
        base_url = %config.backend.base_url,
        enrollment_mode = ?config.backend.enrollment_endpoint.mode,
        "Backend client ready"
    );

    // Lockout counters
    let throttle = match &config.redis.url {
        Some(url) => match RedisAttemptStore::connect(url, &config.redis).await {
            Ok(attempts) => LoginThrottle::new(Arc::new(attempts), &config.lockout),
            Err(e) => {
                warn!(error = %e, "Redis unavailable; lockout counters kept in memory");
                LoginThrottle::in_memory(&config.lockout)
            }
        },
        None => LoginThrottle::in_memory(&config.lockout),
    };

    let state = AppState::new(config.clone(), backend, store, throttle);
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on {}", addr);

    let shutdown = Arc::new(Notify::new());
    let server = axum::serve(listener, app).with_graceful_shutdown({
        let shutdown = shutdown.clone();
        async move { shutdown.notified().await }
    });
    let mut server = tokio::spawn(server.into_future());

    tokio::select! {
        result = &mut server => {
            result??;
            return Ok(());
        }
        _ = shutdown_signal() => {}
    }

    shutdown.notify_one();
    match tokio::time::timeout(config.shutdown_timeout(), server).await {
        Ok(result) => result??,
        Err(_) => warn!("In-flight requests did not finish before the shutdown timeout"),
    }

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if config.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
