//! Cookie Broker
//!
//! Single-binary service that:
//! 1. Loads the credential store (one JSON file per platform)
//! 2. Accepts jobs on the trigger-job webhook and queues them per platform
//! 3. Leases the least recently used session to each job, waiting as long as needed
//! 4. Hands job plus session to the processor and takes releases back on the release webhook

mod admin;
mod config;
mod dispatch;
mod error;
mod metrics;
mod webhook;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use lease_pool::{Pool, RetryPolicy, Scheduler};
use metrics_exporter_prometheus::PrometheusHandle;
use session_store::CredentialStore;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::admin::{AdminState, build_admin_router};
use crate::config::Config;
use crate::dispatch::HttpDispatcher;
use crate::webhook::{WebhookState, build_webhook_router};

/// Time allowed for in-flight requests after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Build the public router: webhooks plus metrics.
///
/// Applies a concurrency limit layer based on `max_connections`.
fn build_router(
    webhook: WebhookState,
    prometheus: PrometheusHandle,
    max_connections: usize,
) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(prometheus)
        .merge(build_webhook_router(webhook))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting cookie-broker");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle =
        metrics::install_recorder().context("failed to install Prometheus recorder")?;

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        admin_addr = %config.server.admin_addr,
        data_dir = %config.pool.data_dir.display(),
        categories = ?config.pool.categories,
        processor_url = %config.dispatch.processor_url,
        "configuration loaded"
    );

    let store = CredentialStore::load(config.pool.data_dir.clone())
        .await
        .with_context(|| {
            format!(
                "failed to load credential store from {}",
                config.pool.data_dir.display()
            )
        })?;
    let pool = Arc::new(Pool::new(Arc::new(store)).with_ban_threshold(config.pool.ban_threshold));

    let stuck = pool
        .list()
        .await
        .into_iter()
        .filter(|c| c.leased)
        .count();
    if stuck > 0 {
        // No lease expiry: these stay out until their release arrives
        warn!(leased = stuck, "credentials still leased from a previous run");
    }

    let gauge_handle = lease_pool::spawn_gauge_task(pool.clone(), config.pool.report_interval());

    let dispatcher =
        HttpDispatcher::from_config(&config.dispatch).context("failed to build HTTP client")?;
    let scheduler = Arc::new(Scheduler::spawn(
        pool.clone(),
        Arc::new(dispatcher),
        &config.pool.categories,
        RetryPolicy {
            interval: config.pool.retry_interval(),
        },
    ));

    let app = build_router(
        WebhookState {
            pool: pool.clone(),
            scheduler: scheduler.clone(),
        },
        prometheus_handle,
        config.server.max_connections,
    );
    let admin_app = build_admin_router(AdminState::new(pool.clone()));

    let listener = TcpListener::bind(config.server.listen_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.server.listen_addr))?;
    let admin_listener = TcpListener::bind(config.server.admin_addr)
        .await
        .with_context(|| format!("failed to bind admin API to {}", config.server.admin_addr))?;

    info!(
        addr = %config.server.listen_addr,
        admin_addr = %config.server.admin_addr,
        "accepting requests"
    );

    // Both listeners drain on the same signal. The drain timeout starts when
    // the signal fires, not when the servers start.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let (admin_shutdown_tx, admin_shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });
    let admin_handle = tokio::spawn(async move {
        axum::serve(admin_listener, admin_app)
            .with_graceful_shutdown(async {
                let _ = admin_shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());
    let _ = admin_shutdown_tx.send(());

    let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
        (server_handle.await, admin_handle.await)
    })
    .await;
    match drained {
        Ok((public, admin)) => {
            for (name, result) in [("public", public), ("admin", admin)] {
                match result {
                    Ok(Ok(())) => info!(listener = name, "listener drained"),
                    Ok(Err(e)) => error!(listener = name, error = %e, "server error during shutdown"),
                    Err(e) => error!(listener = name, error = %e, "server task panicked"),
                }
            }
        }
        Err(_) => {
            warn!(
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    // Queued jobs are volatile; callers resubmit through trigger-job
    scheduler.shutdown();
    gauge_handle.abort();

    info!("shutdown complete");
    Ok(())
}

/// Prometheus metrics endpoint in text exposition format.
async fn metrics_handler(State(prometheus): State<PrometheusHandle>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        prometheus.render(),
    )
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use lease_pool::{Dispatcher, Job, Lease, Outcome};
    use std::future::Future;
    use std::pin::Pin;
    use tower::ServiceExt;

    /// Dispatcher that does nothing; these tests drive releases by hand.
    struct Noop;

    impl Dispatcher for Noop {
        fn dispatch<'a>(
            &'a self,
            _job: &'a Job,
            _lease: &'a Lease,
        ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
            Box::pin(async {})
        }
    }

    fn test_prometheus() -> (
        metrics_exporter_prometheus::PrometheusRecorder,
        PrometheusHandle,
    ) {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        (recorder, handle)
    }

    async fn test_app(prometheus: PrometheusHandle, max_connections: usize) -> (Router, Arc<Pool>) {
        let pool = Arc::new(Pool::new(Arc::new(CredentialStore::in_memory())));
        let scheduler = Scheduler::spawn(
            pool.clone(),
            Arc::new(Noop),
            &["instagram".to_string()],
            RetryPolicy::default(),
        );
        let app = build_router(
            WebhookState {
                pool: pool.clone(),
                scheduler: Arc::new(scheduler),
            },
            prometheus,
            max_connections,
        );
        (app, pool)
    }

    #[tokio::test]
    async fn metrics_endpoint_renders_exposition_format() {
        let (recorder, handle) = test_prometheus();
        let _guard = ::metrics::set_default_local_recorder(&recorder);
        let (app, pool) = test_app(handle, 100).await;

        pool.register("1", "instagram", "u", vec![]).await.unwrap();
        pool.activate("1", None).await.unwrap();
        pool.acquire("instagram").await.unwrap().unwrap();
        pool.release("1", Outcome::Success).await.unwrap();

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["content-type"].to_str().unwrap(),
            "text/plain; version=0.0.4; charset=utf-8"
        );

        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("leases_acquired_total"));
        assert!(text.contains("credentials_released_total"));
    }

    #[tokio::test]
    async fn public_router_serves_webhooks_but_not_admin() {
        let (_recorder, handle) = test_prometheus();
        let (app, _pool) = test_app(handle, 100).await;

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/webhook/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/admin/credentials")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn concurrency_limited_router_still_serves() {
        let (_recorder, handle) = test_prometheus();
        let (app, _pool) = test_app(handle, 1).await;

        for _ in 0..3 {
            let response = app
                .clone()
                .oneshot(
                    Request::builder()
                        .uri("/webhook/health")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }
}
