//! Business Central token worker
//!
//! Single-binary service that:
//! 1. Loads the OAuth2 client configuration and the shared token store
//! 2. Runs the token refresh scheduler so the shared token never goes stale
//! 3. Serves `/health` (scheduler state) and `/metrics` (Prometheus)
//!
//! Exits non-zero if the scheduler exhausts its retries.

mod config;
mod metrics;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use bc_auth::{AuthStrategy, FileTokenStore, MemoryTokenStore, TokenStore};
use bc_refresh::{JOB_NAME, RefreshState, TokenRefreshScheduler};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, TokenStoreConfig};

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    scheduler: watch::Receiver<RefreshState>,
    started_at: Instant,
    prometheus: PrometheusHandle,
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting bc-token-worker");

    let prometheus_handle = metrics::install_recorder();

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

    let store: Arc<dyn TokenStore> = match &config.token_store {
        TokenStoreConfig::Memory => Arc::new(MemoryTokenStore::new()),
        TokenStoreConfig::File { path } => Arc::new(
            FileTokenStore::load(path.clone())
                .await
                .with_context(|| format!("failed to open token store {}", path.display()))?,
        ),
    };

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.server.timeout_secs))
        .build()
        .context("failed to build HTTP client")?;

    let strategy = AuthStrategy::from_config(config.auth.clone(), http, store)
        .context("invalid auth configuration")?;
    let client = strategy
        .oauth2()
        .cloned()
        .context("token worker requires an oauth2 strategy")?;

    info!(
        listen_addr = %config.server.listen_addr,
        client_id = %client.config().client_id,
        job = JOB_NAME,
        "configuration loaded"
    );

    let handle = TokenRefreshScheduler::new(client)
        .with_policy(config.refresh)
        .start()
        .await
        .context("failed to start token refresh scheduler")?;

    // Keep the health gauge in step with scheduler transitions
    let mut gauge_states = handle.subscribe();
    tokio::spawn(async move {
        loop {
            metrics::record_scheduler_state(&gauge_states.borrow_and_update());
            if gauge_states.changed().await.is_err() {
                break;
            }
        }
    });

    let app = build_router(AppState {
        scheduler: handle.subscribe(),
        started_at: Instant::now(),
        prometheus: prometheus_handle,
    });

    let listener = TcpListener::bind(config.server.listen_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.server.listen_addr))?;
    info!(addr = %config.server.listen_addr, "listening");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    let mut states = handle.subscribe();
    tokio::select! {
        _ = shutdown_signal() => {}
        _ = states.wait_for(RefreshState::is_failed) => {}
    }

    handle.stop();
    let outcome = handle.join().await;

    let _ = shutdown_tx.send(());
    match server_handle.await {
        Ok(Ok(())) => info!("server stopped"),
        Ok(Err(e)) => error!(error = %e, "server error during shutdown"),
        Err(e) => error!(error = %e, "server task panicked"),
    }

    if let Err(e) = outcome {
        error!(error = %e, "token refresh scheduler failed");
        std::process::exit(1);
    }

    info!("shutdown complete");
    Ok(())
}

/// Health check: scheduler state and uptime.
///
/// 503 once the scheduler has given up, so orchestrators restart the worker.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let scheduler = state.scheduler.borrow().clone();
    let uptime = state.started_at.elapsed().as_secs();

    let mut body = serde_json::json!({
        "status": if scheduler.is_failed() { "unhealthy" } else { "healthy" },
        "scheduler": scheduler.label(),
        "job": JOB_NAME,
        "uptime_seconds": uptime,
    });
    match &scheduler {
        RefreshState::Scheduled { delay } | RefreshState::RetryScheduled { delay, .. } => {
            body["next_fire_in_seconds"] = delay.as_secs().into();
        }
        RefreshState::Idle {
            last_error: Some(e),
        } => {
            body["last_error"] = e.clone().into();
        }
        _ => {}
    }

    let status = if scheduler.is_failed() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (status, axum::Json(body))
}

/// Prometheus metrics endpoint.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
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
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_prometheus_handle() -> PrometheusHandle {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        recorder.handle()
    }

    fn app_with_state(state: RefreshState) -> (Router, watch::Sender<RefreshState>) {
        let (tx, rx) = watch::channel(state);
        let app = build_router(AppState {
            scheduler: rx,
            started_at: Instant::now(),
            prometheus: test_prometheus_handle(),
        });
        (app, tx)
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn health_reports_scheduled_state() {
        let (app, _tx) = app_with_state(RefreshState::Scheduled {
            delay: Duration::from_secs(3589),
        });
        let (status, body) = get_json(app, "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["scheduler"], "scheduled");
        assert_eq!(body["job"], "oauth2-access-token-generation");
        assert_eq!(body["next_fire_in_seconds"], 3589);
    }

    #[tokio::test]
    async fn health_is_unavailable_after_scheduler_gives_up() {
        let (app, _tx) = app_with_state(RefreshState::Idle {
            last_error: Some("token endpoint returned 503".into()),
        });
        let (status, body) = get_json(app, "/health").await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "unhealthy");
        assert_eq!(body["last_error"], "token endpoint returned 503");
    }

    #[tokio::test]
    async fn health_follows_state_changes() {
        let (app, tx) = app_with_state(RefreshState::default());
        tx.send_replace(RefreshState::Firing { attempt: 2 });
        let (_, body) = get_json(app, "/health").await;
        assert_eq!(body["scheduler"], "firing");
    }

    #[tokio::test]
    async fn metrics_endpoint_serves_prometheus_text() {
        let (app, _tx) = app_with_state(RefreshState::default());
        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "text/plain; version=0.0.4; charset=utf-8"
        );
    }
}
