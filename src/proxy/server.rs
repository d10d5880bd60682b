//! Relay server setup: router, shared-port listener, graceful shutdown

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    http::header,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tokio::net::{TcpListener, TcpSocket};

use crate::config::Config;
use crate::storage::DailyLog;

use super::handlers;
use super::state::RelayState;
use super::upstream::UpstreamClient;

/// Where the browser helper is served when `serve_client` is on
pub const CLIENT_ASSET_PATH: &str = "/relay-client.js";

const CLIENT_ASSET: &str = include_str!("../../assets/relay-client.js");

/// Build the router for one worker
pub fn build_router(config: &Config, state: RelayState) -> Router {
    let chat = post(handlers::chat_completion);

    let mut router = Router::new().route("/health", get(health));

    router = if config.route_prefix == "/" {
        router.route("/", chat)
    } else {
        // Accept the prefix with and without a trailing slash
        router
            .route(&config.route_prefix, chat.clone())
            .route(&format!("{}/", config.route_prefix), chat)
    };

    if config.serve_client {
        router = router.route(CLIENT_ASSET_PATH, get(client_asset));
    }

    router
        .layer(DefaultBodyLimit::max(config.body_limit_bytes))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "pid": std::process::id(),
    }))
}

async fn client_asset() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/javascript; charset=utf-8")],
        CLIENT_ASSET,
    )
}

/// Run one relay server until `shutdown` resolves
pub async fn start_relay<F>(config: Config, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let daily_log = Arc::new(DailyLog::new(&config.log_dir)?);
    tracing::debug!("Chat logs in {}", daily_log.dir().display());
    let upstream = UpstreamClient::new(&config.upstream)?;
    tracing::debug!(
        "Relaying to {} (model {})",
        upstream.url(),
        config.upstream.model
    );

    let state = RelayState::new(upstream, daily_log, config.upstream.api_key.clone());
    let app = build_router(&config, state);

    let listener = bind_shared(config.bind_addr)
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    tracing::info!(
        "Worker {} listening on {}, in {} mode",
        std::process::id(),
        config.bind_addr,
        config.environment
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server error")?;

    tracing::info!("Worker {} shut down gracefully", std::process::id());
    Ok(())
}

/// Bind a listener that other worker processes can bind too.
///
/// SO_REUSEPORT lets the kernel spread connections across workers; where it
/// is unavailable only one process can hold the port.
fn bind_shared(addr: SocketAddr) -> Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .context("Failed to create socket")?;

    socket.set_reuseaddr(true)?;
    #[cfg(all(unix, not(target_os = "solaris"), not(target_os = "illumos")))]
    socket.set_reuseport(true)?;

    socket.bind(addr)?;
    Ok(socket.listen(1024)?)
}

/// Resolves on Ctrl+C, or SIGTERM on Unix
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
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
}
