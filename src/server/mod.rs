//! HTTP surface: `POST /convert` and `GET /health`.
//!
//! Shutdown drains the renderer pool before the listener stops, so
//! in-flight conversions finish and their renderers are closed cleanly.

pub mod dispatch;

use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::Result;
use crate::pipeline::RenderPipeline;

pub use dispatch::{ConvertRequest, DispatchError, ErrorBody, HealthBody, MISSING_INPUT};

pub const DEFAULT_BODY_LIMIT: usize = 10 * 1024 * 1024;
pub const DEFAULT_DRAIN_GRACE: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct AppState {
    pipeline: RenderPipeline,
}

#[derive(Debug, Clone)]
pub struct ServeOptions {
    pub body_limit: usize,
    /// How long shutdown waits for in-flight jobs before force-closing renderers.
    pub drain_grace: Duration,
}

impl Default for ServeOptions {
    fn default() -> Self {
        Self {
            body_limit: DEFAULT_BODY_LIMIT,
            drain_grace: DEFAULT_DRAIN_GRACE,
        }
    }
}

pub fn router(pipeline: RenderPipeline, body_limit: usize) -> Router {
    Router::new()
        .route("/convert", post(dispatch::convert))
        .route("/health", get(dispatch::health))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(AppState { pipeline })
}

/// Serves until a termination signal arrives or `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    pipeline: RenderPipeline,
    options: ServeOptions,
    shutdown: CancellationToken,
) -> Result<()> {
    let pool = pipeline.pool().clone();
    let app = router(pipeline, options.body_limit);
    let addr = listener.local_addr()?;
    info!(%addr, "listening");

    let grace = options.drain_grace;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal(shutdown).await;
            info!(grace_ms = grace.as_millis() as u64, "draining renderer pool");
            pool.drain(Some(grace)).await;
        })
        .await?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl-C"),
        _ = terminate => info!("received SIGTERM"),
        _ = token.cancelled() => info!("shutdown requested"),
    }
}
