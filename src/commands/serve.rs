use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use printd_lib::server;
use printd_lib::{telemetry, ChromeFactory, PrintdError, RenderPipeline, RendererPool};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::cli::ServeArgs;
use crate::formatting::render_error;
use crate::settings::{apply_serve_overrides, apply_verbosity, load_config};

/// Run the HTTP service until SIGINT/SIGTERM, then drain the pool.
pub async fn run_serve(config_path: Option<PathBuf>, verbose: bool, args: ServeArgs) -> ExitCode {
    let (mut config, source) = match load_config(config_path.as_deref()) {
        Ok(loaded) => loaded,
        Err(err) => return render_error(err),
    };
    apply_verbosity(&mut config, verbose);
    apply_serve_overrides(&mut config, &args);
    if let Err(err) = config.validate() {
        return render_error(err);
    }
    if let Err(err) = telemetry::init(&config.logging) {
        return render_error(err);
    }
    info!("{}", config.summary(source.as_deref()));

    let factory = Arc::new(ChromeFactory::new(config.chrome_options()));
    let pool = RendererPool::new(config.pool_config(), factory);
    if let Err(err) = pool.init().await {
        error!(error = %err, "renderer pool failed to start");
        return render_error(err);
    }

    let addr = config.bind_addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err) => {
            pool.drain(None).await;
            return render_error(PrintdError::config(format!("failed to bind {addr}: {err}")));
        }
    };

    let pipeline = RenderPipeline::new(pool.clone());
    let result = server::serve(
        listener,
        pipeline,
        config.serve_options(),
        CancellationToken::new(),
    )
    .await;

    // A server error can skip the graceful path; drain is idempotent.
    pool.drain(Some(config.pool.drain_grace)).await;

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => render_error(err),
    }
}
