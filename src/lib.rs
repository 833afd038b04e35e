//! printd Library
//!
//! Converts HTML markup or a remote page into PDF using a bounded pool of
//! headless Chromium renderers, and exposes that as an HTTP service.
//!
//! # Module Overview
//!
//! - [`browser`] - Renderer traits, the Chromium renderer and a mock
//! - [`pool`] - Bounded renderer pool with a FIFO wait queue
//! - [`pipeline`] - The ordered steps that turn a job into output
//! - [`server`] - `POST /convert` and `GET /health`
//! - [`config`] - TOML, environment and default settings
//! - [`telemetry`] - Tracing subscriber setup
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use printd_lib::{ChromeFactory, ChromeOptions, PoolConfig, RenderOptions, RenderPipeline, RendererPool};
//!
//! # async fn example() -> printd_lib::Result<()> {
//! let factory = Arc::new(ChromeFactory::new(ChromeOptions::default()));
//! let pool = RendererPool::new(PoolConfig::default(), factory);
//! pool.init().await?;
//!
//! let pipeline = RenderPipeline::new(pool.clone());
//! let pdf = pipeline.html_to_pdf("<h1>Invoice</h1>", &RenderOptions::default()).await?;
//! assert!(pdf.starts_with(b"%PDF-"));
//!
//! pool.drain(None).await;
//! # Ok(())
//! # }
//! ```

pub mod browser;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod pool;
pub mod server;
pub mod telemetry;
pub mod viewport;

pub use browser::{
    BrowserError, BrowsingContext, ChromeFactory, ChromeOptions, MockFactory, RendererFactory,
    RendererProcess,
};
pub use config::{Config, LogFormat, LoggingConfig};
pub use error::{ErrorCategory, ErrorPayload, PrintdError, Result};
pub use pipeline::{
    PaperFormat, PdfOptions, RenderJob, RenderOptions, RenderOutput, RenderPipeline,
};
pub use pool::{Lease, PoolConfig, PoolStats, RendererPool};
pub use viewport::Viewport;
