//! Rendering jobs: HTML or a URL in, PDF bytes or captured markup out.
//!
//! Every job borrows one renderer from the pool, works inside a fresh
//! browsing context and always settles the lease, releasing healthy
//! renderers and destroying ones that failed fatally.

mod options;

pub use options::{
    parse_length_inches, sanitize_filename, CssLength, Margin, MarginOptions, PaperFormat,
    PdfOptions, RenderOptions, ResolvedOptions, DEFAULT_FILENAME, DEFAULT_LOAD_TIMEOUT,
    DEFAULT_MARGIN, DEFAULT_SELECTOR_TIMEOUT,
};

use std::time::Instant;

use tracing::{debug, info, warn};
use url::Url;

use crate::browser::{BrowserResult, BrowsingContext};
use crate::error::{PrintdError, Result};
use crate::pool::RendererPool;

#[derive(Debug, Clone)]
pub enum RenderJob {
    HtmlToPdf { html: String, options: RenderOptions },
    UrlToPdf { url: String, options: RenderOptions },
    FetchHtml { url: String, options: RenderOptions },
}

impl RenderJob {
    pub fn kind(&self) -> &'static str {
        match self {
            RenderJob::HtmlToPdf { .. } => "html_to_pdf",
            RenderJob::UrlToPdf { .. } => "url_to_pdf",
            RenderJob::FetchHtml { .. } => "fetch_html",
        }
    }

    pub fn options(&self) -> &RenderOptions {
        match self {
            RenderJob::HtmlToPdf { options, .. }
            | RenderJob::UrlToPdf { options, .. }
            | RenderJob::FetchHtml { options, .. } => options,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutput {
    Pdf(Vec<u8>),
    Markup(String),
}

#[derive(Debug, Clone)]
pub struct RenderPipeline {
    pool: RendererPool,
}

impl RenderPipeline {
    pub fn new(pool: RendererPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &RendererPool {
        &self.pool
    }

    pub async fn html_to_pdf(&self, html: &str, options: &RenderOptions) -> Result<Vec<u8>> {
        let job = RenderJob::HtmlToPdf {
            html: html.to_string(),
            options: options.clone(),
        };
        match self.run(job).await? {
            RenderOutput::Pdf(bytes) => Ok(bytes),
            RenderOutput::Markup(_) => Err(PrintdError::render("renderer returned markup")),
        }
    }

    pub async fn url_to_pdf(&self, url: &str, options: &RenderOptions) -> Result<Vec<u8>> {
        let job = RenderJob::UrlToPdf {
            url: url.to_string(),
            options: options.clone(),
        };
        match self.run(job).await? {
            RenderOutput::Pdf(bytes) => Ok(bytes),
            RenderOutput::Markup(_) => Err(PrintdError::render("renderer returned markup")),
        }
    }

    /// Loads `url` and returns the serialized document after scripts ran.
    pub async fn fetch_html(&self, url: &str, options: &RenderOptions) -> Result<String> {
        let job = RenderJob::FetchHtml {
            url: url.to_string(),
            options: options.clone(),
        };
        match self.run(job).await? {
            RenderOutput::Markup(markup) => Ok(markup),
            RenderOutput::Pdf(_) => Err(PrintdError::render("renderer returned a PDF")),
        }
    }

    pub async fn run(&self, job: RenderJob) -> Result<RenderOutput> {
        let resolved = job.options().resolve()?;
        if let RenderJob::UrlToPdf { url, .. } | RenderJob::FetchHtml { url, .. } = &job {
            check_address(url)?;
        }

        let started = Instant::now();
        let lease = self.pool.acquire().await?;
        let renderer = lease.id();

        let context = match lease.process().open_context().await {
            Ok(context) => context,
            Err(err) => {
                warn!(renderer, error = %err, "failed to open browsing context");
                if err.is_fatal() {
                    self.pool.destroy(lease).await;
                } else {
                    self.pool.release(lease);
                }
                return Err(PrintdError::render(err.to_string()));
            }
        };

        let mut steps = JobSteps {
            context,
            resolved: &resolved,
            broken: false,
        };
        let outcome = steps.execute(&job).await;

        let JobSteps {
            context,
            mut broken,
            ..
        } = steps;
        if let Err(err) = context.close().await {
            warn!(renderer, error = %err, "failed to close browsing context");
            broken |= err.is_fatal();
        }

        if broken {
            self.pool.destroy(lease).await;
        } else {
            self.pool.release(lease);
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            Ok(_) => info!(kind = job.kind(), renderer, elapsed_ms, "render job finished"),
            Err(err) => warn!(
                kind = job.kind(),
                renderer,
                elapsed_ms,
                error = %err,
                "render job failed"
            ),
        }
        outcome
    }
}

/// Only absolute http(s) addresses are loaded.
fn check_address(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim()).map_err(|e| PrintdError::fetch(raw, e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(PrintdError::fetch(
            raw,
            format!("unsupported scheme '{other}'; only http and https are allowed"),
        )),
    }
}

/// One job's walk through its browsing context. Records whether any
/// renderer failure was fatal so the lease can be settled correctly.
struct JobSteps<'a> {
    context: Box<dyn BrowsingContext>,
    resolved: &'a ResolvedOptions,
    broken: bool,
}

impl JobSteps<'_> {
    fn note<T>(&mut self, result: BrowserResult<T>) -> BrowserResult<T> {
        if let Err(err) = &result {
            self.broken |= err.is_fatal();
        }
        result
    }

    async fn execute(&mut self, job: &RenderJob) -> Result<RenderOutput> {
        let viewport = self.resolved.viewport;
        let result = self.context.set_viewport(viewport).await;
        self.note(result)
            .map_err(|e| PrintdError::render(e.to_string()))?;

        match job {
            RenderJob::HtmlToPdf { html, .. } => {
                self.load_markup(html).await?;
                self.finish_pdf().await.map(RenderOutput::Pdf)
            }
            RenderJob::UrlToPdf { url, .. } => {
                let markup = self.capture(url).await?;
                self.load_markup(&markup).await?;
                self.finish_pdf().await.map(RenderOutput::Pdf)
            }
            RenderJob::FetchHtml { url, .. } => self.capture(url).await.map(RenderOutput::Markup),
        }
    }

    async fn load_markup(&mut self, html: &str) -> Result<()> {
        let limit = self.resolved.load_timeout;
        match tokio::time::timeout(limit, self.context.set_content(html)).await {
            Ok(result) => self
                .note(result)
                .map_err(|e| PrintdError::Load(e.to_string())),
            Err(_) => Err(PrintdError::LoadTimeout(limit)),
        }
    }

    /// Navigates to `url` and returns the document markup.
    async fn capture(&mut self, url: &str) -> Result<String> {
        let limit = self.resolved.load_timeout;
        match tokio::time::timeout(limit, self.context.navigate(url)).await {
            Ok(result) => {
                self.note(result)
                    .map_err(|e| PrintdError::fetch(url, e.to_string()))?;
            }
            Err(_) => {
                return Err(PrintdError::fetch(
                    url,
                    format!("Navigation timeout of {} ms exceeded", limit.as_millis()),
                ))
            }
        }
        let result = self.context.content().await;
        self.note(result)
            .map_err(|e| PrintdError::fetch(url, e.to_string()))
    }

    async fn finish_pdf(&mut self) -> Result<Vec<u8>> {
        let resolved = self.resolved;

        if let Some(css) = &resolved.css {
            let result = self.context.add_style(css).await;
            self.note(result)
                .map_err(|e| PrintdError::render(e.to_string()))?;
        }

        if let Some(selector) = &resolved.wait_for_selector {
            self.wait_for_selector(selector).await;
        }

        if !resolved.delay.is_zero() {
            debug!(delay_ms = resolved.delay.as_millis() as u64, "delaying before print");
            tokio::time::sleep(resolved.delay).await;
        }

        let result = self.context.print_pdf(&resolved.pdf).await;
        self.note(result)
            .map_err(|e| PrintdError::render(e.to_string()))
    }

    /// Best effort: a missing selector is logged and rendering continues.
    async fn wait_for_selector(&mut self, selector: &str) {
        let limit = self.resolved.selector_timeout;
        match tokio::time::timeout(limit, self.context.wait_for_selector(selector)).await {
            Ok(Ok(())) => debug!(selector, "readiness selector found"),
            Ok(Err(err)) => {
                self.broken |= err.is_fatal();
                warn!(selector, error = %err, "readiness selector check failed; continuing");
            }
            Err(_) => warn!(
                selector,
                timeout_ms = limit.as_millis() as u64,
                "readiness selector did not appear; continuing"
            ),
        }
    }
}
