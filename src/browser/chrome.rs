//! Chromium renderer driven over the DevTools protocol.
//!
//! Each [`ChromeProcess`] owns one headless Chromium child. Jobs run inside
//! incognito browser contexts so cookies, storage and cache never leak
//! between them.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::PrintToPdfParams;
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams,
};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::error::CdpError;
use chromiumoxide::Page;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::process::{
    BrowserError, BrowserResult, BrowsingContext, RendererFactory, RendererProcess,
};
use crate::pipeline::PdfOptions;
use crate::Viewport;

pub const DEFAULT_LAUNCH_TIMEOUT: Duration = Duration::from_secs(20);

/// How long the resource count must stay flat before the network counts as idle.
const NETWORK_IDLE_WINDOW: Duration = Duration::from_millis(500);
const POLL_INTERVAL: Duration = Duration::from_millis(100);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Arguments passed to every launch unless overridden.
pub const DEFAULT_ARGS: &[&str] = &["--no-sandbox", "--disable-dev-shm-usage", "--disable-gpu"];

#[derive(Debug, Clone)]
pub struct ChromeOptions {
    /// Explicit Chromium binary; auto-detected when `None`.
    pub executable: Option<PathBuf>,
    pub args: Vec<String>,
    pub launch_timeout: Duration,
}

impl Default for ChromeOptions {
    fn default() -> Self {
        Self {
            executable: None,
            args: DEFAULT_ARGS.iter().map(|a| a.to_string()).collect(),
            launch_timeout: DEFAULT_LAUNCH_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChromeFactory {
    options: ChromeOptions,
}

impl ChromeFactory {
    pub fn new(options: ChromeOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl RendererFactory for ChromeFactory {
    async fn launch(&self) -> BrowserResult<Box<dyn RendererProcess>> {
        let mut builder = BrowserConfig::builder()
            .args(self.options.args.clone())
            .launch_timeout(self.options.launch_timeout);
        if let Some(path) = &self.options.executable {
            builder = builder.chrome_executable(path);
        }
        let config = builder.build().map_err(map_launch_error)?;

        let started = Instant::now();
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| map_launch_error(e.to_string()))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "devtools handler error");
                }
            }
        });

        debug!(elapsed_ms = started.elapsed().as_millis() as u64, "chromium launched");
        Ok(Box::new(ChromeProcess {
            browser: Arc::new(Mutex::new(browser)),
            handler,
            closed: AtomicBool::new(false),
        }))
    }
}

pub struct ChromeProcess {
    browser: Arc<Mutex<Browser>>,
    handler: JoinHandle<()>,
    closed: AtomicBool,
}

#[async_trait]
impl RendererProcess for ChromeProcess {
    async fn open_context(&self) -> BrowserResult<Box<dyn BrowsingContext>> {
        let browser = self.browser.lock().await;
        let context_id = browser
            .create_browser_context(CreateBrowserContextParams::default())
            .await
            .map_err(map_cdp_error)?;

        let target = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(context_id.clone())
            .build()
            .map_err(BrowserError::Protocol)?;

        let page = match browser.new_page(target).await {
            Ok(page) => page,
            Err(err) => {
                if let Err(dispose) = browser.dispose_browser_context(context_id).await {
                    debug!(error = %dispose, "failed to dispose context after page error");
                }
                return Err(map_cdp_error(err));
            }
        };

        Ok(Box::new(ChromeContext {
            page: Some(page),
            context_id: Some(context_id),
            browser: Arc::clone(&self.browser),
        }))
    }

    fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && !self.handler.is_finished()
    }

    async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut browser = self.browser.lock().await;
        if let Err(err) = browser.close().await {
            debug!(error = %err, "chromium close command failed");
        }
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, browser.wait()).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => debug!(error = %err, "waiting for chromium exit failed"),
            Err(_) => {
                warn!("chromium did not exit within {SHUTDOWN_TIMEOUT:?}; killing");
                if let Some(Err(err)) = browser.kill().await {
                    warn!(error = %err, "failed to kill chromium");
                }
            }
        }
        self.handler.abort();
    }
}

pub struct ChromeContext {
    page: Option<Page>,
    context_id: Option<BrowserContextId>,
    browser: Arc<Mutex<Browser>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoadProbe {
    ready_state: String,
    resources: u64,
}

const LOAD_PROBE: &str = "(() => ({ readyState: document.readyState, \
     resources: performance.getEntriesByType('resource').length }))()";

impl ChromeContext {
    fn page(&self) -> BrowserResult<&Page> {
        self.page
            .as_ref()
            .ok_or_else(|| BrowserError::Protocol("browsing context already closed".into()))
    }

    async fn eval<T: DeserializeOwned>(&self, expression: String) -> BrowserResult<T> {
        let params = EvaluateParams::builder()
            .expression(expression)
            .return_by_value(true)
            .await_promise(true)
            .build()
            .map_err(BrowserError::Protocol)?;
        self.page()?
            .evaluate_expression(params)
            .await
            .map_err(map_cdp_error)?
            .into_value::<T>()
            .map_err(|e| BrowserError::Protocol(e.to_string()))
    }

    /// Polls until the document is complete and no new resources have
    /// arrived for [`NETWORK_IDLE_WINDOW`]. Callers bound the total wait.
    async fn wait_for_idle(&self) -> BrowserResult<()> {
        let mut last_count = None;
        let mut stable_since = Instant::now();
        loop {
            let probe: LoadProbe = self.eval(LOAD_PROBE.to_string()).await?;
            if last_count != Some(probe.resources) {
                last_count = Some(probe.resources);
                stable_since = Instant::now();
            }
            if probe.ready_state == "complete" && stable_since.elapsed() >= NETWORK_IDLE_WINDOW {
                return Ok(());
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

fn js_string(value: &str) -> BrowserResult<String> {
    serde_json::to_string(value).map_err(|e| BrowserError::Protocol(e.to_string()))
}

#[async_trait]
impl BrowsingContext for ChromeContext {
    async fn set_viewport(&mut self, viewport: Viewport) -> BrowserResult<()> {
        let params = SetDeviceMetricsOverrideParams::new(
            i64::from(viewport.width),
            i64::from(viewport.height),
            viewport.device_scale_factor,
            false,
        );
        self.page()?.execute(params).await.map_err(map_cdp_error)?;
        Ok(())
    }

    async fn set_content(&mut self, html: &str) -> BrowserResult<()> {
        self.page()?.set_content(html).await.map_err(map_cdp_error)?;
        self.wait_for_idle().await
    }

    async fn navigate(&mut self, url: &str) -> BrowserResult<()> {
        self.page()?.goto(url).await.map_err(|err| match map_cdp_error(err) {
            BrowserError::Protocol(msg) => BrowserError::Navigation(msg),
            other => other,
        })?;
        self.wait_for_idle().await
    }

    async fn add_style(&mut self, css: &str) -> BrowserResult<()> {
        let expression = format!(
            "(() => {{ const style = document.createElement('style'); \
             style.textContent = {}; \
             (document.head || document.documentElement).appendChild(style); \
             return true; }})()",
            js_string(css)?
        );
        self.eval::<bool>(expression).await.map(|_| ())
    }

    async fn wait_for_selector(&mut self, selector: &str) -> BrowserResult<()> {
        let expression = format!("document.querySelector({}) !== null", js_string(selector)?);
        loop {
            if self.eval::<bool>(expression.clone()).await? {
                return Ok(());
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn content(&mut self) -> BrowserResult<String> {
        self.page()?.content().await.map_err(map_cdp_error)
    }

    async fn print_pdf(&mut self, options: &PdfOptions) -> BrowserResult<Vec<u8>> {
        self.page()?
            .pdf(print_params(options))
            .await
            .map_err(map_cdp_error)
    }

    async fn close(mut self: Box<Self>) -> BrowserResult<()> {
        let page = self.page.take();
        let context_id = self.context_id.take();
        close_context(&self.browser, page, context_id).await
    }
}

impl Drop for ChromeContext {
    fn drop(&mut self) {
        if self.page.is_none() && self.context_id.is_none() {
            return;
        }
        let page = self.page.take();
        let context_id = self.context_id.take();
        let browser = Arc::clone(&self.browser);
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                if let Err(err) = close_context(&browser, page, context_id).await {
                    debug!(error = %err, "background context cleanup failed");
                }
            });
        }
    }
}

async fn close_context(
    browser: &Mutex<Browser>,
    page: Option<Page>,
    context_id: Option<BrowserContextId>,
) -> BrowserResult<()> {
    let mut result = Ok(());
    if let Some(page) = page {
        if let Err(err) = page.close().await {
            result = Err(map_cdp_error(err));
        }
    }
    if let Some(id) = context_id {
        if let Err(err) = browser.lock().await.dispose_browser_context(id).await {
            result = Err(map_cdp_error(err));
        }
    }
    result
}

fn print_params(options: &PdfOptions) -> PrintToPdfParams {
    let (width, height) = options.format.dimensions();
    let display_header_footer = options.display_header_footer();
    let template = |t: &Option<String>| {
        display_header_footer.then(|| t.clone().unwrap_or_else(|| "<span></span>".to_string()))
    };
    PrintToPdfParams {
        landscape: Some(options.landscape),
        display_header_footer: Some(display_header_footer),
        print_background: Some(options.print_background),
        scale: Some(options.scale),
        paper_width: Some(width),
        paper_height: Some(height),
        margin_top: Some(options.margin.top),
        margin_bottom: Some(options.margin.bottom),
        margin_left: Some(options.margin.left),
        margin_right: Some(options.margin.right),
        page_ranges: options.page_ranges.clone(),
        header_template: template(&options.header_template),
        footer_template: template(&options.footer_template),
        prefer_css_page_size: Some(options.prefer_css_page_size),
        ..Default::default()
    }
}

/// Maps a protocol error, treating a lost connection as fatal for the process.
fn map_cdp_error(err: CdpError) -> BrowserError {
    match err {
        CdpError::Ws(_) | CdpError::ChannelSendError(_) => {
            BrowserError::Disconnected(err.to_string())
        }
        other => BrowserError::Protocol(other.to_string()),
    }
}

fn map_launch_error(message: String) -> BrowserError {
    let lower = message.to_ascii_lowercase();
    if lower.contains("could not auto detect") || lower.contains("no such file") {
        BrowserError::Launch(format!(
            "{message}. Hint: install Chromium or set PRINTD_BROWSER_PATH / CHROME_PATH"
        ))
    } else {
        BrowserError::Launch(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PaperFormat;

    #[test]
    fn launch_error_for_missing_binary_includes_hint() {
        let err = map_launch_error("Could not auto detect a chrome executable".into());
        assert!(err.is_fatal());
        assert!(
            err.to_string().contains("PRINTD_BROWSER_PATH"),
            "expected browser path hint, got: {err}"
        );
    }

    #[test]
    fn launch_error_keeps_other_messages() {
        let err = map_launch_error("Browser process exited with status 1".into());
        assert_eq!(err.to_string(), "Browser process exited with status 1");
    }

    #[test]
    fn print_params_use_paper_size_in_inches() {
        let options = PdfOptions {
            format: PaperFormat::Letter,
            landscape: true,
            ..PdfOptions::default()
        };
        let params = print_params(&options);
        assert_eq!(params.paper_width, Some(8.5));
        assert_eq!(params.paper_height, Some(11.0));
        assert_eq!(params.landscape, Some(true));
        assert_eq!(params.print_background, Some(true));
        assert_eq!(params.display_header_footer, Some(false));
        assert!(params.header_template.is_none());
    }

    #[test]
    fn missing_template_is_blank_when_other_is_set() {
        let options = PdfOptions {
            footer_template: Some("<span class=\"pageNumber\"></span>".into()),
            ..PdfOptions::default()
        };
        let params = print_params(&options);
        assert_eq!(params.display_header_footer, Some(true));
        assert_eq!(params.header_template.as_deref(), Some("<span></span>"));
        assert_eq!(
            params.footer_template.as_deref(),
            Some("<span class=\"pageNumber\"></span>")
        );
    }

    #[test]
    fn default_args_disable_sandbox_and_gpu() {
        let options = ChromeOptions::default();
        assert!(options.args.iter().any(|a| a == "--no-sandbox"));
        assert!(options.args.iter().any(|a| a == "--disable-gpu"));
        assert!(options.executable.is_none());
    }
}
