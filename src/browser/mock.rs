//! In-process stand-in for a real renderer.
//!
//! Useful for tests and dry runs: launches are instant, "PDFs" are small byte
//! buffers starting with the `%PDF-` signature, and every failure mode the
//! pipeline has to survive can be switched on.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::process::{
    BrowserError, BrowserResult, BrowsingContext, RendererFactory, RendererProcess,
};
use crate::pipeline::PdfOptions;
use crate::Viewport;

#[derive(Debug, Clone, Default)]
struct MockBehavior {
    launch_error: Option<String>,
    succeed_launches: Option<usize>,
    launch_delay: Duration,
    shutdown_delay: Duration,
    load_delay: Duration,
    navigation_error: Option<String>,
    print_error: Option<String>,
    print_disconnects: bool,
    selector_never_appears: bool,
}

/// Counters and call log shared by every process a [`MockFactory`] launches.
#[derive(Debug, Default)]
pub struct MockStats {
    launches: AtomicUsize,
    shutdowns: AtomicUsize,
    contexts_opened: AtomicUsize,
    contexts_closed: AtomicUsize,
    killed_before: AtomicUsize,
    steps: Mutex<Vec<String>>,
    last_pdf_options: Mutex<Option<PdfOptions>>,
}

impl MockStats {
    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    pub fn contexts_opened(&self) -> usize {
        self.contexts_opened.load(Ordering::SeqCst)
    }

    pub fn contexts_closed(&self) -> usize {
        self.contexts_closed.load(Ordering::SeqCst)
    }

    /// Marks every process launched so far as disconnected.
    pub fn disconnect_all(&self) {
        self.killed_before.store(self.launches(), Ordering::SeqCst);
    }

    /// Ordered log of context operations across all jobs.
    pub fn steps(&self) -> Vec<String> {
        self.steps.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn last_pdf_options(&self) -> Option<PdfOptions> {
        self.last_pdf_options.lock().ok().and_then(|o| o.clone())
    }

    fn record(&self, step: impl Into<String>) {
        if let Ok(mut steps) = self.steps.lock() {
            steps.push(step.into());
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockFactory {
    behavior: Arc<MockBehavior>,
    stats: Arc<MockStats>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> Arc<MockStats> {
        Arc::clone(&self.stats)
    }

    fn with(mut self, f: impl FnOnce(&mut MockBehavior)) -> Self {
        f(Arc::make_mut(&mut self.behavior));
        self
    }

    /// Every launch fails with `message`.
    pub fn failing_launch(self, message: impl Into<String>) -> Self {
        let message = message.into();
        self.with(|b| b.launch_error = Some(message))
    }

    /// The first `count` launches succeed, later ones fail with `message`.
    pub fn failing_launch_after(self, count: usize, message: impl Into<String>) -> Self {
        let message = message.into();
        self.with(|b| {
            b.launch_error = Some(message);
            b.succeed_launches = Some(count);
        })
    }

    pub fn with_launch_delay(self, delay: Duration) -> Self {
        self.with(|b| b.launch_delay = delay)
    }

    /// Shutdown takes `delay` before the process counts as gone.
    pub fn with_shutdown_delay(self, delay: Duration) -> Self {
        self.with(|b| b.shutdown_delay = delay)
    }

    /// Delays `set_content` and `navigate` before they settle.
    pub fn with_load_delay(self, delay: Duration) -> Self {
        self.with(|b| b.load_delay = delay)
    }

    pub fn with_navigation_error(self, message: impl Into<String>) -> Self {
        let message = message.into();
        self.with(|b| b.navigation_error = Some(message))
    }

    pub fn with_print_error(self, message: impl Into<String>) -> Self {
        let message = message.into();
        self.with(|b| b.print_error = Some(message))
    }

    /// Printing fails as if the renderer process crashed.
    pub fn with_print_crash(self, message: impl Into<String>) -> Self {
        let message = message.into();
        self.with(|b| {
            b.print_error = Some(message);
            b.print_disconnects = true;
        })
    }

    /// Readiness selectors never match.
    pub fn with_missing_selector(self) -> Self {
        self.with(|b| b.selector_never_appears = true)
    }
}

#[async_trait]
impl RendererFactory for MockFactory {
    async fn launch(&self) -> BrowserResult<Box<dyn RendererProcess>> {
        if !self.behavior.launch_delay.is_zero() {
            tokio::time::sleep(self.behavior.launch_delay).await;
        }

        let index = self.stats.launches.load(Ordering::SeqCst);
        if let Some(message) = &self.behavior.launch_error {
            let allowed = self.behavior.succeed_launches.unwrap_or(0);
            if index >= allowed {
                return Err(BrowserError::Launch(message.clone()));
            }
        }

        let index = self.stats.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockProcess {
            index,
            behavior: Arc::clone(&self.behavior),
            stats: Arc::clone(&self.stats),
        }))
    }
}

struct MockProcess {
    index: usize,
    behavior: Arc<MockBehavior>,
    stats: Arc<MockStats>,
}

#[async_trait]
impl RendererProcess for MockProcess {
    async fn open_context(&self) -> BrowserResult<Box<dyn BrowsingContext>> {
        if !self.is_connected() {
            return Err(BrowserError::Disconnected(format!(
                "mock renderer {} is gone",
                self.index
            )));
        }
        self.stats.contexts_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockContext {
            document: String::new(),
            behavior: Arc::clone(&self.behavior),
            stats: Arc::clone(&self.stats),
        }))
    }

    fn is_connected(&self) -> bool {
        self.index >= self.stats.killed_before.load(Ordering::SeqCst)
    }

    async fn shutdown(&self) {
        if !self.behavior.shutdown_delay.is_zero() {
            tokio::time::sleep(self.behavior.shutdown_delay).await;
        }
        self.stats.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

struct MockContext {
    document: String,
    behavior: Arc<MockBehavior>,
    stats: Arc<MockStats>,
}

impl MockContext {
    async fn settle(&self) {
        if !self.behavior.load_delay.is_zero() {
            tokio::time::sleep(self.behavior.load_delay).await;
        }
    }
}

#[async_trait]
impl BrowsingContext for MockContext {
    async fn set_viewport(&mut self, viewport: Viewport) -> BrowserResult<()> {
        self.stats.record(format!("viewport {viewport}"));
        Ok(())
    }

    async fn set_content(&mut self, html: &str) -> BrowserResult<()> {
        self.stats.record("set_content");
        self.settle().await;
        self.document = html.to_string();
        Ok(())
    }

    async fn navigate(&mut self, url: &str) -> BrowserResult<()> {
        self.stats.record(format!("navigate {url}"));
        if let Some(message) = &self.behavior.navigation_error {
            return Err(BrowserError::Navigation(message.clone()));
        }
        self.settle().await;
        self.document = format!("<html><head></head><body><p>{url}</p></body></html>");
        Ok(())
    }

    async fn add_style(&mut self, css: &str) -> BrowserResult<()> {
        self.stats.record("add_style");
        self.document.push_str(&format!("<style>{css}</style>"));
        Ok(())
    }

    async fn wait_for_selector(&mut self, selector: &str) -> BrowserResult<()> {
        self.stats.record(format!("wait_for_selector {selector}"));
        if self.behavior.selector_never_appears {
            futures::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn content(&mut self) -> BrowserResult<String> {
        self.stats.record("content");
        Ok(self.document.clone())
    }

    async fn print_pdf(&mut self, options: &PdfOptions) -> BrowserResult<Vec<u8>> {
        self.stats.record("print_pdf");
        if let Ok(mut last) = self.stats.last_pdf_options.lock() {
            *last = Some(options.clone());
        }
        if let Some(message) = &self.behavior.print_error {
            return Err(if self.behavior.print_disconnects {
                BrowserError::Disconnected(message.clone())
            } else {
                BrowserError::Protocol(message.clone())
            });
        }
        let mut bytes = b"%PDF-1.7\n".to_vec();
        bytes.extend_from_slice(self.document.as_bytes());
        bytes.extend_from_slice(b"\n%%EOF\n");
        Ok(bytes)
    }

    async fn close(self: Box<Self>) -> BrowserResult<()> {
        self.stats.record("close");
        self.stats.contexts_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn launch_failure_after_budget() {
        let factory = MockFactory::new().failing_launch_after(1, "boom");
        assert!(factory.launch().await.is_ok());
        match factory.launch().await {
            Err(BrowserError::Launch(msg)) => assert_eq!(msg, "boom"),
            Err(other) => panic!("expected launch error, got {other:?}"),
            Ok(_) => panic!("expected launch error"),
        }
        assert_eq!(factory.stats().launches(), 1);
    }

    #[tokio::test]
    async fn disconnect_all_only_affects_existing_processes() {
        let factory = MockFactory::new();
        let first = factory.launch().await.unwrap();
        factory.stats().disconnect_all();
        let second = factory.launch().await.unwrap();
        assert!(!first.is_connected());
        assert!(second.is_connected());
        assert!(first.open_context().await.is_err());
    }

    #[tokio::test]
    async fn pdf_output_carries_signature() {
        let factory = MockFactory::new();
        let process = factory.launch().await.unwrap();
        let mut ctx = process.open_context().await.unwrap();
        ctx.set_content("<h1>Test</h1>").await.unwrap();
        let pdf = ctx.print_pdf(&PdfOptions::default()).await.unwrap();
        assert_eq!(&pdf[..5], b"%PDF-");
        ctx.close().await.unwrap();
        assert_eq!(factory.stats().contexts_closed(), 1);
    }
}
