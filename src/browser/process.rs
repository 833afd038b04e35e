//! Renderer abstraction shared by the pool and the pipeline.
//!
//! A [`RendererFactory`] launches [`RendererProcess`] instances; each process
//! opens isolated [`BrowsingContext`]s, one per job.

use async_trait::async_trait;
use thiserror::Error;

use crate::pipeline::PdfOptions;
use crate::Viewport;

/// Failure reported by the external renderer. The display string is the raw
/// engine message so callers can surface it unchanged.
#[derive(Debug, Clone, Error)]
pub enum BrowserError {
    #[error("{0}")]
    Launch(String),
    #[error("{0}")]
    Disconnected(String),
    #[error("{0}")]
    Navigation(String),
    #[error("{0}")]
    Protocol(String),
}

impl BrowserError {
    /// True when the renderer process can no longer be trusted with new work.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BrowserError::Launch(_) | BrowserError::Disconnected(_))
    }
}

pub type BrowserResult<T> = std::result::Result<T, BrowserError>;

/// Launches renderer processes for the pool.
#[async_trait]
pub trait RendererFactory: Send + Sync {
    async fn launch(&self) -> BrowserResult<Box<dyn RendererProcess>>;
}

/// One running renderer instance.
#[async_trait]
pub trait RendererProcess: Send + Sync {
    /// Opens a fresh browsing context that shares nothing with other contexts.
    async fn open_context(&self) -> BrowserResult<Box<dyn BrowsingContext>>;

    /// Cheap liveness probe, used by the optional validate-on-borrow check.
    fn is_connected(&self) -> bool {
        true
    }

    /// Terminates the process. Must be safe to call on an already dead process.
    async fn shutdown(&self);
}

/// A single job's isolated unit of work inside a renderer process.
#[async_trait]
pub trait BrowsingContext: Send {
    async fn set_viewport(&mut self, viewport: Viewport) -> BrowserResult<()>;

    /// Replaces the document with `html` and waits for it to settle.
    async fn set_content(&mut self, html: &str) -> BrowserResult<()>;

    /// Navigates to `url` and waits for the network to go idle.
    async fn navigate(&mut self, url: &str) -> BrowserResult<()>;

    async fn add_style(&mut self, css: &str) -> BrowserResult<()>;

    /// Resolves once an element matching `selector` exists. Callers bound it.
    async fn wait_for_selector(&mut self, selector: &str) -> BrowserResult<()>;

    /// Serialized markup of the current document.
    async fn content(&mut self) -> BrowserResult<String>;

    async fn print_pdf(&mut self, options: &PdfOptions) -> BrowserResult<Vec<u8>>;

    async fn close(self: Box<Self>) -> BrowserResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launch_and_disconnect_are_fatal() {
        assert!(BrowserError::Launch("no chrome".into()).is_fatal());
        assert!(BrowserError::Disconnected("ws closed".into()).is_fatal());
        assert!(!BrowserError::Navigation("net::ERR_NAME_NOT_RESOLVED".into()).is_fatal());
        assert!(!BrowserError::Protocol("bad selector".into()).is_fatal());
    }

    #[test]
    fn display_is_the_raw_engine_message() {
        let err = BrowserError::Navigation("net::ERR_CONNECTION_REFUSED".into());
        assert_eq!(err.to_string(), "net::ERR_CONNECTION_REFUSED");
    }
}
