//! Renderer processes and the browsing contexts jobs run in.
//!
//! # Module Structure
//!
//! - [`chrome`] - Headless Chromium over the DevTools protocol
//! - [`mock`] - In-process renderer for tests and dry runs
//! - `process` - The traits the pool and pipeline are written against
//!
//! # Example
//!
//! ```no_run
//! use printd_lib::browser::{ChromeFactory, ChromeOptions, RendererFactory};
//!
//! # async fn example() -> Result<(), printd_lib::browser::BrowserError> {
//! let factory = ChromeFactory::new(ChromeOptions::default());
//! let process = factory.launch().await?;
//! let mut context = process.open_context().await?;
//! context.set_content("<h1>Hello</h1>").await?;
//! context.close().await?;
//! process.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod chrome;
pub mod mock;
mod process;

pub use chrome::{ChromeFactory, ChromeOptions, DEFAULT_ARGS, DEFAULT_LAUNCH_TIMEOUT};
pub use mock::{MockFactory, MockStats};
pub use process::{
    BrowserError, BrowserResult, BrowsingContext, RendererFactory, RendererProcess,
};
