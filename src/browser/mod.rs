//! Browser sessions used to render and capture links.
//!
//! The archiver only talks to the traits below; [`chromium`] provides the
//! chromiumoxide-backed implementation and tests provide in-memory fakes.

pub mod chromium;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::captcha::SolvedCookie;

pub use chromium::ChromiumLauncher;

/// An open page that has (or will have) navigated to a link.
#[async_trait]
pub trait LivePage: Send + Sync {
    /// Navigate and wait for `DOMContentLoaded`.
    async fn goto(&self, url: &str) -> Result<()>;

    /// Current document title, if any.
    async fn title(&self) -> Result<Option<String>>;

    /// Serialized DOM of the rendered page.
    async fn content(&self) -> Result<String>;

    /// Value of `<meta name="description">`, empty when absent.
    async fn meta_description(&self) -> Result<String>;

    /// PNG screenshot; `full_page` captures beyond the viewport.
    async fn screenshot_png(&self, full_page: bool) -> Result<Vec<u8>>;

    /// Low quality JPEG of the viewport, used for link previews.
    async fn preview_jpeg(&self) -> Result<Vec<u8>>;

    /// Print the page to PDF.
    async fn pdf(&self) -> Result<Vec<u8>>;

    /// Close the page. Failures are not interesting to callers.
    async fn close(&self);
}

/// An isolated browser session (its own cookie jar and proxy).
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Cookies applied to every page opened afterwards.
    async fn set_cookies(&self, cookies: &[SolvedCookie]) -> Result<()>;

    async fn new_page(&self) -> Result<Box<dyn LivePage>>;

    fn is_connected(&self) -> bool;

    /// Tear the session down. Calling it more than once is harmless.
    async fn close(&self) -> Result<()>;
}

/// Produces a fresh session per archival run.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn acquire(&self) -> Result<Arc<dyn BrowserSession>>;
}
