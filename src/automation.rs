//! Browser automation capability surface.
//!
//! The scraping core only talks to these traits. `crate::chrome` implements
//! them on top of Headless Chrome; tests use a scripted in-memory DOM.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

/// How each page of a session is set up.
#[derive(Debug, Clone)]
pub struct PageOptions {
    pub viewport: (u32, u32),
    pub user_agent: String,
    pub default_timeout: Duration,
}

/// Something that can open browser sessions, local or remote.
#[async_trait]
pub trait AutomationDriver: Send + Sync {
    /// Human-readable endpoint for logs.
    fn describe(&self) -> String;

    async fn open_session(&self) -> Result<Box<dyn BrowserSession>>;
}

#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Open a fresh page in its own browsing context.
    async fn new_page(&self, options: &PageOptions) -> Result<Box<dyn PageHandle>>;

    /// Release the session. Safe to call more than once.
    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait PageHandle: Send + Sync {
    /// Navigate and wait for the load to settle.
    async fn goto(&self, url: &str) -> Result<()>;

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<()>;

    /// Every element currently matching `selector`, in document order.
    async fn query_all(&self, selector: &str) -> Result<Vec<Box<dyn ElementHandle>>>;

    async fn scroll_to_bottom(&self) -> Result<()>;

    async fn title(&self) -> Result<String>;

    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait ElementHandle: Send + Sync {
    /// First descendant matching `selector`, if any.
    async fn query(&self, selector: &str) -> Result<Option<Box<dyn ElementHandle>>>;

    async fn query_all(&self, selector: &str) -> Result<Vec<Box<dyn ElementHandle>>>;

    async fn attribute(&self, name: &str) -> Result<Option<String>>;

    async fn inner_text(&self) -> Result<String>;
}
