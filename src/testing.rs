//! Scripted in-memory doubles for the automation and storage seams.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::Value;

use crate::automation::{AutomationDriver, BrowserSession, ElementHandle, PageHandle, PageOptions};
use crate::error::StorageError;
use crate::extractor::ResultSelectors;
use crate::models::VideoRecord;
use crate::storage::sheets::cell_text;
use crate::storage::{Storage, ValuesApi};

pub fn page_options() -> PageOptions {
    PageOptions {
        viewport: (1280, 720),
        user_agent: "test-agent".to_string(),
        default_timeout: Duration::from_secs(5),
    }
}

/// A DOM node with attributes, text and children keyed by selector.
#[derive(Debug, Clone, Default)]
pub struct MockElement {
    attrs: HashMap<String, String>,
    text: String,
    children: HashMap<String, Vec<MockElement>>,
    broken: bool,
}

impl MockElement {
    /// A search result shaped like the live markup. Empty `title`/`href`
    /// leave the attribute out.
    pub fn video(
        title: &str,
        href: &str,
        aria_label: Option<&str>,
        channel: Option<&str>,
        upload_time: Option<&str>,
    ) -> Self {
        let selectors = ResultSelectors::default();
        let mut anchor = MockElement::default();
        if !title.is_empty() {
            anchor.attrs.insert("title".into(), title.into());
        }
        if !href.is_empty() {
            anchor.attrs.insert("href".into(), href.into());
        }
        if let Some(label) = aria_label {
            anchor.attrs.insert("aria-label".into(), label.into());
        }

        let mut element = MockElement::default();
        element.children.insert(selectors.title, vec![anchor]);
        if let Some(channel) = channel {
            element.children.insert(selectors.channel, vec![MockElement::text(channel)]);
        }
        if let Some(time) = upload_time {
            element.children.insert(selectors.upload_time, vec![MockElement::text(time)]);
        }
        element
    }

    pub fn text(text: &str) -> Self {
        Self {
            text: text.to_string(),
            ..Self::default()
        }
    }

    /// Every read fails.
    pub fn broken() -> Self {
        Self {
            broken: true,
            ..Self::default()
        }
    }

    pub fn with_meta(mut self, spans: &[&str]) -> Self {
        let spans = spans.iter().map(|s| MockElement::text(s)).collect();
        self.children.insert(ResultSelectors::default().metadata, spans);
        self
    }

    pub fn with_anchor_text(mut self, text: &str) -> Self {
        if let Some(anchor) = self
            .children
            .get_mut(&ResultSelectors::default().title)
            .and_then(|anchors| anchors.first_mut())
        {
            anchor.text = text.to_string();
        }
        self
    }

    pub fn with_broken_channel(mut self) -> Self {
        self.children
            .insert(ResultSelectors::default().channel, vec![MockElement::broken()]);
        self
    }

    fn check(&self) -> Result<()> {
        if self.broken {
            bail!("node is detached");
        }
        Ok(())
    }
}

fn boxed(element: &MockElement) -> Box<dyn ElementHandle> {
    Box::new(element.clone())
}

#[async_trait]
impl ElementHandle for MockElement {
    async fn query(&self, selector: &str) -> Result<Option<Box<dyn ElementHandle>>> {
        self.check()?;
        Ok(self.children.get(selector).and_then(|c| c.first()).map(boxed))
    }

    async fn query_all(&self, selector: &str) -> Result<Vec<Box<dyn ElementHandle>>> {
        self.check()?;
        Ok(self
            .children
            .get(selector)
            .map(|c| c.iter().map(boxed).collect())
            .unwrap_or_default())
    }

    async fn attribute(&self, name: &str) -> Result<Option<String>> {
        self.check()?;
        Ok(self.attrs.get(name).cloned())
    }

    async fn inner_text(&self) -> Result<String> {
        self.check()?;
        Ok(self.text.clone())
    }
}

#[derive(Debug, Default)]
struct PageCounters {
    visible: AtomicUsize,
    scrolls: AtomicU32,
    queries: AtomicU32,
    closed: AtomicBool,
    visited: Mutex<Vec<String>>,
}

/// A result list that reveals `growth` more elements per scroll. Clones
/// share counters, so a test can keep one while a session hands out another.
#[derive(Debug, Clone)]
pub struct MockPage {
    elements: Arc<Vec<MockElement>>,
    growth: usize,
    fail_queries_after: Option<u32>,
    broken_navigation: bool,
    counters: Arc<PageCounters>,
}

impl MockPage {
    pub fn new(elements: Vec<MockElement>, initially_visible: usize, growth: usize) -> Self {
        let counters = PageCounters::default();
        counters
            .visible
            .store(initially_visible.min(elements.len()), Ordering::SeqCst);
        Self {
            elements: Arc::new(elements),
            growth,
            fail_queries_after: None,
            broken_navigation: false,
            counters: Arc::new(counters),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), 0, 0)
    }

    /// `query_all` succeeds `n` times, then errors.
    pub fn failing_queries_after(mut self, n: u32) -> Self {
        self.fail_queries_after = Some(n);
        self
    }

    pub fn broken_navigation(mut self) -> Self {
        self.broken_navigation = true;
        self
    }

    pub fn scrolls(&self) -> u32 {
        self.counters.scrolls.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> u32 {
        self.counters.queries.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.counters.closed.load(Ordering::SeqCst)
    }

    pub fn visited(&self) -> Vec<String> {
        self.counters.visited.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageHandle for MockPage {
    async fn goto(&self, url: &str) -> Result<()> {
        if self.broken_navigation {
            bail!("net::ERR_CONNECTION_RESET at {url}");
        }
        self.counters.visited.lock().unwrap().push(url.to_string());
        Ok(())
    }

    async fn wait_for_selector(&self, selector: &str, _timeout: Duration) -> Result<()> {
        if self.counters.visible.load(Ordering::SeqCst) == 0 {
            bail!("timed out waiting for '{selector}'");
        }
        Ok(())
    }

    async fn query_all(&self, _selector: &str) -> Result<Vec<Box<dyn ElementHandle>>> {
        let n = self.counters.queries.fetch_add(1, Ordering::SeqCst);
        if self.fail_queries_after.is_some_and(|limit| n >= limit) {
            bail!("target closed");
        }
        let visible = self.counters.visible.load(Ordering::SeqCst);
        Ok(self.elements[..visible].iter().map(boxed).collect())
    }

    async fn scroll_to_bottom(&self) -> Result<()> {
        self.counters.scrolls.fetch_add(1, Ordering::SeqCst);
        let visible = self.counters.visible.load(Ordering::SeqCst);
        let grown = (visible + self.growth).min(self.elements.len());
        self.counters.visible.store(grown, Ordering::SeqCst);
        Ok(())
    }

    async fn title(&self) -> Result<String> {
        Ok("about:blank".to_string())
    }

    async fn close(&self) -> Result<()> {
        self.counters.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Opens sessions that all serve the same scripted page.
pub struct MockDriver {
    page: MockPage,
    fail_first: u32,
    fail_close: bool,
    attempts: AtomicU32,
    close_calls: Arc<AtomicU32>,
}

impl MockDriver {
    pub fn new(page: MockPage) -> Self {
        Self {
            page,
            fail_first: 0,
            fail_close: false,
            attempts: AtomicU32::new(0),
            close_calls: Arc::new(AtomicU32::new(0)),
        }
    }

    /// The first `n` attempts to open a session fail.
    pub fn failing_first(mut self, n: u32) -> Self {
        self.fail_first = n;
        self
    }

    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> u32 {
        self.close_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AutomationDriver for MockDriver {
    fn describe(&self) -> String {
        "mock endpoint".to_string()
    }

    async fn open_session(&self) -> Result<Box<dyn BrowserSession>> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.fail_first {
            return Err(anyhow!("connection refused (attempt {})", attempt + 1));
        }
        Ok(Box::new(MockSession {
            page: self.page.clone(),
            fail_close: self.fail_close,
            close_calls: Arc::clone(&self.close_calls),
        }))
    }
}

struct MockSession {
    page: MockPage,
    fail_close: bool,
    close_calls: Arc<AtomicU32>,
}

#[async_trait]
impl BrowserSession for MockSession {
    async fn new_page(&self, _options: &PageOptions) -> Result<Box<dyn PageHandle>> {
        Ok(Box::new(self.page.clone()))
    }

    async fn close(&self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_close {
            bail!("websocket already gone");
        }
        Ok(())
    }
}

/// In-memory spreadsheet understanding the handful of ranges the sheets
/// backend uses.
#[derive(Debug, Clone, Default)]
pub struct MemorySheet {
    rows: Arc<Mutex<Vec<Vec<String>>>>,
    appended: Arc<Mutex<Vec<Vec<Value>>>>,
    ranges: Arc<Mutex<Vec<String>>>,
    unreachable: bool,
}

impl MemorySheet {
    pub fn with_rows(rows: Vec<Vec<String>>) -> Self {
        Self {
            rows: Arc::new(Mutex::new(rows)),
            ..Self::default()
        }
    }

    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::default()
        }
    }

    pub fn rows(&self) -> Vec<Vec<String>> {
        self.rows.lock().unwrap().clone()
    }

    /// Data rows exactly as the backend sent them.
    pub fn appended(&self) -> Vec<Vec<Value>> {
        self.appended.lock().unwrap().clone()
    }

    pub fn ranges_seen(&self) -> Vec<String> {
        self.ranges.lock().unwrap().clone()
    }

    fn cells<'a>(&self, range: &'a str) -> Result<&'a str, StorageError> {
        self.ranges.lock().unwrap().push(range.to_string());
        if self.unreachable {
            return Err(StorageError::Network("connection refused".to_string()));
        }
        Ok(range.rsplit('!').next().unwrap_or(range))
    }
}

#[async_trait]
impl ValuesApi for MemorySheet {
    async fn get(&self, range: &str) -> Result<Vec<Vec<String>>, StorageError> {
        let rows = self.rows.lock().unwrap();
        match self.cells(range)? {
            "A1:G1" => Ok(rows.first().cloned().into_iter().collect()),
            "A:G" => Ok(rows.clone()),
            "B:B" => Ok(rows
                .iter()
                .map(|row| row.get(1).cloned().into_iter().collect())
                .collect()),
            other => Err(StorageError::Api {
                status: 400,
                message: format!("unsupported range {other}"),
            }),
        }
    }

    async fn update(&self, range: &str, values: Vec<Vec<Value>>) -> Result<(), StorageError> {
        self.cells(range)?;
        let mut rows = self.rows.lock().unwrap();
        let header = values
            .into_iter()
            .next()
            .map(|row| row.into_iter().map(cell_text).collect())
            .unwrap_or_default();
        if rows.is_empty() {
            rows.push(header);
        } else {
            rows[0] = header;
        }
        Ok(())
    }

    async fn append(&self, range: &str, values: Vec<Vec<Value>>) -> Result<usize, StorageError> {
        self.cells(range)?;
        let count = values.len();
        self.appended.lock().unwrap().extend(values.iter().cloned());
        self.rows
            .lock()
            .unwrap()
            .extend(values.into_iter().map(|row| row.into_iter().map(cell_text).collect::<Vec<_>>()));
        Ok(count)
    }

    async fn clear(&self, range: &str) -> Result<(), StorageError> {
        self.cells(range)?;
        self.rows.lock().unwrap().truncate(1);
        Ok(())
    }
}

/// A backend whose every call fails, or never returns.
pub struct BrokenStorage {
    name: String,
    hangs: bool,
}

impl BrokenStorage {
    pub fn failing(name: &str) -> Self {
        Self {
            name: name.to_string(),
            hangs: false,
        }
    }

    pub fn hanging(name: &str) -> Self {
        Self {
            name: name.to_string(),
            hangs: true,
        }
    }

    async fn fail<T>(&self) -> Result<T, StorageError> {
        if self.hangs {
            std::future::pending::<()>().await;
        }
        Err(StorageError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "read-only file system",
        )))
    }
}

#[async_trait]
impl Storage for BrokenStorage {
    fn name(&self) -> &str {
        &self.name
    }

    fn location(&self) -> String {
        format!("broken://{}", self.name)
    }

    async fn save(&self, _records: &[VideoRecord]) -> Result<usize, StorageError> {
        self.fail().await
    }

    async fn load(&self) -> Result<Vec<VideoRecord>, StorageError> {
        self.fail().await
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.fail().await
    }

    fn deduplicates(&self) -> bool {
        true
    }

    async fn check_duplicates(&self, _urls: &[String]) -> Result<HashSet<String>, StorageError> {
        self.fail().await
    }
}
