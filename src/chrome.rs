//! Headless Chrome implementation of the automation capability set.
//!
//! Two endpoints share one code path: a locally launched browser, or a
//! remote DevTools websocket (e.g. a Browserless container).

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use headless_chrome::protocol::cdp::DOM::NodeId;
use headless_chrome::types::Bounds;
use headless_chrome::{Browser, Element, LaunchOptions, Tab};
use once_cell::sync::Lazy;
use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

use crate::automation::{AutomationDriver, BrowserSession, ElementHandle, PageHandle, PageOptions};
use crate::config::Config;

static USER_AGENTS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    ]
});

const FALLBACK_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Runs before any page script; hides the most obvious automation marker.
const INIT_SCRIPT: &str = r#"
    Object.defineProperty(navigator, 'webdriver', {
        get: () => undefined,
    });
"#;

/// The configured user agent, or one picked from the pool.
pub fn pick_user_agent(config: &Config) -> String {
    if let Some(ua) = &config.user_agent {
        return ua.clone();
    }
    USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(FALLBACK_USER_AGENT)
        .to_string()
}

/// Where sessions come from.
#[derive(Debug, Clone)]
pub enum ChromeEndpoint {
    Local { proxy_server: Option<String> },
    Remote { ws_url: String },
}

pub struct ChromeDriver {
    endpoint: ChromeEndpoint,
    window_size: (u32, u32),
    idle_timeout: Duration,
}

impl ChromeDriver {
    pub fn new(endpoint: ChromeEndpoint, window_size: (u32, u32), idle_timeout: Duration) -> Self {
        Self {
            endpoint,
            window_size,
            idle_timeout,
        }
    }

    pub fn from_config(config: &Config, remote: bool) -> Self {
        let endpoint = if remote {
            ChromeEndpoint::Remote {
                ws_url: config.browserless_url.clone(),
            }
        } else {
            ChromeEndpoint::Local {
                proxy_server: config.proxy_server.clone(),
            }
        };
        // Settle delays and selector waits must never trip the idle watchdog.
        let idle_timeout = config
            .browser_timeout
            .max(config.scroll_settle * 4)
            .max(config.results_selector_timeout * 2);
        Self::new(endpoint, (config.viewport_width, config.viewport_height), idle_timeout)
    }

    fn launch_local(window_size: (u32, u32), idle_timeout: Duration, proxy_server: Option<&str>) -> Result<Browser> {
        let proxy_arg = proxy_server.map(|p| format!("--proxy-server={p}"));
        let mut args = vec![
            std::ffi::OsStr::new("--no-sandbox"),
            std::ffi::OsStr::new("--disable-setuid-sandbox"),
            std::ffi::OsStr::new("--disable-dev-shm-usage"),
            std::ffi::OsStr::new("--disable-blink-features=AutomationControlled"),
        ];
        if let Some(ref arg) = proxy_arg {
            args.push(std::ffi::OsStr::new(arg));
        }

        Browser::new(LaunchOptions {
            headless: true,
            sandbox: false,
            window_size: Some(window_size),
            idle_browser_timeout: idle_timeout,
            args,
            ..Default::default()
        })
    }
}

/// Run a synchronous DevTools call on the blocking pool so the calling task
/// keeps yielding (and stays cancellable) while Chrome works.
async fn blocking<T, F>(call: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(call)
        .await
        .map_err(|e| anyhow!("browser task failed: {}", e))?
}

#[async_trait]
impl AutomationDriver for ChromeDriver {
    fn describe(&self) -> String {
        match &self.endpoint {
            ChromeEndpoint::Local { .. } => "local headless chrome".to_string(),
            ChromeEndpoint::Remote { ws_url } => format!("remote chrome at {ws_url}"),
        }
    }

    async fn open_session(&self) -> Result<Box<dyn BrowserSession>> {
        let endpoint = self.endpoint.clone();
        let window_size = self.window_size;
        let idle_timeout = self.idle_timeout;

        let browser = blocking(move || match endpoint {
            ChromeEndpoint::Local { proxy_server } => {
                info!("Launching local headless browser");
                Self::launch_local(window_size, idle_timeout, proxy_server.as_deref())
            }
            ChromeEndpoint::Remote { ws_url } => {
                info!(endpoint = %ws_url, "Connecting to remote browser");
                Browser::connect_with_timeout(ws_url, idle_timeout)
            }
        })
        .await?;

        Ok(Box::new(ChromeSession {
            browser: Arc::new(Mutex::new(Some(browser))),
        }))
    }
}

pub struct ChromeSession {
    browser: Arc<Mutex<Option<Browser>>>,
}

fn open_tab(browser: &Mutex<Option<Browser>>, options: &PageOptions) -> Result<Arc<Tab>> {
    let tab = {
        let guard = browser.lock().map_err(|_| anyhow!("browser handle lock poisoned"))?;
        let browser = guard.as_ref().ok_or_else(|| anyhow!("session already closed"))?;
        browser.new_tab()?
    };
    tab.set_default_timeout(options.default_timeout);
    tab.set_user_agent(&options.user_agent, None, None)?;

    let (width, height) = options.viewport;
    if let Err(e) = tab.set_bounds(Bounds::Normal {
        left: Some(0),
        top: Some(0),
        width: Some(width as f64),
        height: Some(height as f64),
    }) {
        warn!("Could not size browser window: {}", e);
    }

    tab.call_method(headless_chrome::protocol::cdp::Page::AddScriptToEvaluateOnNewDocument {
        source: INIT_SCRIPT.to_string(),
        world_name: None,
        include_command_line_api: None,
        run_immediately: None,
    })?;
    Ok(tab)
}

#[async_trait]
impl BrowserSession for ChromeSession {
    async fn new_page(&self, options: &PageOptions) -> Result<Box<dyn PageHandle>> {
        let browser = Arc::clone(&self.browser);
        let options = options.clone();
        let tab = blocking(move || open_tab(&browser, &options)).await?;
        Ok(Box::new(ChromePage { tab }))
    }

    async fn close(&self) -> Result<()> {
        let browser = self
            .browser
            .lock()
            .map_err(|_| anyhow!("browser handle lock poisoned"))?
            .take();
        // Dropping the handle kills a launched process or drops the websocket.
        if let Some(browser) = browser {
            blocking(move || {
                drop(browser);
                Ok(())
            })
            .await?;
            debug!("Browser session released");
        }
        Ok(())
    }
}

pub struct ChromePage {
    tab: Arc<Tab>,
}

fn count(tab: &Tab, selector: &str) -> Result<u64> {
    let expr = format!(
        "document.querySelectorAll({}).length",
        serde_json::to_string(selector)?
    );
    let result = tab.evaluate(&expr, false)?;
    Ok(result.value.and_then(|v| v.as_u64()).unwrap_or(0))
}

#[async_trait]
impl PageHandle for ChromePage {
    async fn goto(&self, url: &str) -> Result<()> {
        let tab = Arc::clone(&self.tab);
        let url = url.to_string();
        blocking(move || {
            tab.navigate_to(&url)?;
            tab.wait_until_navigated()?;
            Ok(())
        })
        .await
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<()> {
        let tab = Arc::clone(&self.tab);
        let selector = selector.to_string();
        blocking(move || {
            tab.wait_for_element_with_custom_timeout(&selector, timeout)?;
            Ok(())
        })
        .await
    }

    async fn query_all(&self, selector: &str) -> Result<Vec<Box<dyn ElementHandle>>> {
        let tab = Arc::clone(&self.tab);
        let selector = selector.to_string();
        let node_ids = blocking(move || {
            // find_elements reports an empty match as an error.
            if count(&tab, &selector)? == 0 {
                return Ok(Vec::new());
            }
            Ok(tab.find_elements(&selector)?.iter().map(|el| el.node_id).collect::<Vec<_>>())
        })
        .await?;
        Ok(node_ids
            .into_iter()
            .map(|node_id| ChromeElement::boxed(&self.tab, node_id))
            .collect())
    }

    async fn scroll_to_bottom(&self) -> Result<()> {
        let tab = Arc::clone(&self.tab);
        blocking(move || {
            tab.evaluate("window.scrollTo(0, document.documentElement.scrollHeight)", false)?;
            Ok(())
        })
        .await
    }

    async fn title(&self) -> Result<String> {
        let tab = Arc::clone(&self.tab);
        blocking(move || tab.get_title()).await
    }

    async fn close(&self) -> Result<()> {
        let tab = Arc::clone(&self.tab);
        blocking(move || {
            tab.close(true)?;
            Ok(())
        })
        .await
    }
}

/// Element handles are re-resolved from their node id on every call so they
/// carry no borrow of the tab.
pub struct ChromeElement {
    tab: Arc<Tab>,
    node_id: NodeId,
}

impl ChromeElement {
    fn boxed(tab: &Arc<Tab>, node_id: NodeId) -> Box<dyn ElementHandle> {
        Box::new(Self {
            tab: Arc::clone(tab),
            node_id,
        })
    }

    /// Resolve the node on the blocking pool and run `call` against it.
    async fn with_element<T, F>(&self, call: F) -> Result<T>
    where
        F: FnOnce(&Element<'_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let tab = Arc::clone(&self.tab);
        let node_id = self.node_id;
        blocking(move || {
            let element = Element::new(&tab, node_id)?;
            call(&element)
        })
        .await
    }

    fn children(&self, node_ids: Vec<NodeId>) -> Vec<Box<dyn ElementHandle>> {
        node_ids
            .into_iter()
            .map(|node_id| ChromeElement::boxed(&self.tab, node_id))
            .collect()
    }
}

#[async_trait]
impl ElementHandle for ChromeElement {
    async fn query(&self, selector: &str) -> Result<Option<Box<dyn ElementHandle>>> {
        let selector = selector.to_string();
        // A missing descendant comes back as an error, not an empty result.
        let found = self
            .with_element(move |element| Ok(element.find_element(&selector).ok().map(|child| child.node_id)))
            .await?;
        Ok(found.map(|node_id| ChromeElement::boxed(&self.tab, node_id)))
    }

    async fn query_all(&self, selector: &str) -> Result<Vec<Box<dyn ElementHandle>>> {
        let selector = selector.to_string();
        let found: Vec<NodeId> = self
            .with_element(move |element| {
                Ok(element
                    .find_elements(&selector)
                    .unwrap_or_default()
                    .iter()
                    .map(|child| child.node_id)
                    .collect())
            })
            .await?;
        Ok(self.children(found))
    }

    async fn attribute(&self, name: &str) -> Result<Option<String>> {
        let name = name.to_string();
        self.with_element(move |element| element.get_attribute_value(&name)).await
    }

    async fn inner_text(&self) -> Result<String> {
        self.with_element(|element| element.get_inner_text()).await
    }
}
