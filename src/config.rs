//! Run configuration.
//!
//! Built once at startup from the environment (after `dotenv`) and handed to
//! each component by reference. Nothing here is global.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

#[derive(Debug, Clone)]
pub struct Config {
    /// DevTools websocket of the remote automation endpoint.
    pub browserless_url: String,
    /// Service-account key as an inline JSON string.
    pub google_sheets_creds: Option<String>,
    /// Service-account key file, used when the inline form is absent.
    pub google_sheets_creds_path: Option<PathBuf>,
    pub sheet_id: Option<String>,
    pub sheet_name: String,

    pub default_search_query: String,
    pub max_results: usize,

    pub log_level: String,
    pub log_file: Option<PathBuf>,

    pub max_retries: u32,
    pub retry_delay: Duration,

    pub browser_timeout: Duration,
    pub viewport_width: u32,
    pub viewport_height: u32,
    /// Fixed user agent. `None` picks one from the built-in pool per session.
    pub user_agent: Option<String>,
    /// `--proxy-server` for locally launched browsers.
    pub proxy_server: Option<String>,

    pub max_stagnant_scrolls: u32,
    pub scroll_settle: Duration,
    pub results_selector_timeout: Duration,

    pub storage_timeout: Duration,
    pub data_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            browserless_url: "ws://localhost:3000".to_string(),
            google_sheets_creds: None,
            google_sheets_creds_path: None,
            sheet_id: None,
            sheet_name: "Sheet1".to_string(),
            default_search_query: "ChatGPT".to_string(),
            max_results: 50,
            log_level: "info".to_string(),
            log_file: Some(PathBuf::from("logs/scraper.log")),
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            browser_timeout: Duration::from_millis(30_000),
            viewport_width: 1920,
            viewport_height: 1080,
            user_agent: None,
            proxy_server: None,
            max_stagnant_scrolls: 10,
            scroll_settle: Duration::from_millis(2_000),
            results_selector_timeout: Duration::from_millis(10_000),
            storage_timeout: Duration::from_secs(60),
            data_dir: PathBuf::from("data"),
        }
    }
}

impl Config {
    /// Read the process environment. Call `dotenv().ok()` first if a `.env`
    /// file should be honoured.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary key lookup. Unset or blank keys fall back to
    /// the defaults; present but malformed numbers are an error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        let retry_delay_secs: f64 = parse_or(&get, "RETRY_DELAY_SECS", defaults.retry_delay.as_secs_f64())?;
        let retry_delay = Duration::try_from_secs_f64(retry_delay_secs).map_err(|_| ConfigError::Invalid {
            name: "RETRY_DELAY_SECS",
            value: retry_delay_secs.to_string(),
        })?;

        let log_file = match lookup("LOG_FILE") {
            // Explicitly blank disables file logging.
            Some(v) if v.trim().is_empty() => None,
            Some(v) => Some(PathBuf::from(v.trim())),
            None => defaults.log_file,
        };

        let max_retries: u32 = parse_or(&get, "MAX_RETRIES", defaults.max_retries)?;
        if max_retries == 0 {
            return Err(ConfigError::Invalid {
                name: "MAX_RETRIES",
                value: "0".to_string(),
            });
        }

        Ok(Self {
            browserless_url: get("BROWSERLESS_URL").unwrap_or(defaults.browserless_url),
            google_sheets_creds: get("GOOGLE_SHEETS_CREDS"),
            google_sheets_creds_path: get("GOOGLE_SHEETS_CREDS_PATH").map(PathBuf::from),
            sheet_id: get("SHEET_ID"),
            sheet_name: get("SHEET_NAME").unwrap_or(defaults.sheet_name),
            default_search_query: get("DEFAULT_SEARCH_QUERY").unwrap_or(defaults.default_search_query),
            max_results: parse_or(&get, "MAX_RESULTS", defaults.max_results)?,
            log_level: get("LOG_LEVEL").unwrap_or(defaults.log_level),
            log_file,
            max_retries,
            retry_delay,
            browser_timeout: Duration::from_millis(parse_or(
                &get,
                "BROWSER_TIMEOUT_MS",
                defaults.browser_timeout.as_millis() as u64,
            )?),
            viewport_width: parse_or(&get, "VIEWPORT_WIDTH", defaults.viewport_width)?,
            viewport_height: parse_or(&get, "VIEWPORT_HEIGHT", defaults.viewport_height)?,
            user_agent: get("USER_AGENT"),
            proxy_server: get("PROXY_SERVER"),
            max_stagnant_scrolls: parse_or(&get, "MAX_STAGNANT_SCROLLS", defaults.max_stagnant_scrolls)?,
            scroll_settle: Duration::from_millis(parse_or(
                &get,
                "SCROLL_SETTLE_MS",
                defaults.scroll_settle.as_millis() as u64,
            )?),
            results_selector_timeout: Duration::from_millis(parse_or(
                &get,
                "RESULTS_SELECTOR_TIMEOUT_MS",
                defaults.results_selector_timeout.as_millis() as u64,
            )?),
            storage_timeout: Duration::from_secs(parse_or(
                &get,
                "STORAGE_TIMEOUT_SECS",
                defaults.storage_timeout.as_secs(),
            )?),
            data_dir: get("DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
        })
    }
}

fn parse_or<T, G>(get: &G, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid { name, value: raw }),
        None => Ok(default),
    }
}
