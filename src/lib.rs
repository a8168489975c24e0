pub mod automation;
pub mod chrome;
pub mod config;
pub mod connection;
pub mod counter;
pub mod error;
pub mod extractor;
pub mod models;
pub mod pagination;
pub mod persistence;
pub mod scraper;
pub mod storage;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod testing;

use std::time::Duration;

use automation::PageOptions;
use config::Config;

/// Page setup shared by scrapes and health checks.
pub fn page_options(config: &Config) -> PageOptions {
    PageOptions {
        viewport: (config.viewport_width, config.viewport_height),
        user_agent: chrome::pick_user_agent(config),
        default_timeout: config.browser_timeout.max(Duration::from_secs(1)),
    }
}
