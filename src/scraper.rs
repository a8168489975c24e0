use std::time::Duration;

use tracing::{info, warn};

use crate::automation::{BrowserSession, PageHandle, PageOptions};
use crate::config::Config;
use crate::error::ScrapeError;
use crate::extractor::RecordExtractor;
use crate::models::Harvest;
use crate::pagination::PaginationController;

pub const SEARCH_URL: &str = "https://www.youtube.com/results";
pub const RESULT_SELECTOR: &str = "ytd-video-renderer";

pub fn search_url(query: &str) -> String {
    format!("{}?search_query={}", SEARCH_URL, urlencoding::encode(query))
}

/// One search: open a page, load the results, harvest, close the page.
pub struct VideoSearchScraper {
    controller: PaginationController,
    page_options: PageOptions,
    selector_timeout: Duration,
}

impl VideoSearchScraper {
    pub fn new(controller: PaginationController, page_options: PageOptions, selector_timeout: Duration) -> Self {
        Self {
            controller,
            page_options,
            selector_timeout,
        }
    }

    pub fn from_config(config: &Config, page_options: PageOptions) -> Result<Self, ScrapeError> {
        let controller = PaginationController::new(
            RecordExtractor::for_site()?,
            RESULT_SELECTOR,
            config.max_stagnant_scrolls,
            config.scroll_settle,
        );
        Ok(Self::new(controller, page_options, config.results_selector_timeout))
    }

    /// Harvest up to `max_results` records for `query`. The page is closed on
    /// every path out of here.
    pub async fn search(
        &self,
        session: &dyn BrowserSession,
        query: &str,
        max_results: usize,
    ) -> Result<Harvest, ScrapeError> {
        let page = session.new_page(&self.page_options).await?;
        let result = self.run(page.as_ref(), query, max_results).await;
        if let Err(e) = page.close().await {
            warn!("Search page did not close cleanly: {}", e);
        }
        result
    }

    async fn run(&self, page: &dyn PageHandle, query: &str, max_results: usize) -> Result<Harvest, ScrapeError> {
        let url = search_url(query);
        info!("Searching for '{}' (up to {} results)", query, max_results);
        page.goto(&url).await?;

        page.wait_for_selector(RESULT_SELECTOR, self.selector_timeout)
            .await
            .map_err(|source| ScrapeError::SelectorTimeout {
                selector: RESULT_SELECTOR.to_string(),
                timeout: self.selector_timeout,
                source,
            })?;

        let harvest = self.controller.collect(page, max_results).await;
        info!(
            "Search finished: {} record(s) in {} cycle(s), {} scroll(s), {:?}",
            harvest.records.len(),
            harvest.cycles,
            harvest.scrolls,
            harvest.termination
        );
        Ok(harvest)
    }
}
