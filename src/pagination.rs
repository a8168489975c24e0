use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::automation::PageHandle;
use crate::extractor::RecordExtractor;
use crate::models::{Harvest, Termination};

/// Scroll-and-harvest loop over an infinite-scroll result list.
pub struct PaginationController {
    extractor: RecordExtractor,
    item_selector: String,
    max_stagnant_scrolls: u32,
    settle_delay: Duration,
}

impl PaginationController {
    pub fn new(
        extractor: RecordExtractor,
        item_selector: impl Into<String>,
        max_stagnant_scrolls: u32,
        settle_delay: Duration,
    ) -> Self {
        Self {
            extractor,
            item_selector: item_selector.into(),
            max_stagnant_scrolls,
            settle_delay,
        }
    }

    /// Harvest up to `target` records in DOM order.
    ///
    /// Each cycle extracts only elements past the ones already seen. A cycle
    /// that adds nothing scrolls to the bottom, waits the settle delay and
    /// counts as stagnant; any growth resets the streak. The run ends at
    /// `target` records or after `max_stagnant_scrolls` consecutive stagnant
    /// cycles. A page failure mid-run ends it early with what was collected.
    pub async fn collect(&self, page: &dyn PageHandle, target: usize) -> Harvest {
        let mut harvest = Harvest {
            records: Vec::with_capacity(target.min(256)),
            termination: Termination::TargetReached,
            cycles: 0,
            scrolls: 0,
            peak_stagnant: 0,
        };
        let mut seen = 0usize;
        let mut stagnant = 0u32;

        loop {
            if harvest.records.len() >= target {
                harvest.termination = Termination::TargetReached;
                break;
            }
            if stagnant >= self.max_stagnant_scrolls {
                harvest.termination = Termination::Exhausted;
                break;
            }

            let elements = match page.query_all(&self.item_selector).await {
                Ok(elements) => elements,
                Err(e) => {
                    warn!("Result list unreadable, stopping early: {}", e);
                    harvest.termination = Termination::Aborted(e.to_string());
                    break;
                }
            };

            let before = harvest.records.len();
            for element in elements.iter().skip(seen) {
                if harvest.records.len() >= target {
                    break;
                }
                seen += 1;
                if let Some(record) = self.extractor.extract(element.as_ref()).await {
                    debug!("Harvested: {}", record.title());
                    harvest.records.push(record);
                }
            }
            harvest.cycles += 1;

            if harvest.records.len() == before {
                if let Err(e) = page.scroll_to_bottom().await {
                    warn!("Scroll failed, stopping early: {}", e);
                    harvest.termination = Termination::Aborted(e.to_string());
                    break;
                }
                sleep(self.settle_delay).await;
                harvest.scrolls += 1;
                stagnant += 1;
                harvest.peak_stagnant = harvest.peak_stagnant.max(stagnant);
            } else {
                stagnant = 0;
            }

            info!(
                "Harvested {}/{} (elements seen: {}, stagnant scrolls: {})",
                harvest.records.len(),
                target,
                seen,
                stagnant
            );
        }

        harvest
    }
}
