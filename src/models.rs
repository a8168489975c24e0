use std::time::Instant;

use chrono::{DateTime, Local};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::counter::parse_count;

/// Stored in `views_text` when neither counter source yielded anything.
pub const UNKNOWN_VIEWS: &str = "不明";

static PROCESS_START: Lazy<Instant> = Lazy::new(Instant::now);

/// Seconds since the first record of this process was captured. Monotonic,
/// only meaningful for ordering within one run.
pub fn capture_instant() -> f64 {
    PROCESS_START.elapsed().as_secs_f64()
}

/// One extracted search result.
///
/// Fields are private: a record is immutable once the extractor hands it out.
/// `views_count` is always derived from `views_text`, and persistence may only
/// attach `saved_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "StoredRecord")]
pub struct VideoRecord {
    title: String,
    url: String,
    views_text: String,
    views_count: u64,
    channel_name: String,
    upload_time: String,
    scrape_timestamp: f64,
    saved_at: Option<DateTime<Local>>,
}

/// On-disk shape of a record. A stored `views_count` is ignored; the count
/// is re-derived from `views_text`.
#[derive(Deserialize)]
struct StoredRecord {
    title: String,
    url: String,
    views_text: String,
    #[serde(default)]
    channel_name: String,
    #[serde(default)]
    upload_time: String,
    #[serde(default)]
    scrape_timestamp: f64,
    #[serde(default)]
    saved_at: Option<DateTime<Local>>,
}

impl From<StoredRecord> for VideoRecord {
    fn from(stored: StoredRecord) -> Self {
        let mut record = VideoRecord::restored(
            stored.title,
            stored.url,
            stored.views_text,
            stored.channel_name,
            stored.upload_time,
            stored.saved_at,
        );
        record.scrape_timestamp = stored.scrape_timestamp;
        record
    }
}

impl VideoRecord {
    /// Build a freshly captured record. A missing counter becomes the
    /// [`UNKNOWN_VIEWS`] sentinel; missing optional text becomes empty.
    pub fn new(
        title: impl Into<String>,
        url: impl Into<String>,
        views_text: Option<String>,
        channel_name: Option<String>,
        upload_time: Option<String>,
    ) -> Self {
        let views_count = parse_count(views_text.as_deref());
        Self {
            title: title.into(),
            url: url.into(),
            views_text: views_text.unwrap_or_else(|| UNKNOWN_VIEWS.to_string()),
            views_count,
            channel_name: channel_name.unwrap_or_default(),
            upload_time: upload_time.unwrap_or_default(),
            scrape_timestamp: capture_instant(),
            saved_at: None,
        }
    }

    /// Rebuild a record read back from a backend. The count is re-derived so
    /// a hand-edited file cannot break the text/count invariant.
    pub fn restored(
        title: String,
        url: String,
        views_text: String,
        channel_name: String,
        upload_time: String,
        saved_at: Option<DateTime<Local>>,
    ) -> Self {
        let views_count = parse_count(Some(&views_text));
        Self {
            title,
            url,
            views_text,
            views_count,
            channel_name,
            upload_time,
            scrape_timestamp: 0.0,
            saved_at,
        }
    }

    /// Copy of this record with `saved_at` attached. An existing stamp is kept.
    pub fn stamped(&self, at: DateTime<Local>) -> Self {
        let mut record = self.clone();
        record.saved_at.get_or_insert(at);
        record
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn views_text(&self) -> &str {
        &self.views_text
    }

    pub fn views_count(&self) -> u64 {
        self.views_count
    }

    pub fn channel_name(&self) -> &str {
        &self.channel_name
    }

    pub fn upload_time(&self) -> &str {
        &self.upload_time
    }

    pub fn scrape_timestamp(&self) -> f64 {
        self.scrape_timestamp
    }

    pub fn saved_at(&self) -> Option<DateTime<Local>> {
        self.saved_at
    }
}

/// Why a pagination run stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum Termination {
    /// `target` records were harvested.
    TargetReached,
    /// The stagnant-scroll budget ran out first. A partial result, not an error.
    Exhausted,
    /// The page itself failed mid-run; `records` holds what came before.
    Aborted(String),
}

/// Output of one pagination run.
#[derive(Debug, Clone)]
pub struct Harvest {
    pub records: Vec<VideoRecord>,
    pub termination: Termination,
    pub cycles: u32,
    pub scrolls: u32,
    /// Highest stagnant-scroll streak observed during the run.
    pub peak_stagnant: u32,
}

impl Harvest {
    pub fn is_complete(&self) -> bool {
        self.termination == Termination::TargetReached
    }
}
