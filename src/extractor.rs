//! Turns one rendered result element into a [`VideoRecord`].

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use tracing::{debug, warn};

use crate::automation::ElementHandle;
use crate::models::VideoRecord;

pub const SITE_ORIGIN: &str = "https://www.youtube.com";

/// Count inside an accessibility label, e.g. "... 1,234,567 回視聴 ..." or "1,234 views".
static LABEL_VIEWS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+(?:,\d+)*(?:\.\d+)?)\s*(?:回|views)").expect("label pattern is valid"));

/// Unit-aware count directly before a views marker, e.g. "1.2M views" or
/// "3.4万 回視聴". Other numbers on the line ("1 month ago") never match.
static META_VIEWS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d[\d,\.]*\s?(?:[KMBkmb]\b|千|万|億)?)\s*(?:回視聴|views)").expect("metadata pattern is valid")
});

/// Selectors relative to one result element.
#[derive(Debug, Clone)]
pub struct ResultSelectors {
    pub title: String,
    pub metadata: String,
    pub channel: String,
    pub upload_time: String,
}

impl Default for ResultSelectors {
    fn default() -> Self {
        Self {
            title: "#video-title".to_string(),
            metadata: "span.style-scope.ytd-video-meta-block".to_string(),
            channel: "ytd-channel-name a".to_string(),
            upload_time: "#metadata-line span:nth-child(2)".to_string(),
        }
    }
}

pub struct RecordExtractor {
    origin: Url,
    selectors: ResultSelectors,
}

impl RecordExtractor {
    pub fn new(origin: Url, selectors: ResultSelectors) -> Self {
        Self { origin, selectors }
    }

    pub fn for_site() -> Result<Self> {
        Ok(Self::new(Url::parse(SITE_ORIGIN)?, ResultSelectors::default()))
    }

    /// Extract one record. Missing title or URL, and any unexpected error,
    /// yield `None` for this element only.
    pub async fn extract(&self, element: &dyn ElementHandle) -> Option<VideoRecord> {
        match self.try_extract(element).await {
            Ok(record) => record,
            Err(e) => {
                warn!("Skipping result element: {}", e);
                None
            }
        }
    }

    async fn try_extract(&self, element: &dyn ElementHandle) -> Result<Option<VideoRecord>> {
        let Some(anchor) = element.query(&self.selectors.title).await? else {
            debug!("Result element has no title anchor");
            return Ok(None);
        };

        let title = match non_empty(anchor.attribute("title").await?) {
            Some(title) => title,
            None => match non_empty(Some(anchor.inner_text().await?)) {
                Some(title) => title,
                None => return Ok(None),
            },
        };

        let Some(url) = non_empty(anchor.attribute("href").await?).and_then(|href| self.resolve(&href)) else {
            debug!("Result '{}' has no usable link", title);
            return Ok(None);
        };

        let views_text = match self.views_from_label(anchor.as_ref()).await {
            Some(text) => Some(text),
            None => self.views_from_metadata(element).await,
        };

        let channel_name = self.optional_text(element, &self.selectors.channel).await;
        let upload_time = self.optional_text(element, &self.selectors.upload_time).await;

        Ok(Some(VideoRecord::new(title, url, views_text, channel_name, upload_time)))
    }

    fn resolve(&self, href: &str) -> Option<String> {
        self.origin.join(href).ok().map(String::from)
    }

    async fn views_from_label(&self, anchor: &dyn ElementHandle) -> Option<String> {
        let label = match anchor.attribute("aria-label").await {
            Ok(label) => label?,
            Err(e) => {
                debug!("aria-label unreadable: {}", e);
                return None;
            }
        };
        LABEL_VIEWS
            .captures(&label)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }

    async fn views_from_metadata(&self, element: &dyn ElementHandle) -> Option<String> {
        let spans = match element.query_all(&self.selectors.metadata).await {
            Ok(spans) => spans,
            Err(e) => {
                debug!("metadata line unreadable: {}", e);
                return None;
            }
        };

        for span in spans {
            let Ok(text) = span.inner_text().await else {
                continue;
            };
            if let Some(m) = META_VIEWS.captures(&text).and_then(|caps| caps.get(1)) {
                return Some(m.as_str().trim().to_string());
            }
        }
        None
    }

    /// Inner text of an optional sub-element. Absence and read errors both
    /// become `None`.
    async fn optional_text(&self, element: &dyn ElementHandle, selector: &str) -> Option<String> {
        let found = match element.query(selector).await {
            Ok(found) => found?,
            Err(e) => {
                debug!("'{}' unreadable: {}", selector, e);
                return None;
            }
        };
        match found.inner_text().await {
            Ok(text) => non_empty(Some(text)),
            Err(e) => {
                debug!("'{}' text unreadable: {}", selector, e);
                None
            }
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UNKNOWN_VIEWS;
    use crate::testing::MockElement;

    fn extractor() -> RecordExtractor {
        RecordExtractor::for_site().unwrap()
    }

    #[tokio::test]
    async fn test_full_element() {
        let element = MockElement::video(
            "Learn ChatGPT",
            "/watch?v=abc123",
            Some("Learn ChatGPT by Someone 1,234,567 回視聴 3 日前 12 分"),
            Some("Someone"),
            Some("3 日前"),
        );
        let record = extractor().extract(&element).await.unwrap();
        assert_eq!(record.title(), "Learn ChatGPT");
        assert_eq!(record.url(), "https://www.youtube.com/watch?v=abc123");
        assert_eq!(record.views_text(), "1,234,567");
        assert_eq!(record.views_count(), 1_234_567);
        assert_eq!(record.channel_name(), "Someone");
        assert_eq!(record.upload_time(), "3 日前");
    }

    #[tokio::test]
    async fn test_english_label() {
        let element = MockElement::video("t", "/watch?v=x", Some("t by c 98,765 views 2 days ago"), None, None);
        let record = extractor().extract(&element).await.unwrap();
        assert_eq!(record.views_count(), 98_765);
    }

    #[tokio::test]
    async fn test_metadata_fallback_with_units() {
        let element = MockElement::video("t", "/watch?v=x", Some("no counter here"), None, None)
            .with_meta(&["1.2M views", "1 year ago"]);
        let record = extractor().extract(&element).await.unwrap();
        assert_eq!(record.views_text(), "1.2M");
        assert_eq!(record.views_count(), 1_200_000);

        let element = MockElement::video("t", "/watch?v=x", None, None, None).with_meta(&["3.4万 回視聴"]);
        let record = extractor().extract(&element).await.unwrap();
        assert_eq!(record.views_text(), "3.4万");
        assert_eq!(record.views_count(), 34_000);
    }

    #[tokio::test]
    async fn test_metadata_count_taken_next_to_marker() {
        let element =
            MockElement::video("t", "/watch?v=x", None, None, None).with_meta(&["1 month ago • 1,234 views"]);
        let record = extractor().extract(&element).await.unwrap();
        assert_eq!(record.views_text(), "1,234");
        assert_eq!(record.views_count(), 1_234);

        let element = MockElement::video("t", "/watch?v=x", None, None, None).with_meta(&["2 billion years • 7 views"]);
        let record = extractor().extract(&element).await.unwrap();
        assert_eq!(record.views_count(), 7);
    }

    #[tokio::test]
    async fn test_metadata_without_marker_is_ignored() {
        let element = MockElement::video("t", "/watch?v=x", None, None, None).with_meta(&["2 days ago"]);
        let record = extractor().extract(&element).await.unwrap();
        assert_eq!(record.views_text(), UNKNOWN_VIEWS);
        assert_eq!(record.views_count(), 0);
    }

    #[tokio::test]
    async fn test_absolute_url_kept() {
        let element = MockElement::video("t", "https://www.youtube.com/shorts/zz", None, None, None);
        let record = extractor().extract(&element).await.unwrap();
        assert_eq!(record.url(), "https://www.youtube.com/shorts/zz");
    }

    #[tokio::test]
    async fn test_missing_mandatory_fields() {
        assert!(extractor().extract(&MockElement::video("", "/watch?v=x", None, None, None)).await.is_none());
        assert!(extractor().extract(&MockElement::video("t", "", None, None, None)).await.is_none());
        assert!(extractor().extract(&MockElement::default()).await.is_none());
    }

    #[tokio::test]
    async fn test_title_falls_back_to_text() {
        let element = MockElement::video("", "/watch?v=x", None, None, None).with_anchor_text("From text");
        let record = extractor().extract(&element).await.unwrap();
        assert_eq!(record.title(), "From text");
    }

    #[tokio::test]
    async fn test_broken_element_is_absent() {
        assert!(extractor().extract(&MockElement::broken()).await.is_none());
    }

    #[tokio::test]
    async fn test_broken_optional_field_keeps_record() {
        let element = MockElement::video("t", "/watch?v=x", None, None, None).with_broken_channel();
        let record = extractor().extract(&element).await.unwrap();
        assert_eq!(record.channel_name(), "");
    }
}
