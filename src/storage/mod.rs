//! Persistence backends.

pub mod local;
pub mod sheets;

use std::collections::HashSet;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::models::VideoRecord;

pub use local::{FileFormat, LocalFileStorage};
pub use sheets::{SheetsClient, SheetsStorage, ValuesApi};

#[async_trait]
pub trait Storage: Send + Sync {
    /// Short backend name used in logs and outcome reports.
    fn name(&self) -> &str;

    /// File path, sheet URL, or similar.
    fn location(&self) -> String;

    /// Write `records` and return how many were written.
    async fn save(&self, records: &[VideoRecord]) -> Result<usize, StorageError>;

    async fn load(&self) -> Result<Vec<VideoRecord>, StorageError>;

    /// Remove stored records, keeping whatever schema/header the backend needs.
    async fn clear(&self) -> Result<(), StorageError>;

    /// Whether the coordinator should filter by `check_duplicates` before saving.
    fn deduplicates(&self) -> bool {
        false
    }

    /// The subset of `urls` already stored.
    async fn check_duplicates(&self, _urls: &[String]) -> Result<HashSet<String>, StorageError> {
        Ok(HashSet::new())
    }
}
