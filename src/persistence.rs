//! Fans harvested records out to every configured backend.
//!
//! Each backend runs under its own timeout and its own error boundary; the
//! caller gets one [`BackendOutcome`] per backend instead of a single flag.

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use chrono::Local;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::StorageError;
use crate::models::VideoRecord;
use crate::storage::{LocalFileStorage, SheetsStorage, Storage};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendStatus {
    Success { written: usize, duplicates_skipped: usize },
    /// Never attempted, e.g. missing credentials.
    Skipped { reason: String },
    Failed { reason: String },
}

#[derive(Debug, Clone)]
pub struct BackendOutcome {
    pub backend: String,
    pub location: Option<String>,
    pub status: BackendStatus,
}

impl BackendOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.status, BackendStatus::Success { .. })
    }
}

impl fmt::Display for BackendOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.status {
            BackendStatus::Success {
                written,
                duplicates_skipped,
            } => write!(
                f,
                "{}: saved {} record(s), skipped {} duplicate(s)",
                self.backend, written, duplicates_skipped
            )?,
            BackendStatus::Skipped { reason } => write!(f, "{}: skipped ({})", self.backend, reason)?,
            BackendStatus::Failed { reason } => write!(f, "{}: failed ({})", self.backend, reason)?,
        }
        if let Some(location) = &self.location {
            write!(f, " [{}]", location)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct PersistReport {
    pub outcomes: Vec<BackendOutcome>,
}

impl PersistReport {
    pub fn any_success(&self) -> bool {
        self.outcomes.iter().any(BackendOutcome::is_success)
    }

    pub fn outcome(&self, backend: &str) -> Option<&BackendOutcome> {
        self.outcomes.iter().find(|o| o.backend == backend)
    }

    pub fn total_written(&self) -> usize {
        self.outcomes
            .iter()
            .map(|o| match o.status {
                BackendStatus::Success { written, .. } => written,
                _ => 0,
            })
            .sum()
    }
}

/// A backend as configured: usable, or known-unusable with a reason.
pub enum BackendSlot {
    Ready(Box<dyn Storage>),
    Unavailable { name: String, reason: String },
}

impl BackendSlot {
    fn name(&self) -> &str {
        match self {
            BackendSlot::Ready(storage) => storage.name(),
            BackendSlot::Unavailable { name, .. } => name,
        }
    }
}

/// Which backend families the caller asked for.
#[derive(Debug, Clone, Copy)]
pub struct BackendSelection {
    pub local: bool,
    pub sheets: bool,
}

pub struct PersistenceCoordinator {
    backends: Vec<BackendSlot>,
    call_timeout: Duration,
}

impl PersistenceCoordinator {
    pub fn new(backends: Vec<BackendSlot>, call_timeout: Duration) -> Self {
        Self {
            backends,
            call_timeout,
        }
    }

    /// Local JSON and CSV files under `data_dir`, plus the spreadsheet when
    /// selected. A spreadsheet without usable settings becomes `Unavailable`
    /// rather than an error.
    pub fn from_config(config: &Config, selection: BackendSelection) -> Self {
        let mut backends = Vec::new();
        if selection.local {
            backends.push(BackendSlot::Ready(Box::new(LocalFileStorage::json_in(&config.data_dir))));
            backends.push(BackendSlot::Ready(Box::new(LocalFileStorage::csv_in(&config.data_dir))));
        }
        if selection.sheets {
            match SheetsStorage::from_config(config) {
                Ok(sheets) => backends.push(BackendSlot::Ready(Box::new(sheets))),
                Err(e) => {
                    warn!("Google Sheets disabled: {}", e);
                    backends.push(BackendSlot::Unavailable {
                        name: "google-sheets".to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        Self::new(backends, config.storage_timeout)
    }

    pub fn backend_names(&self) -> Vec<&str> {
        self.backends.iter().map(BackendSlot::name).collect()
    }

    /// Stamp `records` with one `saved_at` and write them to every backend in
    /// turn. Never fails as a whole.
    pub async fn persist(&self, records: &[VideoRecord]) -> PersistReport {
        let now = Local::now();
        let stamped: Vec<VideoRecord> = records.iter().map(|r| r.stamped(now)).collect();

        let mut report = PersistReport::default();
        for slot in &self.backends {
            let outcome = match slot {
                BackendSlot::Unavailable { name, reason } => BackendOutcome {
                    backend: name.clone(),
                    location: None,
                    status: BackendStatus::Skipped { reason: reason.clone() },
                },
                BackendSlot::Ready(storage) => {
                    let status = match timeout(self.call_timeout, write(storage.as_ref(), &stamped)).await {
                        Ok(Ok(status)) => status,
                        Ok(Err(e)) => BackendStatus::Failed { reason: e.to_string() },
                        Err(_) => BackendStatus::Failed {
                            reason: StorageError::Timeout(self.call_timeout).to_string(),
                        },
                    };
                    BackendOutcome {
                        backend: storage.name().to_string(),
                        location: Some(storage.location()),
                        status,
                    }
                }
            };

            match &outcome.status {
                BackendStatus::Success { .. } => info!("{}", outcome),
                BackendStatus::Skipped { .. } => warn!("{}", outcome),
                BackendStatus::Failed { .. } => error!("{}", outcome),
            }
            report.outcomes.push(outcome);
        }
        report
    }
}

/// One backend's write, including the duplicate filter for backends that
/// ask for it.
async fn write(storage: &dyn Storage, records: &[VideoRecord]) -> Result<BackendStatus, StorageError> {
    if !storage.deduplicates() {
        let written = storage.save(records).await?;
        return Ok(BackendStatus::Success {
            written,
            duplicates_skipped: 0,
        });
    }

    let urls: Vec<String> = records.iter().map(|r| r.url().to_string()).collect();
    let existing = storage.check_duplicates(&urls).await?;

    // Repeats inside the batch count as duplicates too.
    let mut taken: HashSet<&str> = HashSet::new();
    let fresh: Vec<VideoRecord> = records
        .iter()
        .filter(|r| !existing.contains(r.url()) && taken.insert(r.url()))
        .cloned()
        .collect();
    let duplicates_skipped = records.len() - fresh.len();
    if duplicates_skipped > 0 {
        info!("{}: {} duplicate(s) skipped", storage.name(), duplicates_skipped);
    }

    let written = if fresh.is_empty() { 0 } else { storage.save(&fresh).await? };
    Ok(BackendStatus::Success {
        written,
        duplicates_skipped,
    })
}
