use std::time::Duration;

use thiserror::Error;

/// Session establishment failures. Only `Exhausted` and `Terminal` ever reach
/// the caller of `ConnectionManager::connect`.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("could not open a browser session after {attempts} attempt(s): {last}")]
    Exhausted { attempts: u32, last: anyhow::Error },

    #[error("connection manager is in the failed state; create a new one to retry")]
    Terminal,
}

/// Page-level failures of a scrape. Per-element extraction problems never
/// show up here; they are absorbed by the extractor.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("result selector '{selector}' did not appear within {timeout:?}: {source}")]
    SelectorTimeout {
        selector: String,
        timeout: Duration,
        #[source]
        source: anyhow::Error,
    },

    #[error("automation error: {0}")]
    Automation(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("backend did not answer within {0:?}")]
    Timeout(Duration),
}

impl From<reqwest::Error> for StorageError {
    fn from(err: reqwest::Error) -> Self {
        StorageError::Network(err.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for StorageError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        StorageError::Auth(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: '{value}'")]
    Invalid { name: &'static str, value: String },

    #[error("could not read {path}: {source}")]
    Unreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
