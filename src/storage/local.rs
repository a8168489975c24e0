//! JSON and CSV file backends.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info};

use super::Storage;
use crate::error::StorageError;
use crate::models::VideoRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    /// One pretty-printed JSON array, rewritten on every save.
    Json,
    /// Header plus one row per record, appended.
    Csv,
}

impl FileFormat {
    fn label(self) -> &'static str {
        match self {
            FileFormat::Json => "json",
            FileFormat::Csv => "csv",
        }
    }
}

/// Flat row shape shared by the CSV file. Missing values are empty cells.
#[derive(Debug, Serialize, Deserialize)]
struct CsvRow {
    title: String,
    url: String,
    views_text: String,
    views_count: u64,
    channel_name: String,
    upload_time: String,
    saved_at: String,
}

impl From<&VideoRecord> for CsvRow {
    fn from(record: &VideoRecord) -> Self {
        Self {
            title: record.title().to_string(),
            url: record.url().to_string(),
            views_text: record.views_text().to_string(),
            views_count: record.views_count(),
            channel_name: record.channel_name().to_string(),
            upload_time: record.upload_time().to_string(),
            saved_at: record.saved_at().map(|t| t.to_rfc3339()).unwrap_or_default(),
        }
    }
}

impl From<CsvRow> for VideoRecord {
    fn from(row: CsvRow) -> Self {
        let saved_at = DateTime::parse_from_rfc3339(&row.saved_at)
            .ok()
            .map(|t| t.with_timezone(&Local));
        VideoRecord::restored(row.title, row.url, row.views_text, row.channel_name, row.upload_time, saved_at)
    }
}

const CSV_HEADER: [&str; 7] = [
    "title",
    "url",
    "views_text",
    "views_count",
    "channel_name",
    "upload_time",
    "saved_at",
];

pub struct LocalFileStorage {
    name: String,
    path: PathBuf,
    format: FileFormat,
}

impl LocalFileStorage {
    pub fn new(path: impl Into<PathBuf>, format: FileFormat) -> Self {
        Self {
            name: format!("local-{}", format.label()),
            path: path.into(),
            format,
        }
    }

    /// `<data_dir>/youtube_results.json`
    pub fn json_in(data_dir: &Path) -> Self {
        Self::new(data_dir.join("youtube_results.json"), FileFormat::Json)
    }

    /// `<data_dir>/youtube_results.csv`
    pub fn csv_in(data_dir: &Path) -> Self {
        Self::new(data_dir.join("youtube_results.csv"), FileFormat::Csv)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> FileFormat {
        self.format
    }

    /// Copy the current file to `<dir>/<stem>_<YYYYmmdd_HHMMSS><ext>`.
    /// Returns `None` when there is no file yet.
    pub async fn backup(&self, dir: &Path) -> Result<Option<PathBuf>, StorageError> {
        if !fs::try_exists(&self.path).await? {
            return Ok(None);
        }
        fs::create_dir_all(dir).await?;

        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "backup".to_string());
        let ext = self
            .path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let target = dir.join(format!("{}_{}{}", stem, Local::now().format("%Y%m%d_%H%M%S"), ext));

        fs::copy(&self.path, &target).await?;
        info!("Backed up {} to {}", self.path.display(), target.display());
        Ok(Some(target))
    }

    async fn ensure_parent(&self) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    async fn save_json(&self, records: &[VideoRecord]) -> Result<(), StorageError> {
        let mut all = self.load_json().await?;
        all.extend_from_slice(records);
        let body = serde_json::to_vec_pretty(&all)?;
        fs::write(&self.path, body).await?;
        Ok(())
    }

    async fn load_json(&self) -> Result<Vec<VideoRecord>, StorageError> {
        if !fs::try_exists(&self.path).await? {
            return Ok(Vec::new());
        }
        let body = fs::read(&self.path).await?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_slice(&body)?)
    }

    async fn save_csv(&self, records: &[VideoRecord]) -> Result<(), StorageError> {
        let is_new = !fs::try_exists(&self.path).await? || fs::metadata(&self.path).await?.len() == 0;

        let mut writer = csv::WriterBuilder::new().has_headers(is_new).from_writer(Vec::new());
        for record in records {
            writer.serialize(CsvRow::from(record))?;
        }
        let chunk = writer.into_inner().map_err(|e| e.into_error())?;

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        tokio::io::AsyncWriteExt::write_all(&mut file, &chunk).await?;
        tokio::io::AsyncWriteExt::flush(&mut file).await?;
        Ok(())
    }

    async fn load_csv(&self) -> Result<Vec<VideoRecord>, StorageError> {
        if !fs::try_exists(&self.path).await? {
            return Ok(Vec::new());
        }
        let body = fs::read(&self.path).await?;
        let mut reader = csv::Reader::from_reader(body.as_slice());
        let mut records = Vec::new();
        for row in reader.deserialize::<CsvRow>() {
            records.push(row?.into());
        }
        Ok(records)
    }
}

#[async_trait]
impl Storage for LocalFileStorage {
    fn name(&self) -> &str {
        &self.name
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }

    async fn save(&self, records: &[VideoRecord]) -> Result<usize, StorageError> {
        if records.is_empty() {
            return Ok(0);
        }
        self.ensure_parent().await?;

        let now = Local::now();
        let stamped: Vec<VideoRecord> = records.iter().map(|r| r.stamped(now)).collect();
        match self.format {
            FileFormat::Json => self.save_json(&stamped).await?,
            FileFormat::Csv => self.save_csv(&stamped).await?,
        }

        info!("Saved {} record(s) to {}", stamped.len(), self.path.display());
        Ok(stamped.len())
    }

    async fn load(&self) -> Result<Vec<VideoRecord>, StorageError> {
        let records = match self.format {
            FileFormat::Json => self.load_json().await?,
            FileFormat::Csv => self.load_csv().await?,
        };
        debug!("Loaded {} record(s) from {}", records.len(), self.path.display());
        Ok(records)
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.ensure_parent().await?;
        match self.format {
            FileFormat::Json => fs::write(&self.path, b"[]").await?,
            FileFormat::Csv => {
                let mut writer = csv::Writer::from_writer(Vec::new());
                writer.write_record(CSV_HEADER)?;
                let body = writer.into_inner().map_err(|e| e.into_error())?;
                fs::write(&self.path, body).await?;
            }
        }
        info!("Cleared {}", self.path.display());
        Ok(())
    }
}
