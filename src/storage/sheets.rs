//! Google Sheets backend over the v4 values API.
//!
//! Rows are appended under a fixed Japanese header. The URL column doubles as
//! the dedup key, so `check_duplicates` only ever reads column B.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{Local, NaiveDateTime, TimeZone};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::Storage;
use crate::config::Config;
use crate::error::{ConfigError, StorageError};
use crate::models::VideoRecord;

pub const HEADER: [&str; 7] = [
    "タイトル",
    "URL",
    "再生数",
    "再生数（数値）",
    "チャンネル名",
    "投稿日時",
    "取得日時",
];

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const SHEETS_API: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
/// Header cells go through the sheet's own parsing; data rows are stored
/// verbatim so a title like "=1+1" or a counter like "1/2" stays text.
const UPDATE_SUFFIX: &str = "?valueInputOption=USER_ENTERED";
const APPEND_SUFFIX: &str = ":append?valueInputOption=RAW&insertDataOption=INSERT_ROWS";

/// The four value-range calls the backend needs. Cells go out as JSON values
/// and come back as display strings.
#[async_trait]
pub trait ValuesApi: Send + Sync {
    async fn get(&self, range: &str) -> Result<Vec<Vec<String>>, StorageError>;
    async fn update(&self, range: &str, rows: Vec<Vec<Value>>) -> Result<(), StorageError>;
    /// Returns the number of rows the API reports as appended.
    async fn append(&self, range: &str, rows: Vec<Vec<Value>>) -> Result<usize, StorageError>;
    async fn clear(&self, range: &str) -> Result<(), StorageError>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expiry")]
    expires_in: u64,
}

fn default_expiry() -> u64 {
    3600
}

/// Service-account OAuth: a signed JWT assertion exchanged for a bearer
/// token, cached until shortly before it expires.
pub struct ServiceAccountAuth {
    key: ServiceAccountKey,
    http: reqwest::Client,
    cached: Mutex<Option<(String, Instant)>>,
}

impl ServiceAccountAuth {
    pub fn new(key: ServiceAccountKey, http: reqwest::Client) -> Self {
        Self {
            key,
            http,
            cached: Mutex::new(None),
        }
    }

    pub async fn token(&self) -> Result<String, StorageError> {
        let mut cached = self.cached.lock().await;
        if let Some((token, valid_until)) = cached.as_ref() {
            if Instant::now() < *valid_until {
                return Ok(token.clone());
            }
        }

        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            iss: &self.key.client_email,
            scope: SCOPE,
            aud: &self.key.token_uri,
            iat: now,
            exp: now + 3600,
        };
        let signing_key = EncodingKey::from_rsa_pem(self.key.private_key.as_bytes())?;
        let assertion = encode(&Header::new(Algorithm::RS256), &claims, &signing_key)?;

        let response = self
            .http
            .post(&self.key.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(StorageError::Auth(format!("token exchange failed ({status}): {message}")));
        }

        let token: TokenResponse = response.json().await?;
        // Refresh a minute early.
        let lifetime = Duration::from_secs(token.expires_in.saturating_sub(60));
        *cached = Some((token.access_token.clone(), Instant::now() + lifetime));
        debug!("Obtained Sheets access token for {}", self.key.client_email);
        Ok(token.access_token)
    }
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppendResponse {
    #[serde(default)]
    updates: Option<AppendUpdates>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppendUpdates {
    #[serde(default)]
    updated_rows: usize,
}

/// `ValuesApi` against the real endpoint.
pub struct SheetsClient {
    http: reqwest::Client,
    auth: ServiceAccountAuth,
    spreadsheet_id: String,
}

impl SheetsClient {
    pub fn new(key: ServiceAccountKey, spreadsheet_id: impl Into<String>, timeout: Duration) -> Result<Self, StorageError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            auth: ServiceAccountAuth::new(key, http.clone()),
            http,
            spreadsheet_id: spreadsheet_id.into(),
        })
    }

    fn values_url(&self, range: &str, suffix: &str) -> String {
        format!(
            "{}/{}/values/{}{}",
            SHEETS_API,
            self.spreadsheet_id,
            urlencoding::encode(range),
            suffix
        )
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, StorageError> {
        let token = self.auth.token().await?;
        let response = request.bearer_auth(token).send().await?;
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        Err(StorageError::Api { status, message })
    }
}

pub(crate) fn cell_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[async_trait]
impl ValuesApi for SheetsClient {
    async fn get(&self, range: &str) -> Result<Vec<Vec<String>>, StorageError> {
        let request = self.http.get(self.values_url(range, ""));
        let body: ValueRange = self.send(request).await?.json().await?;
        Ok(body
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_text).collect())
            .collect())
    }

    async fn update(&self, range: &str, rows: Vec<Vec<Value>>) -> Result<(), StorageError> {
        let request = self
            .http
            .put(self.values_url(range, UPDATE_SUFFIX))
            .json(&json!({ "range": range, "values": rows }));
        self.send(request).await?;
        Ok(())
    }

    async fn append(&self, range: &str, rows: Vec<Vec<Value>>) -> Result<usize, StorageError> {
        let expected = rows.len();
        let request = self
            .http
            .post(self.values_url(range, APPEND_SUFFIX))
            .json(&json!({ "values": rows }));
        let body: AppendResponse = self.send(request).await?.json().await?;
        Ok(body.updates.map(|u| u.updated_rows).unwrap_or(expected))
    }

    async fn clear(&self, range: &str) -> Result<(), StorageError> {
        let request = self.http.post(self.values_url(range, ":clear")).json(&json!({}));
        self.send(request).await?;
        Ok(())
    }
}

pub struct SheetsStorage {
    api: Box<dyn ValuesApi>,
    spreadsheet_id: String,
    sheet_name: String,
}

impl SheetsStorage {
    pub fn new(api: Box<dyn ValuesApi>, spreadsheet_id: impl Into<String>, sheet_name: impl Into<String>) -> Self {
        Self {
            api,
            spreadsheet_id: spreadsheet_id.into(),
            sheet_name: sheet_name.into(),
        }
    }

    /// Build the real client from `SHEET_ID` and the service-account key,
    /// inline or from file.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let sheet_id = config.sheet_id.clone().ok_or(ConfigError::Missing("SHEET_ID"))?;
        let key = load_key(config)?;
        let client = SheetsClient::new(key, sheet_id.clone(), config.storage_timeout).map_err(|e| {
            ConfigError::Invalid {
                name: "GOOGLE_SHEETS_CREDS",
                value: e.to_string(),
            }
        })?;
        Ok(Self::new(Box::new(client), sheet_id, config.sheet_name.clone()))
    }

    pub fn sheet_url(&self) -> String {
        format!("https://docs.google.com/spreadsheets/d/{}", self.spreadsheet_id)
    }

    /// A1 range on this sheet. The name is always quoted so spaces and
    /// punctuation in it survive.
    fn range(&self, cells: &str) -> String {
        format!("'{}'!{}", self.sheet_name.replace('\'', "''"), cells)
    }

    /// Write the header row when `A1:G1` is empty.
    pub async fn ensure_header(&self) -> Result<(), StorageError> {
        let first = self.api.get(&self.range("A1:G1")).await?;
        let present = first.first().map(|row| row.iter().any(|c| !c.is_empty())).unwrap_or(false);
        if !present {
            let header = vec![HEADER.iter().map(|h| json!(h)).collect()];
            self.api.update(&self.range("A1:G1"), header).await?;
            info!("Created header row in {}", self.sheet_name);
        }
        Ok(())
    }

    fn to_row(record: &VideoRecord) -> Vec<Value> {
        let saved_at = record.saved_at().unwrap_or_else(Local::now);
        vec![
            json!(record.title()),
            json!(record.url()),
            json!(record.views_text()),
            json!(record.views_count()),
            json!(record.channel_name()),
            json!(record.upload_time()),
            json!(saved_at.format(TIMESTAMP_FORMAT).to_string()),
        ]
    }
}

fn load_key(config: &Config) -> Result<ServiceAccountKey, ConfigError> {
    let (raw, source) = match (&config.google_sheets_creds, &config.google_sheets_creds_path) {
        (Some(inline), _) => (inline.clone(), "GOOGLE_SHEETS_CREDS"),
        (None, Some(path)) => (read_key_file(path)?, "GOOGLE_SHEETS_CREDS_PATH"),
        (None, None) => return Err(ConfigError::Missing("GOOGLE_SHEETS_CREDS")),
    };
    // The key itself is never echoed back into errors.
    serde_json::from_str(&raw).map_err(|e| ConfigError::Invalid {
        name: source,
        value: format!("not a service-account key ({e})"),
    })
}

fn read_key_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
        path: path.display().to_string(),
        source,
    })
}

fn parse_saved_at(text: &str) -> Option<chrono::DateTime<Local>> {
    let naive = NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT).ok()?;
    Local.from_local_datetime(&naive).single()
}

#[async_trait]
impl Storage for SheetsStorage {
    fn name(&self) -> &str {
        "google-sheets"
    }

    fn location(&self) -> String {
        self.sheet_url()
    }

    async fn save(&self, records: &[VideoRecord]) -> Result<usize, StorageError> {
        if records.is_empty() {
            return Ok(0);
        }
        self.ensure_header().await?;
        let rows: Vec<Vec<Value>> = records.iter().map(Self::to_row).collect();
        let written = self.api.append(&self.range("A:G"), rows).await?;
        info!("Appended {} row(s) to {}", written, self.sheet_name);
        Ok(written)
    }

    async fn load(&self) -> Result<Vec<VideoRecord>, StorageError> {
        let mut rows = self.api.get(&self.range("A:G")).await?.into_iter();
        let Some(header) = rows.next() else {
            return Ok(Vec::new());
        };
        let columns: HashMap<&str, usize> = header
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();
        let cell = |row: &[String], name: &str| -> String {
            columns
                .get(name)
                .and_then(|&i| row.get(i))
                .cloned()
                .unwrap_or_default()
        };

        let mut records = Vec::new();
        for row in rows {
            let title = cell(&row, HEADER[0]);
            let url = cell(&row, HEADER[1]);
            if title.is_empty() || url.is_empty() {
                warn!("Skipping incomplete sheet row");
                continue;
            }
            records.push(VideoRecord::restored(
                title,
                url,
                cell(&row, HEADER[2]),
                cell(&row, HEADER[4]),
                cell(&row, HEADER[5]),
                parse_saved_at(&cell(&row, HEADER[6])),
            ));
        }
        Ok(records)
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.api.clear(&self.range("A2:G")).await?;
        info!("Cleared data rows of {}", self.sheet_name);
        Ok(())
    }

    fn deduplicates(&self) -> bool {
        true
    }

    async fn check_duplicates(&self, urls: &[String]) -> Result<HashSet<String>, StorageError> {
        let column = self.api.get(&self.range("B:B")).await?;
        let stored: HashSet<String> = column
            .into_iter()
            .skip(1)
            .filter_map(|row| row.into_iter().next())
            .collect();
        Ok(urls.iter().filter(|url| stored.contains(*url)).cloned().collect())
    }
}
