use super::{CrawlRequest, MalformedMessage};
use crate::extract::ExtractedArticle;
use crate::fetcher::FetchErrorKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Error code persisted when a result carries none
pub const UNKNOWN_ERROR: &str = "unknown_error";

/// Outcome of one crawl request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Ok,
    Error,
}

/// Why a request produced an error result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Timeout,
    MaxBytesExceeded,
    RobotsDisallowed,
    DownloadFailed,
    /// Non-2xx final status, rendered as `http_<status>`
    Http(u16),
    ExtractionFailed,
    Unknown,
}

impl ErrorCode {
    pub fn as_string(&self) -> String {
        match self {
            Self::Timeout => "timeout".to_string(),
            Self::MaxBytesExceeded => "max_bytes_exceeded".to_string(),
            Self::RobotsDisallowed => "robots_disallowed".to_string(),
            Self::DownloadFailed => "download_failed".to_string(),
            Self::Http(status) => format!("http_{}", status),
            Self::ExtractionFailed => "extraction_failed".to_string(),
            Self::Unknown => UNKNOWN_ERROR.to_string(),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_string())
    }
}

impl From<FetchErrorKind> for ErrorCode {
    fn from(kind: FetchErrorKind) -> Self {
        match kind {
            FetchErrorKind::Timeout => Self::Timeout,
            FetchErrorKind::MaxBytesExceeded => Self::MaxBytesExceeded,
            FetchErrorKind::RobotsDisallowed => Self::RobotsDisallowed,
            FetchErrorKind::DownloadFailed => Self::DownloadFailed,
        }
    }
}

/// Result message published on the results topic
///
/// Invariants: `status == Ok` implies `error` is `None`; `status == Error`
/// implies `text` is empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlResult {
    pub job_id: String,
    /// The request URL in its parsed, normalized form
    ///
    /// Host case and an empty path are normalized when the request is
    /// decoded, so `http://Example.com` comes back as `http://example.com/`.
    /// Stored outcomes are keyed on this form.
    pub url: String,
    pub status: ResultStatus,

    #[serde(default)]
    pub http_status: Option<u16>,

    #[serde(default = "Utc::now")]
    pub fetched_at: DateTime<Utc>,

    #[serde(default)]
    pub canonical_url: Option<String>,

    #[serde(default)]
    pub title: Option<String>,

    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub author: Option<String>,

    #[serde(default)]
    pub language: Option<String>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<String>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub text: String,

    #[serde(default)]
    pub error: Option<String>,

    #[serde(default)]
    pub requested_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub worker_fetched_at: Option<DateTime<Utc>>,
}

impl CrawlResult {
    /// Successful result built from an extracted article
    pub fn ok(
        request: &CrawlRequest,
        http_status: u16,
        article: ExtractedArticle,
        worker_fetched_at: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id: request.job_id.clone(),
            url: request.url.to_string(),
            status: ResultStatus::Ok,
            http_status: Some(http_status),
            fetched_at: Utc::now(),
            canonical_url: article.canonical_url,
            title: article.title,
            published_at: article.published_at,
            author: article.author,
            language: article.language,
            tags: article.tags,
            text: article.text.unwrap_or_default(),
            error: None,
            requested_at: request.requested_at,
            worker_fetched_at: Some(worker_fetched_at),
        }
    }

    /// Error result with every article field empty
    pub fn error(
        request: &CrawlRequest,
        code: ErrorCode,
        http_status: Option<u16>,
        worker_fetched_at: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id: request.job_id.clone(),
            url: request.url.to_string(),
            status: ResultStatus::Error,
            http_status,
            fetched_at: Utc::now(),
            canonical_url: None,
            title: None,
            published_at: None,
            author: None,
            language: None,
            tags: Vec::new(),
            text: String::new(),
            error: Some(code.as_string()),
            requested_at: request.requested_at,
            worker_fetched_at: Some(worker_fetched_at),
        }
    }

    /// Decodes a result payload, rejecting ones without a job id or URL
    pub fn from_slice(payload: &[u8]) -> Result<Self, MalformedMessage> {
        let result: CrawlResult =
            serde_json::from_slice(payload).map_err(|e| MalformedMessage(e.to_string()))?;

        if result.job_id.trim().is_empty() {
            return Err(MalformedMessage("empty job_id".to_string()));
        }
        if result.url.trim().is_empty() {
            return Err(MalformedMessage("empty url".to_string()));
        }

        Ok(result)
    }

    pub fn to_vec(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn is_ok(&self) -> bool {
        self.status == ResultStatus::Ok
    }

    /// The error code to persist, `unknown_error` when missing or blank
    pub fn error_code(&self) -> &str {
        self.error
            .as_deref()
            .map(str::trim)
            .filter(|code| !code.is_empty())
            .unwrap_or(UNKNOWN_ERROR)
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
