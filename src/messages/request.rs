use crate::url::{domain_key, ensure_fetchable};
use crate::UrlResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// One unit of crawl work, as published on the requests topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlRequest {
    pub job_id: String,

    pub url: Url,

    #[serde(default)]
    pub attempt: u32,

    /// Per-attempt timeout; absent or zero means the worker default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    /// Body size cap; absent or zero means the worker default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_bytes: Option<u64>,

    #[serde(default)]
    pub respect_robots: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_at: Option<DateTime<Utc>>,
}

impl CrawlRequest {
    /// Creates a request with attempt 0, stamped with the current time
    pub fn new(job_id: impl Into<String>, url: Url) -> Self {
        Self {
            job_id: job_id.into(),
            url,
            attempt: 0,
            timeout_ms: None,
            max_bytes: None,
            respect_robots: false,
            requested_at: Some(Utc::now()),
        }
    }

    /// Decodes a request payload
    ///
    /// Payloads that are not JSON, lack a job id, or carry a URL the fetcher
    /// cannot download are all rejected; the worker drops them.
    pub fn from_slice(payload: &[u8]) -> Result<Self, MalformedMessage> {
        let request: CrawlRequest =
            serde_json::from_slice(payload).map_err(|e| MalformedMessage(e.to_string()))?;

        if request.job_id.trim().is_empty() {
            return Err(MalformedMessage("empty job_id".to_string()));
        }
        ensure_fetchable(&request.url).map_err(|e| MalformedMessage(e.to_string()))?;

        Ok(request)
    }

    pub fn to_vec(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Hostname used as the message key and domain gate
    pub fn routing_key(&self) -> UrlResult<String> {
        domain_key(&self.url)
    }

    pub fn effective_timeout_ms(&self, default_ms: u64) -> u64 {
        self.timeout_ms.filter(|&ms| ms > 0).unwrap_or(default_ms)
    }

    pub fn effective_max_bytes(&self, default_bytes: u64) -> u64 {
        self.max_bytes.filter(|&b| b > 0).unwrap_or(default_bytes)
    }
}

/// A payload that cannot be processed no matter how often it is redelivered
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Malformed message: {0}")]
pub struct MalformedMessage(pub String);
