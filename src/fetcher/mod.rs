//! HTTP fetcher implementation
//!
//! This module downloads article pages for the worker, including:
//! - Building HTTP clients with proper user agent strings
//! - Streaming bodies under a byte cap
//! - Per-attempt wall-clock timeouts
//! - Bounded retries with exponential backoff and jitter
//! - Error classification
//!
//! # Retry Logic
//!
//! | Condition | Action |
//! |-----------|--------|
//! | HTTP 429 / 5xx | Retry while attempts remain, then return the response |
//! | Timeout | Retry while attempts remain → `timeout` |
//! | Connection / redirect / read error | Retry while attempts remain → `download_failed` |
//! | Body over `max_bytes` | Immediate → `max_bytes_exceeded` |
//! | Any other status | Returned as-is |

mod client;
mod download;
mod retry;

pub use client::{build_http_client, user_agent_string};
pub use retry::{is_retryable_status, RetryPolicy};

use download::download;
use reqwest::Client;
use std::fmt;
use std::time::Duration;
use url::Url;

/// Classified fetch failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchErrorKind {
    Timeout,
    MaxBytesExceeded,
    RobotsDisallowed,
    DownloadFailed,
}

impl FetchErrorKind {
    /// The error code carried in result messages
    pub fn as_code(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::MaxBytesExceeded => "max_bytes_exceeded",
            Self::RobotsDisallowed => "robots_disallowed",
            Self::DownloadFailed => "download_failed",
        }
    }

    /// Whether another attempt could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::DownloadFailed)
    }
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_code())
    }
}

/// Per-request download limits
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Wall-clock budget for one attempt
    pub timeout: Duration,

    /// Largest body accepted, in bytes
    pub max_bytes: u64,
}

/// Result of a fetch operation
#[derive(Debug)]
pub enum FetchResult {
    /// A response was read in full. The status may still be non-2xx,
    /// including a retryable one when attempts ran out.
    Response {
        status_code: u16,
        final_url: String,
        html: String,
        attempts: u32,
    },

    /// No usable response
    Failed {
        kind: FetchErrorKind,
        message: String,
        attempts: u32,
    },
}

impl FetchResult {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Response { attempts, .. } | Self::Failed { attempts, .. } => *attempts,
        }
    }
}

/// Retrying fetcher shared by all pipelines of a worker
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    policy: RetryPolicy,
}

impl Fetcher {
    pub fn new(client: Client, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Fetches a URL with retries
    ///
    /// Runs at most `policy.max_attempts` attempts. A retryable status on the
    /// final attempt is returned as a normal `Response`, so callers see the
    /// real status (e.g. `http_503`) instead of a synthetic error.
    pub async fn fetch(&self, url: &Url, options: &FetchOptions) -> FetchResult {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 0..max_attempts {
            let is_last = attempt + 1 >= max_attempts;

            match download(&self.client, url, options).await {
                Ok(downloaded) => {
                    if is_retryable_status(downloaded.status_code) && !is_last {
                        let backoff = self.policy.backoff(attempt);
                        tracing::warn!(
                            url = %url,
                            status_code = downloaded.status_code,
                            attempt,
                            backoff_ms = backoff.as_millis() as u64,
                            "Retryable HTTP status"
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }

                    return FetchResult::Response {
                        status_code: downloaded.status_code,
                        final_url: downloaded.final_url,
                        html: downloaded.html,
                        attempts: attempt + 1,
                    };
                }
                Err(e) => {
                    if e.kind.is_retryable() && !is_last {
                        let backoff = self.policy.backoff(attempt);
                        tracing::warn!(
                            url = %url,
                            kind = %e.kind,
                            error = %e.message,
                            attempt,
                            backoff_ms = backoff.as_millis() as u64,
                            "Retrying fetch"
                        );
                        tokio::time::sleep(backoff).await;
                        last_error = Some(e);
                        continue;
                    }

                    return FetchResult::Failed {
                        kind: e.kind,
                        message: e.message,
                        attempts: attempt + 1,
                    };
                }
            }
        }

        // Only reachable if every iteration continued, which the is_last checks prevent
        let (kind, message) = last_error
            .map(|e| (e.kind, e.message))
            .unwrap_or((FetchErrorKind::DownloadFailed, "No attempts made".to_string()));
        FetchResult::Failed {
            kind,
            message,
            attempts: max_attempts,
        }
    }
}
