//! News-Harvest: a distributed article fetcher
//!
//! This crate implements the two halves of a crawl pipeline that runs over a
//! partitioned, at-least-once message stream:
//!
//! - the crawl worker, which admits each request through global and per-domain
//!   gates, optionally consults robots.txt, fetches with bounded retries,
//!   extracts an article and emits exactly one result message
//! - the result sink, which persists each result idempotently and advances the
//!   owning job's progress counters and state in a single transaction

pub mod config;
pub mod extract;
pub mod fetcher;
pub mod limiter;
pub mod messages;
pub mod robots;
pub mod shutdown;
pub mod sink;
pub mod storage;
pub mod stream;
pub mod url;
pub mod worker;

use thiserror::Error;

/// Main error type for News-Harvest operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Stream error: {0}")]
    Stream(#[from] stream::StreamError),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Extraction error: {0}")]
    Extraction(#[from] extract::ExtractionError),

    #[error("Message encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Concurrency limiter closed")]
    LimiterClosed,

    #[error("Task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,
}

/// Result type alias for News-Harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use messages::{CrawlRequest, CrawlResult, ErrorCode, ResultStatus};
pub use storage::{JobRecord, JobState};
