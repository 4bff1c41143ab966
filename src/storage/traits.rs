//! Storage traits and error types
//!
//! This module defines the trait interface for job stores and associated
//! error types.

use crate::messages::CrawlResult;
use crate::storage::{ApplyOutcome, ArticleRecord, ErrorRecord, JobRecord};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Invalid job: {0}")]
    InvalidJob(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Job store lock poisoned")]
    Poisoned,
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Transactional store for jobs and their per-URL outcomes
///
/// Jobs are mutated only through [`JobStore::apply_result`], which must be
/// safe to call any number of times with the same result.
pub trait JobStore {
    // ===== Job Management =====

    /// Creates a job expecting `total` results
    ///
    /// The job starts `queued` with both counters at zero.
    ///
    /// # Errors
    ///
    /// `StorageError::InvalidJob` when `total` is zero; such a job could never
    /// leave the `queued` state through results.
    fn create_job(&mut self, total: u64) -> StorageResult<JobRecord>;

    /// Gets a job by id
    fn get_job(&self, job_id: &str) -> StorageResult<Option<JobRecord>>;

    // ===== Results =====

    /// Persists one result and advances the owning job, atomically
    ///
    /// Within one exclusive transaction:
    /// 1. a missing job yields [`ApplyOutcome::JobMissing`] and writes nothing
    /// 2. the article or error row is inserted unless `(job_id, url)` already
    ///    has one, in which case the result is a [`ApplyOutcome::Duplicate`]
    /// 3. a new row bumps `done` or `failed` by one and recomputes the state
    ///
    /// On error nothing is written.
    fn apply_result(&mut self, result: &CrawlResult) -> StorageResult<ApplyOutcome>;

    // ===== Outcome Queries =====

    /// Number of articles stored for a job
    fn count_articles(&self, job_id: &str) -> StorageResult<u64>;

    /// Number of error records stored for a job
    fn count_errors(&self, job_id: &str) -> StorageResult<u64>;

    fn get_article(&self, job_id: &str, url: &str) -> StorageResult<Option<ArticleRecord>>;

    fn get_error_record(&self, job_id: &str, url: &str) -> StorageResult<Option<ErrorRecord>>;
}
