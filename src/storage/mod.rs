//! Storage module for persisting job outcomes
//!
//! This module handles all database operations for the result sink, including:
//! - SQLite database initialization and schema management
//! - Job creation and progress tracking
//! - Idempotent article and error-record persistence

mod job_state;
mod schema;
mod sqlite;
mod traits;

pub use job_state::JobState;
pub use sqlite::SqliteJobStore;
pub use traits::{JobStore, StorageError, StorageResult};

use chrono::{DateTime, Utc};

/// A job and its progress counters
#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
    pub job_id: String,
    pub total: u64,
    pub done: u64,
    pub failed: u64,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Which counter a newly recorded outcome advances
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    Article,
    Error,
}

impl JobRecord {
    /// Results accounted for so far
    pub fn processed(&self) -> u64 {
        self.done + self.failed
    }

    /// Counts one new outcome and recomputes the state
    ///
    /// Counters saturate: once `done + failed` reaches `total`, further
    /// outcomes leave them unchanged. Returns whether a counter moved.
    pub fn advance(&mut self, kind: OutcomeKind, now: DateTime<Utc>) -> bool {
        let counted = self.processed() < self.total;
        if counted {
            match kind {
                OutcomeKind::Article => self.done += 1,
                OutcomeKind::Error => self.failed += 1,
            }
        }
        self.state = JobState::for_progress(self.done, self.failed, self.total);
        self.updated_at = now;
        counted
    }
}

/// A stored article
#[derive(Debug, Clone, PartialEq)]
pub struct ArticleRecord {
    pub job_id: String,
    pub url: String,
    pub canonical_url: Option<String>,
    pub title: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub author: Option<String>,
    pub language: Option<String>,
    pub tags: Vec<String>,
    pub fetched_at: DateTime<Utc>,
    pub http_status: Option<u16>,
    pub text: String,
}

/// A stored failure
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorRecord {
    pub job_id: String,
    pub url: String,
    pub fetched_at: DateTime<Utc>,
    pub http_status: Option<u16>,
    pub error_code: String,
}

/// What applying one result did
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// No job with the result's id; nothing written
    JobMissing,

    /// An outcome for `(job_id, url)` already existed; nothing written
    Duplicate,

    /// A new outcome row was written and the job advanced
    Recorded { before: JobState, job: JobRecord },
}
