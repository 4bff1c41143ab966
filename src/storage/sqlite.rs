//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the JobStore trait.
//!
//! `apply_result` runs in an `IMMEDIATE` transaction, which takes the database
//! write lock before the job row is read. That lock is coarser than a per-job
//! row lock but gives the same guarantee: two results for one job can never
//! interleave between reading the counters and writing them back.

use crate::messages::CrawlResult;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{JobStore, StorageError, StorageResult};
use crate::storage::{ApplyOutcome, ArticleRecord, ErrorRecord, JobRecord, JobState, OutcomeKind};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use std::time::Duration;

/// SQLite job store
pub struct SqliteJobStore {
    conn: Connection,
}

impl SqliteJobStore {
    /// Opens or creates the job database
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteJobStore)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn open(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        // Several sinks may share one file
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Lowers a job's total to the number of requests actually published
    ///
    /// Used when submission stops partway. A total of zero removes the job,
    /// since nothing will ever report against it. The new total may not be
    /// below the outcomes already counted or above the current total.
    pub fn shrink_job(&mut self, job_id: &str, total: u64) -> StorageResult<Option<JobRecord>> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let Some(mut job) = load_job(&tx, job_id)? else {
            return Ok(None);
        };

        if total > job.total || total < job.processed() {
            return Err(StorageError::InvalidJob(format!(
                "cannot resize job {} from {} to {} with {} outcomes recorded",
                job_id,
                job.total,
                total,
                job.processed()
            )));
        }

        if total == 0 {
            tx.execute("DELETE FROM jobs WHERE job_id = ?1", params![job_id])?;
            tx.commit()?;
            tracing::info!(job_id, "Removed job with no published requests");
            return Ok(None);
        }

        job.total = total;
        job.state = JobState::for_progress(job.done, job.failed, total);
        job.updated_at = Utc::now();

        tx.execute(
            "UPDATE jobs SET total = ?1, state = ?2, updated_at = ?3 WHERE job_id = ?4",
            params![
                total as i64,
                job.state.to_db_string(),
                job.updated_at.to_rfc3339(),
                job_id
            ],
        )?;
        tx.commit()?;

        Ok(Some(job))
    }
}

impl JobStore for SqliteJobStore {
    // ===== Job Management =====

    fn create_job(&mut self, total: u64) -> StorageResult<JobRecord> {
        if total == 0 {
            return Err(StorageError::InvalidJob(
                "a job needs at least one URL".to_string(),
            ));
        }

        let now = Utc::now();
        let job = JobRecord {
            job_id: uuid::Uuid::new_v4().to_string(),
            total,
            done: 0,
            failed: 0,
            state: JobState::Queued,
            created_at: now,
            updated_at: now,
        };

        self.conn.execute(
            "INSERT INTO jobs (job_id, total, done, failed, state, created_at, updated_at)
             VALUES (?1, ?2, 0, 0, ?3, ?4, ?4)",
            params![
                job.job_id,
                total as i64,
                job.state.to_db_string(),
                now.to_rfc3339()
            ],
        )?;

        Ok(job)
    }

    fn get_job(&self, job_id: &str) -> StorageResult<Option<JobRecord>> {
        load_job(&self.conn, job_id)
    }

    // ===== Results =====

    fn apply_result(&mut self, result: &CrawlResult) -> StorageResult<ApplyOutcome> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let Some(mut job) = load_job(&tx, &result.job_id)? else {
            tx.commit()?;
            return Ok(ApplyOutcome::JobMissing);
        };

        let (inserted, kind) = if result.is_ok() {
            let tags = serde_json::to_string(&result.tags)
                .map_err(|e| StorageError::Serialization(e.to_string()))?;
            let inserted = tx.execute(
                "INSERT INTO articles
                    (job_id, url, canonical_url, title, published_at, author, language,
                     tags, fetched_at, http_status, text)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(job_id, url) DO NOTHING",
                params![
                    result.job_id,
                    result.url,
                    result.canonical_url,
                    result.title,
                    result.published_at.map(|d| d.to_rfc3339()),
                    result.author,
                    result.language,
                    tags,
                    result.fetched_at.to_rfc3339(),
                    result.http_status,
                    result.text,
                ],
            )?;
            (inserted, OutcomeKind::Article)
        } else {
            let inserted = tx.execute(
                "INSERT INTO crawl_errors (job_id, url, fetched_at, http_status, error_code)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(job_id, url) DO NOTHING",
                params![
                    result.job_id,
                    result.url,
                    result.fetched_at.to_rfc3339(),
                    result.http_status,
                    result.error_code(),
                ],
            )?;
            (inserted, OutcomeKind::Error)
        };

        if inserted == 0 {
            tx.commit()?;
            return Ok(ApplyOutcome::Duplicate);
        }

        let before = job.state;
        job.advance(kind, Utc::now());

        tx.execute(
            "UPDATE jobs SET done = ?1, failed = ?2, state = ?3, updated_at = ?4 WHERE job_id = ?5",
            params![
                job.done as i64,
                job.failed as i64,
                job.state.to_db_string(),
                job.updated_at.to_rfc3339(),
                job.job_id
            ],
        )?;

        tx.commit()?;

        Ok(ApplyOutcome::Recorded { before, job })
    }

    // ===== Outcome Queries =====

    fn count_articles(&self, job_id: &str) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM articles WHERE job_id = ?1",
            params![job_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn count_errors(&self, job_id: &str) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM crawl_errors WHERE job_id = ?1",
            params![job_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn get_article(&self, job_id: &str, url: &str) -> StorageResult<Option<ArticleRecord>> {
        let row = self
            .conn
            .query_row(
                "SELECT job_id, url, canonical_url, title, published_at, author, language,
                        tags, fetched_at, http_status, text
                 FROM articles WHERE job_id = ?1 AND url = ?2",
                params![job_id, url],
                |row| {
                    Ok((
                        ArticleRecord {
                            job_id: row.get(0)?,
                            url: row.get(1)?,
                            canonical_url: row.get(2)?,
                            title: row.get(3)?,
                            published_at: optional_timestamp(row, 4)?,
                            author: row.get(5)?,
                            language: row.get(6)?,
                            tags: Vec::new(),
                            fetched_at: timestamp(row, 8)?,
                            http_status: row.get(9)?,
                            text: row.get(10)?,
                        },
                        row.get::<_, String>(7)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((mut article, tags)) => {
                article.tags = serde_json::from_str(&tags)
                    .map_err(|e| StorageError::Serialization(e.to_string()))?;
                Ok(Some(article))
            }
            None => Ok(None),
        }
    }

    fn get_error_record(&self, job_id: &str, url: &str) -> StorageResult<Option<ErrorRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT job_id, url, fetched_at, http_status, error_code
                 FROM crawl_errors WHERE job_id = ?1 AND url = ?2",
                params![job_id, url],
                |row| {
                    Ok(ErrorRecord {
                        job_id: row.get(0)?,
                        url: row.get(1)?,
                        fetched_at: timestamp(row, 2)?,
                        http_status: row.get(3)?,
                        error_code: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }
}

/// Reads a job row; works on a plain connection or inside a transaction
fn load_job(conn: &Connection, job_id: &str) -> StorageResult<Option<JobRecord>> {
    let job = conn
        .query_row(
            "SELECT job_id, total, done, failed, state, created_at, updated_at
             FROM jobs WHERE job_id = ?1",
            params![job_id],
            |row| {
                let state: String = row.get(4)?;
                Ok(JobRecord {
                    job_id: row.get(0)?,
                    total: row.get::<_, i64>(1)? as u64,
                    done: row.get::<_, i64>(2)? as u64,
                    failed: row.get::<_, i64>(3)? as u64,
                    state: JobState::from_db_string(&state).ok_or_else(|| {
                        rusqlite::Error::FromSqlConversionFailure(
                            4,
                            Type::Text,
                            format!("unknown job state {:?}", state).into(),
                        )
                    })?,
                    created_at: timestamp(row, 5)?,
                    updated_at: timestamp(row, 6)?,
                })
            },
        )
        .optional()?;
    Ok(job)
}

fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn optional_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(_) => timestamp(row, idx).map(Some),
        None => Ok(None),
    }
}
