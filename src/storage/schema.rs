//! Database schema definitions
//!
//! This module contains the SQL schema for the job store.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Track jobs and their progress
CREATE TABLE IF NOT EXISTS jobs (
    job_id TEXT PRIMARY KEY,
    total INTEGER NOT NULL CHECK (total > 0),
    done INTEGER NOT NULL DEFAULT 0,
    failed INTEGER NOT NULL DEFAULT 0,
    state TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    CHECK (done + failed <= total)
);

-- Extracted articles, at most one per (job, url)
CREATE TABLE IF NOT EXISTS articles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id TEXT NOT NULL,
    url TEXT NOT NULL,
    canonical_url TEXT,
    title TEXT,
    published_at TEXT,
    author TEXT,
    language TEXT,
    tags TEXT NOT NULL DEFAULT '[]',
    fetched_at TEXT NOT NULL,
    http_status INTEGER,
    text TEXT NOT NULL DEFAULT '',
    UNIQUE(job_id, url)
);

-- Failed URLs, at most one per (job, url)
CREATE TABLE IF NOT EXISTS crawl_errors (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id TEXT NOT NULL,
    url TEXT NOT NULL,
    fetched_at TEXT NOT NULL,
    http_status INTEGER,
    error_code TEXT NOT NULL,
    UNIQUE(job_id, url)
);

CREATE INDEX IF NOT EXISTS idx_jobs_state ON jobs(state);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
