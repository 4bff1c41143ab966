//! Stream tables

/// SQL schema for the message log
pub const STREAM_SCHEMA_SQL: &str = r#"
-- Appended records, one sequence per (topic, partition)
CREATE TABLE IF NOT EXISTS stream_records (
    topic TEXT NOT NULL,
    partition_id INTEGER NOT NULL,
    seq INTEGER NOT NULL,
    record_key TEXT,
    payload BLOB NOT NULL,
    appended_at TEXT NOT NULL,
    PRIMARY KEY (topic, partition_id, seq)
);

-- Committed positions per consumer group
CREATE TABLE IF NOT EXISTS stream_offsets (
    group_id TEXT NOT NULL,
    topic TEXT NOT NULL,
    partition_id INTEGER NOT NULL,
    next_seq INTEGER NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (group_id, topic, partition_id)
);
"#;

/// Creates the stream tables if they do not exist
pub fn initialize_stream_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(STREAM_SCHEMA_SQL)
}
