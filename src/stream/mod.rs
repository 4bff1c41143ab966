//! Partitioned message stream
//!
//! Workers and the sink talk through a partitioned, append-only log with
//! consumer-group offsets and manual acknowledgement:
//!
//! - a producer appends a keyed record; the key picks the partition, so all
//!   records with one key stay in order
//! - a consumer polls records from its current fetch positions, commits the
//!   next offset to read once a record is handled, and can seek a partition
//!   back to force redelivery
//!
//! Delivery is at-least-once: anything polled but not committed is delivered
//! again to the next consumer of the group.

mod schema;
mod sqlite;

pub use schema::initialize_stream_schema;
pub use sqlite::{SqliteConsumer, SqliteProducer, SqliteStream};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Stream errors
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Stream connection lock poisoned")]
    Poisoned,

    #[error("Background task failed: {0}")]
    Task(String),

    #[error("Invalid stream configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for stream operations
pub type StreamResult<T> = Result<T, StreamError>;

/// One record handed to a consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

/// Appends records to topics
#[async_trait]
pub trait MessageProducer: Send + Sync {
    /// Appends a record and returns where it landed as `(partition, offset)`
    ///
    /// Returning `Ok` means the record is durable.
    async fn send(&self, topic: &str, key: &str, payload: &[u8]) -> StreamResult<(u32, u64)>;
}

/// Reads one topic on behalf of a consumer group
#[async_trait]
pub trait MessageConsumer: Send {
    /// Returns up to `max` records past the current fetch positions
    ///
    /// Records of one partition come back in offset order. The fetch positions
    /// move past everything returned.
    async fn poll(&mut self, max: usize) -> StreamResult<Vec<Delivery>>;

    /// Records `next_offset` as the group's committed position for `partition`
    ///
    /// Committed positions never move backwards.
    async fn commit(&mut self, partition: u32, next_offset: u64) -> StreamResult<()>;

    /// Moves the fetch position of `partition` so `offset` is delivered again
    fn seek(&mut self, partition: u32, offset: u64);

    fn topic(&self) -> &str;
}

/// Maps a record key onto one of `partitions` partitions
///
/// Uses the first four bytes of the key's SHA-256 digest, so the mapping is
/// stable across processes and releases.
pub fn partition_for(key: &str, partitions: u32) -> u32 {
    if partitions <= 1 {
        return 0;
    }
    let digest = Sha256::digest(key.as_bytes());
    let prefix = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    prefix % partitions
}
