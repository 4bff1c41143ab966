//! SQLite-backed message log
//!
//! Several processes can share one database file: appends and offset commits
//! are single statements, and WAL mode lets readers proceed while a writer
//! holds the lock.

use super::schema::initialize_stream_schema;
use super::{partition_for, Delivery, MessageConsumer, MessageProducer, StreamError, StreamResult};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Handle to a message log database
///
/// Cloning is cheap; clones share one connection.
#[derive(Clone)]
pub struct SqliteStream {
    conn: Arc<Mutex<Connection>>,
    partitions: u32,
}

impl SqliteStream {
    /// Opens or creates the log at `path`
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    /// * `partitions` - Number of partitions per topic; must be the same for
    ///   every process sharing the file
    pub fn open(path: &Path, partitions: u32) -> StreamResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
        ",
        )?;
        Self::from_connection(conn, partitions)
    }

    /// Creates a private in-memory log
    pub fn open_in_memory(partitions: u32) -> StreamResult<Self> {
        Self::from_connection(Connection::open_in_memory()?, partitions)
    }

    fn from_connection(conn: Connection, partitions: u32) -> StreamResult<Self> {
        if partitions == 0 {
            return Err(StreamError::InvalidConfig(
                "partition count must be at least 1".to_string(),
            ));
        }
        initialize_stream_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            partitions,
        })
    }

    pub fn partitions(&self) -> u32 {
        self.partitions
    }

    pub fn producer(&self) -> SqliteProducer {
        SqliteProducer {
            stream: self.clone(),
        }
    }

    /// Creates a consumer for `topic` in consumer group `group`
    ///
    /// Fetch positions start at the group's committed offsets.
    pub fn consumer(&self, group: impl Into<String>, topic: impl Into<String>) -> SqliteConsumer {
        SqliteConsumer {
            stream: self.clone(),
            group: group.into(),
            topic: topic.into(),
            positions: HashMap::new(),
            next_partition: 0,
        }
    }

    /// Number of records ever appended to `topic`
    pub async fn record_count(&self, topic: &str) -> StreamResult<u64> {
        let topic = topic.to_string();
        self.with_conn(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM stream_records WHERE topic = ?1",
                params![topic],
                |row| row.get(0),
            )?;
            Ok(count.max(0) as u64)
        })
        .await
    }

    /// Runs blocking SQLite work off the async worker threads
    async fn with_conn<T, F>(&self, f: F) -> StreamResult<T>
    where
        F: FnOnce(&mut Connection) -> StreamResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| StreamError::Poisoned)?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StreamError::Task(e.to_string()))?
    }
}

/// Appends records to a [`SqliteStream`]
#[derive(Clone)]
pub struct SqliteProducer {
    stream: SqliteStream,
}

#[async_trait]
impl MessageProducer for SqliteProducer {
    async fn send(&self, topic: &str, key: &str, payload: &[u8]) -> StreamResult<(u32, u64)> {
        let partition = partition_for(key, self.stream.partitions);
        let topic = topic.to_string();
        let key = key.to_string();
        let payload = payload.to_vec();

        let seq = self
            .stream
            .with_conn(move |conn| {
                let seq: i64 = conn.query_row(
                    "INSERT INTO stream_records (topic, partition_id, seq, record_key, payload, appended_at)
                     VALUES (?1, ?2,
                             (SELECT COALESCE(MAX(seq) + 1, 0) FROM stream_records
                              WHERE topic = ?1 AND partition_id = ?2),
                             ?3, ?4, ?5)
                     RETURNING seq",
                    params![topic, partition, key, payload, Utc::now().to_rfc3339()],
                    |row| row.get(0),
                )?;
                Ok(seq)
            })
            .await?;

        Ok((partition, seq as u64))
    }
}

/// Reads one topic for one consumer group
///
/// A consumer owns every partition of its topic.
pub struct SqliteConsumer {
    stream: SqliteStream,
    group: String,
    topic: String,
    /// In-session fetch positions; partitions missing here start from the
    /// committed offset
    positions: HashMap<u32, u64>,
    /// First partition visited by the next poll, rotated for fairness
    next_partition: u32,
}

impl SqliteConsumer {
    pub fn group(&self) -> &str {
        &self.group
    }

    /// The group's committed position for `partition`, if it ever committed
    pub async fn committed(&self, partition: u32) -> StreamResult<Option<u64>> {
        let group = self.group.clone();
        let topic = self.topic.clone();
        self.stream
            .with_conn(move |conn| {
                let seq: Option<i64> = conn
                    .query_row(
                        "SELECT next_seq FROM stream_offsets
                         WHERE group_id = ?1 AND topic = ?2 AND partition_id = ?3",
                        params![group, topic, partition],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(seq.map(|s| s.max(0) as u64))
            })
            .await
    }
}

#[async_trait]
impl MessageConsumer for SqliteConsumer {
    async fn poll(&mut self, max: usize) -> StreamResult<Vec<Delivery>> {
        if max == 0 {
            return Ok(Vec::new());
        }

        let partitions = self.stream.partitions;
        let start = self.next_partition % partitions;
        self.next_partition = (start + 1) % partitions;

        let group = self.group.clone();
        let topic = self.topic.clone();
        let mut positions = self.positions.clone();

        let (deliveries, positions) = self
            .stream
            .with_conn(move |conn| {
                let mut deliveries = Vec::new();

                for step in 0..partitions {
                    let remaining = max - deliveries.len();
                    if remaining == 0 {
                        break;
                    }
                    let partition = (start + step) % partitions;

                    let from = match positions.get(&partition) {
                        Some(&pos) => pos,
                        None => {
                            let committed: Option<i64> = conn
                                .query_row(
                                    "SELECT next_seq FROM stream_offsets
                                     WHERE group_id = ?1 AND topic = ?2 AND partition_id = ?3",
                                    params![group, topic, partition],
                                    |row| row.get(0),
                                )
                                .optional()?;
                            committed.map_or(0, |s| s.max(0) as u64)
                        }
                    };

                    let mut stmt = conn.prepare_cached(
                        "SELECT seq, record_key, payload FROM stream_records
                         WHERE topic = ?1 AND partition_id = ?2 AND seq >= ?3
                         ORDER BY seq ASC
                         LIMIT ?4",
                    )?;
                    let rows = stmt.query_map(
                        params![topic, partition, from as i64, remaining as i64],
                        |row| {
                            Ok(Delivery {
                                topic: topic.clone(),
                                partition,
                                offset: row.get::<_, i64>(0)? as u64,
                                key: row.get(1)?,
                                payload: row.get(2)?,
                            })
                        },
                    )?;

                    let mut next = from;
                    for row in rows {
                        let delivery = row?;
                        next = delivery.offset + 1;
                        deliveries.push(delivery);
                    }
                    positions.insert(partition, next);
                }

                Ok((deliveries, positions))
            })
            .await?;

        self.positions = positions;
        Ok(deliveries)
    }

    async fn commit(&mut self, partition: u32, next_offset: u64) -> StreamResult<()> {
        let group = self.group.clone();
        let topic = self.topic.clone();
        self.stream
            .with_conn(move |conn| {
                conn.execute(
                    "INSERT INTO stream_offsets (group_id, topic, partition_id, next_seq, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(group_id, topic, partition_id)
                     DO UPDATE SET next_seq = MAX(next_seq, excluded.next_seq),
                                   updated_at = excluded.updated_at",
                    params![group, topic, partition, next_offset as i64, Utc::now().to_rfc3339()],
                )?;
                Ok(())
            })
            .await
    }

    fn seek(&mut self, partition: u32, offset: u64) {
        self.positions.insert(partition, offset);
    }

    fn topic(&self) -> &str {
        &self.topic
    }
}
