//! Result sink
//!
//! Consumes the results topic and folds every result into the job store. Each
//! result is applied in its own store transaction and acknowledged only after
//! that transaction commits, so a crash at any point leads to redelivery, and
//! redelivery is harmless because `apply_result` is idempotent.
//!
//! | Outcome | Acknowledged |
//! |---------|--------------|
//! | Recorded / duplicate / job missing | Yes |
//! | Malformed payload | Yes, dropped |
//! | Store error | No; the partition is rewound and retried |

use crate::config::Config;
use crate::messages::CrawlResult;
use crate::storage::{ApplyOutcome, JobState, JobStore, StorageError};
use crate::stream::{Delivery, MessageConsumer};
use crate::HarvestError;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Tuning for the sink loop
#[derive(Debug, Clone)]
pub struct SinkOptions {
    /// Records fetched per poll
    pub batch_size: usize,

    /// Sleep between empty polls
    pub poll_interval: Duration,

    /// Sleep after a batch that hit a store error
    pub error_backoff: Duration,
}

impl Default for SinkOptions {
    fn default() -> Self {
        Self {
            batch_size: 100,
            poll_interval: Duration::from_millis(250),
            error_backoff: Duration::from_secs(1),
        }
    }
}

impl SinkOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            batch_size: config.stream.sink_batch_size,
            poll_interval: Duration::from_millis(config.stream.poll_interval_ms),
            ..Self::default()
        }
    }
}

/// Counts for one polled batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SinkBatchStats {
    pub received: usize,
    pub recorded: usize,
    pub duplicates: usize,
    pub missing_jobs: usize,
    pub malformed: usize,
    /// Records left unacknowledged for redelivery
    pub deferred: usize,
}

/// Consumer loop that persists results
///
/// Store calls are blocking SQLite transactions, so they run on the blocking
/// pool with the store behind a mutex.
pub struct ResultSink<S: JobStore> {
    consumer: Box<dyn MessageConsumer>,
    store: Arc<Mutex<S>>,
    options: SinkOptions,
}

impl<S: JobStore + Send + 'static> ResultSink<S> {
    pub fn new(consumer: Box<dyn MessageConsumer>, store: S, options: SinkOptions) -> Self {
        Self {
            consumer,
            store: Arc::new(Mutex::new(store)),
            options,
        }
    }

    /// Locks the store for reading job state
    ///
    /// Do not hold the guard across an await.
    pub fn store(&self) -> MutexGuard<'_, S> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Polls one batch and handles it
    ///
    /// After a store error on a partition, that partition is rewound to the
    /// failed record and the rest of its records in this batch are skipped,
    /// so offsets never advance past an unapplied result.
    pub async fn run_once(&mut self) -> Result<SinkBatchStats, HarvestError> {
        let batch = self.consumer.poll(self.options.batch_size).await?;
        let mut stats = SinkBatchStats {
            received: batch.len(),
            ..Default::default()
        };
        let mut rewound: HashSet<u32> = HashSet::new();

        for delivery in batch {
            if rewound.contains(&delivery.partition) {
                stats.deferred += 1;
                continue;
            }

            match self.handle(&delivery, &mut stats).await {
                Ok(()) => {
                    if let Err(e) = self
                        .consumer
                        .commit(delivery.partition, delivery.offset + 1)
                        .await
                    {
                        tracing::error!(
                            partition = delivery.partition,
                            offset = delivery.offset,
                            error = %e,
                            "Offset commit failed, rewinding partition"
                        );
                        stats.deferred += 1;
                        self.consumer.seek(delivery.partition, delivery.offset);
                        rewound.insert(delivery.partition);
                    }
                }
                Err(e) => {
                    tracing::error!(
                        partition = delivery.partition,
                        offset = delivery.offset,
                        error = %e,
                        "Result rolled back, will be redelivered"
                    );
                    stats.deferred += 1;
                    self.consumer.seek(delivery.partition, delivery.offset);
                    rewound.insert(delivery.partition);
                }
            }
        }

        Ok(stats)
    }

    /// Applies one delivery; `Ok` means it may be acknowledged
    async fn handle(
        &mut self,
        delivery: &Delivery,
        stats: &mut SinkBatchStats,
    ) -> Result<(), HarvestError> {
        let result = match CrawlResult::from_slice(&delivery.payload) {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(
                    partition = delivery.partition,
                    offset = delivery.offset,
                    error = %e,
                    "Dropping malformed result"
                );
                stats.malformed += 1;
                return Ok(());
            }
        };

        let store = Arc::clone(&self.store);
        let (result, outcome) = tokio::task::spawn_blocking(move || {
            let mut store = store.lock().map_err(|_| StorageError::Poisoned)?;
            let outcome = store.apply_result(&result)?;
            Ok::<_, StorageError>((result, outcome))
        })
        .await??;

        match outcome {
            ApplyOutcome::JobMissing => {
                tracing::warn!(job_id = %result.job_id, url = %result.url, "Result for unknown job, skipping");
                stats.missing_jobs += 1;
            }
            ApplyOutcome::Duplicate => {
                tracing::debug!(job_id = %result.job_id, url = %result.url, "Duplicate result");
                stats.duplicates += 1;
            }
            ApplyOutcome::Recorded { before, job } => {
                stats.recorded += 1;
                tracing::debug!(
                    job_id = %job.job_id,
                    url = %result.url,
                    status = ?result.status,
                    done = job.done,
                    failed = job.failed,
                    total = job.total,
                    "Result recorded"
                );
                if before != job.state && job.state == JobState::Done {
                    tracing::info!(
                        job_id = %job.job_id,
                        done = job.done,
                        failed = job.failed,
                        "Job complete"
                    );
                }
            }
        }

        Ok(())
    }

    /// Runs until `shutdown` is cancelled
    ///
    /// Cancellation is observed between batches, so the batch in hand is
    /// always finished and committed before returning.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<(), HarvestError> {
        tracing::info!(topic = self.consumer.topic(), "Result sink started");

        while !shutdown.is_cancelled() {
            let pause = match self.run_once().await {
                Ok(stats) if stats.deferred > 0 => Some(self.options.error_backoff),
                Ok(stats) if stats.received == 0 => Some(self.options.poll_interval),
                Ok(stats) => {
                    tracing::debug!(?stats, "Batch handled");
                    None
                }
                Err(e) => {
                    tracing::error!(error = %e, "Polling results failed");
                    Some(self.options.error_backoff)
                }
            };

            if let Some(pause) = pause {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(pause) => {}
                }
            }
        }

        tracing::info!("Result sink stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{CrawlRequest, ErrorCode};
    use crate::storage::{
        ArticleRecord, ErrorRecord, JobRecord, SqliteJobStore, StorageError, StorageResult,
    };
    use crate::stream::{
        MessageProducer, SqliteConsumer, SqliteStream, StreamError, StreamResult,
    };
    use async_trait::async_trait;
    use chrono::Utc;
    use url::Url;

    const RESULTS: &str = "crawl_results";

    fn error_result(job_id: &str, url: &str) -> CrawlResult {
        let request = CrawlRequest::new(job_id, Url::parse(url).unwrap());
        CrawlResult::error(&request, ErrorCode::Http(500), Some(500), Utc::now())
    }

    fn sink<S: JobStore + Send + 'static>(stream: &SqliteStream, store: S) -> ResultSink<S> {
        ResultSink::new(
            Box::new(stream.consumer("results-sink", RESULTS)),
            store,
            SinkOptions::default(),
        )
    }

    #[tokio::test]
    async fn test_duplicates_counted_once() {
        let stream = SqliteStream::open_in_memory(2).unwrap();
        let mut store = SqliteJobStore::open_in_memory().unwrap();
        let job = store.create_job(2).unwrap();

        let payload = error_result(&job.job_id, "https://example.com/a").to_vec().unwrap();
        let producer = stream.producer();
        for _ in 0..3 {
            producer.send(RESULTS, "example.com", &payload).await.unwrap();
        }

        let mut sink = sink(&stream, store);
        let stats = sink.run_once().await.unwrap();
        assert_eq!(stats.received, 3);
        assert_eq!(stats.recorded, 1);
        assert_eq!(stats.duplicates, 2);

        let loaded = sink.store().get_job(&job.job_id).unwrap().unwrap();
        assert_eq!(loaded.failed, 1);
        assert_eq!(loaded.state, JobState::Running);
    }

    #[tokio::test]
    async fn test_malformed_and_unknown_job_are_acknowledged() {
        let stream = SqliteStream::open_in_memory(1).unwrap();
        let producer = stream.producer();
        producer.send(RESULTS, "k", b"{broken").await.unwrap();
        producer
            .send(RESULTS, "k", &error_result("ghost", "https://example.com/a").to_vec().unwrap())
            .await
            .unwrap();

        let mut sink = sink(&stream, SqliteJobStore::open_in_memory().unwrap());
        let stats = sink.run_once().await.unwrap();
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.missing_jobs, 1);

        let consumer = stream.consumer("results-sink", RESULTS);
        assert_eq!(consumer.committed(0).await.unwrap(), Some(2));
    }

    /// Store that fails its first `apply_result` call
    struct FlakyStore {
        inner: SqliteJobStore,
        fail_next: bool,
    }

    impl JobStore for FlakyStore {
        fn create_job(&mut self, total: u64) -> StorageResult<JobRecord> {
            self.inner.create_job(total)
        }

        fn get_job(&self, job_id: &str) -> StorageResult<Option<JobRecord>> {
            self.inner.get_job(job_id)
        }

        fn apply_result(&mut self, result: &CrawlResult) -> StorageResult<ApplyOutcome> {
            if std::mem::take(&mut self.fail_next) {
                return Err(StorageError::Serialization("injected failure".to_string()));
            }
            self.inner.apply_result(result)
        }

        fn count_articles(&self, job_id: &str) -> StorageResult<u64> {
            self.inner.count_articles(job_id)
        }

        fn count_errors(&self, job_id: &str) -> StorageResult<u64> {
            self.inner.count_errors(job_id)
        }

        fn get_article(&self, job_id: &str, url: &str) -> StorageResult<Option<ArticleRecord>> {
            self.inner.get_article(job_id, url)
        }

        fn get_error_record(&self, job_id: &str, url: &str) -> StorageResult<Option<ErrorRecord>> {
            self.inner.get_error_record(job_id, url)
        }
    }

    #[tokio::test]
    async fn test_store_error_withholds_ack_and_redelivers() {
        let stream = SqliteStream::open_in_memory(1).unwrap();
        let mut inner = SqliteJobStore::open_in_memory().unwrap();
        let job = inner.create_job(2).unwrap();

        let producer = stream.producer();
        for url in ["https://example.com/a", "https://example.com/b"] {
            producer
                .send(RESULTS, "example.com", &error_result(&job.job_id, url).to_vec().unwrap())
                .await
                .unwrap();
        }

        let mut sink = sink(
            &stream,
            FlakyStore {
                inner,
                fail_next: true,
            },
        );

        let first = sink.run_once().await.unwrap();
        assert_eq!(first.deferred, 2);
        assert_eq!(first.recorded, 0);
        assert_eq!(stream.consumer("results-sink", RESULTS).committed(0).await.unwrap(), None);

        let second = sink.run_once().await.unwrap();
        assert_eq!(second.recorded, 2);

        let loaded = sink.store().get_job(&job.job_id).unwrap().unwrap();
        assert_eq!(loaded.failed, 2);
        assert_eq!(loaded.state, JobState::Done);
    }

    /// Consumer whose first commit fails
    struct CommitOnceFails {
        inner: SqliteConsumer,
        failed: bool,
    }

    #[async_trait]
    impl MessageConsumer for CommitOnceFails {
        async fn poll(&mut self, max: usize) -> StreamResult<Vec<Delivery>> {
            self.inner.poll(max).await
        }

        async fn commit(&mut self, partition: u32, next_offset: u64) -> StreamResult<()> {
            if !self.failed {
                self.failed = true;
                return Err(StreamError::Task("commit rejected".to_string()));
            }
            self.inner.commit(partition, next_offset).await
        }

        fn seek(&mut self, partition: u32, offset: u64) {
            self.inner.seek(partition, offset)
        }

        fn topic(&self) -> &str {
            self.inner.topic()
        }
    }

    #[tokio::test]
    async fn test_commit_failure_defers_and_reapplies() {
        let stream = SqliteStream::open_in_memory(1).unwrap();
        let mut store = SqliteJobStore::open_in_memory().unwrap();
        let job = store.create_job(2).unwrap();

        let producer = stream.producer();
        for url in ["https://example.com/a", "https://example.com/b"] {
            producer
                .send(RESULTS, "example.com", &error_result(&job.job_id, url).to_vec().unwrap())
                .await
                .unwrap();
        }

        let mut sink = ResultSink::new(
            Box::new(CommitOnceFails {
                inner: stream.consumer("results-sink", RESULTS),
                failed: false,
            }),
            store,
            SinkOptions::default(),
        );

        // The first result is applied but its ack is lost; the second waits behind it
        let first = sink.run_once().await.unwrap();
        assert_eq!(first.recorded, 1);
        assert_eq!(first.deferred, 2);
        assert_eq!(stream.consumer("results-sink", RESULTS).committed(0).await.unwrap(), None);

        let second = sink.run_once().await.unwrap();
        assert_eq!(second.received, 2);
        assert_eq!(second.duplicates, 1);
        assert_eq!(second.recorded, 1);
        assert_eq!(second.deferred, 0);
        assert_eq!(
            stream.consumer("results-sink", RESULTS).committed(0).await.unwrap(),
            Some(2)
        );

        let loaded = sink.store().get_job(&job.job_id).unwrap().unwrap();
        assert_eq!(loaded.failed, 2);
        assert_eq!(loaded.state, JobState::Done);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let stream = SqliteStream::open_in_memory(1).unwrap();
        let mut sink = sink(&stream, SqliteJobStore::open_in_memory().unwrap());
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        assert!(sink.run(shutdown).await.is_ok());
    }
}
