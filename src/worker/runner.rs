//! Consumer loop of the crawl worker
//!
//! Each poll prefetches a batch of requests and runs one pipeline task per
//! request, so slow hosts never hold up the rest of the batch. Offsets are
//! committed per partition only across the contiguous prefix of requests
//! whose results were accepted by the results topic; the partition is then
//! rewound to its first unfinished request so it is delivered again.

use crate::config::Config;
use crate::messages::CrawlRequest;
use crate::stream::{Delivery, MessageConsumer, MessageProducer};
use crate::worker::pipeline::CrawlPipeline;
use crate::HarvestError;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Tuning for the worker loop
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Requests taken per poll
    pub prefetch: usize,

    /// Topic results are published to
    pub results_topic: String,

    /// Sleep between empty polls
    pub poll_interval: Duration,

    /// Sleep after a batch that left requests unacknowledged
    pub error_backoff: Duration,
}

impl WorkerOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            prefetch: config.worker.effective_prefetch(),
            results_topic: config.stream.results_topic.clone(),
            poll_interval: Duration::from_millis(config.stream.poll_interval_ms),
            error_backoff: Duration::from_secs(1),
        }
    }
}

/// Counts for one polled batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerBatchStats {
    pub received: usize,
    /// Results accepted by the results topic
    pub emitted: usize,
    /// Malformed requests acknowledged without a result
    pub dropped: usize,
    /// Requests left for redelivery
    pub retried: usize,
}

/// What happened to one delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Emitted,
    Dropped,
    Retry,
}

impl Disposition {
    fn acknowledged(self) -> bool {
        self != Disposition::Retry
    }
}

/// Crawl worker bound to one requests consumer
pub struct CrawlWorker {
    pipeline: Arc<CrawlPipeline>,
    consumer: Box<dyn MessageConsumer>,
    producer: Arc<dyn MessageProducer>,
    options: WorkerOptions,
}

impl CrawlWorker {
    pub fn new(
        pipeline: Arc<CrawlPipeline>,
        consumer: Box<dyn MessageConsumer>,
        producer: Arc<dyn MessageProducer>,
        options: WorkerOptions,
    ) -> Self {
        Self {
            pipeline,
            consumer,
            producer,
            options,
        }
    }

    /// Polls one batch, runs it to completion and commits what it can
    pub async fn run_once(&mut self) -> Result<WorkerBatchStats, HarvestError> {
        let batch = self.consumer.poll(self.options.prefetch).await?;
        let mut stats = WorkerBatchStats {
            received: batch.len(),
            ..Default::default()
        };

        let mut tasks = Vec::with_capacity(batch.len());
        for delivery in batch {
            let partition = delivery.partition;
            let offset = delivery.offset;
            let pipeline = Arc::clone(&self.pipeline);
            let producer = Arc::clone(&self.producer);
            let topic = self.options.results_topic.clone();

            let task = tokio::spawn(async move {
                handle_delivery(&pipeline, producer.as_ref(), &topic, &delivery).await
            });
            tasks.push((partition, offset, task));
        }

        // Deliveries of a partition arrive in offset order, and are pushed in that order
        let mut by_partition: BTreeMap<u32, Vec<(u64, Disposition)>> = BTreeMap::new();
        for (partition, offset, task) in tasks {
            let disposition = match task.await {
                Ok(disposition) => disposition,
                Err(e) => {
                    tracing::error!(partition, offset, error = %e, "Pipeline task panicked");
                    Disposition::Retry
                }
            };

            match disposition {
                Disposition::Emitted => stats.emitted += 1,
                Disposition::Dropped => stats.dropped += 1,
                Disposition::Retry => stats.retried += 1,
            }
            by_partition
                .entry(partition)
                .or_default()
                .push((offset, disposition));
        }

        for (partition, outcomes) in by_partition {
            self.settle_partition(partition, &outcomes).await;
        }

        Ok(stats)
    }

    async fn settle_partition(&mut self, partition: u32, outcomes: &[(u64, Disposition)]) {
        let Some(&(first_offset, _)) = outcomes.first() else {
            return;
        };

        let acked_through = outcomes
            .iter()
            .take_while(|(_, d)| d.acknowledged())
            .last()
            .map(|&(offset, _)| offset);

        if let Some(last) = acked_through {
            if let Err(e) = self.consumer.commit(partition, last + 1).await {
                tracing::error!(
                    partition,
                    offset = last,
                    error = %e,
                    "Offset commit failed, rewinding partition"
                );
                self.consumer.seek(partition, first_offset);
                return;
            }
        }

        if let Some(&(offset, _)) = outcomes.iter().find(|(_, d)| !d.acknowledged()) {
            tracing::debug!(partition, offset, "Rewinding partition for redelivery");
            self.consumer.seek(partition, offset);
        }
    }

    /// Runs until `shutdown` is cancelled
    ///
    /// Cancellation is observed between batches; the batch in flight always
    /// finishes and commits first.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<(), HarvestError> {
        tracing::info!(
            topic = self.consumer.topic(),
            prefetch = self.options.prefetch,
            "Crawl worker started"
        );

        while !shutdown.is_cancelled() {
            let pause = match self.run_once().await {
                Ok(stats) if stats.retried > 0 => {
                    tracing::warn!(?stats, "Batch left requests for redelivery");
                    Some(self.options.error_backoff)
                }
                Ok(stats) if stats.received == 0 => Some(self.options.poll_interval),
                Ok(stats) => {
                    tracing::info!(
                        received = stats.received,
                        emitted = stats.emitted,
                        dropped = stats.dropped,
                        "Batch complete"
                    );
                    None
                }
                Err(e) => {
                    tracing::error!(error = %e, "Polling requests failed");
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

        tracing::info!("Crawl worker stopped");
        Ok(())
    }
}

/// Turns one delivery into a published result
async fn handle_delivery(
    pipeline: &CrawlPipeline,
    producer: &dyn MessageProducer,
    results_topic: &str,
    delivery: &Delivery,
) -> Disposition {
    let request = match CrawlRequest::from_slice(&delivery.payload) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!(
                partition = delivery.partition,
                offset = delivery.offset,
                error = %e,
                "Dropping malformed request"
            );
            return Disposition::Dropped;
        }
    };

    let key = match request.routing_key() {
        Ok(key) => key,
        Err(e) => {
            tracing::warn!(job_id = %request.job_id, url = %request.url, error = %e, "Dropping unroutable request");
            return Disposition::Dropped;
        }
    };

    let result = match pipeline.process(&request).await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(job_id = %request.job_id, url = %request.url, error = %e, "Pipeline failed");
            return Disposition::Retry;
        }
    };

    let payload = match result.to_vec() {
        Ok(payload) => payload,
        Err(e) => {
            tracing::error!(job_id = %request.job_id, url = %request.url, error = %e, "Result encoding failed");
            return Disposition::Retry;
        }
    };

    match producer.send(results_topic, &key, &payload).await {
        Ok((partition, offset)) => {
            tracing::debug!(
                job_id = %request.job_id,
                url = %request.url,
                status = ?result.status,
                partition,
                offset,
                "Result published"
            );
            Disposition::Emitted
        }
        Err(e) => {
            tracing::error!(
                job_id = %request.job_id,
                url = %request.url,
                error = %e,
                "Publishing result failed, request will be redelivered"
            );
            Disposition::Retry
        }
    }
}
