//! Crawl worker
//!
//! [`CrawlPipeline`] turns one request into one result; [`CrawlWorker`]
//! drives pipelines from the requests topic and publishes their results.

mod pipeline;
mod runner;

pub use pipeline::{CrawlPipeline, PipelineSettings};
pub use runner::{CrawlWorker, WorkerBatchStats, WorkerOptions};
