//! Shared fixtures for the integration tests

use news_harvest::extract::Extractor;
use news_harvest::fetcher::{Fetcher, RetryPolicy};
use news_harvest::limiter::ConcurrencyLimiter;
use news_harvest::messages::CrawlRequest;
use news_harvest::robots::RobotsCache;
use news_harvest::sink::{ResultSink, SinkOptions};
use news_harvest::storage::SqliteJobStore;
use news_harvest::stream::{MessageProducer, SqliteStream};
use news_harvest::worker::{CrawlPipeline, CrawlWorker, PipelineSettings, WorkerOptions};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use url::Url;
use wiremock::MockServer;

pub const REQUESTS: &str = "crawl_requests";
pub const RESULTS: &str = "crawl_results";

pub const ARTICLE_HTML: &str = r#"<html lang="en">
<head>
  <title>Fallback title</title>
  <link rel="canonical" href="/stories/bridge">
  <script type="application/ld+json">
  {
    "@context": "https://schema.org",
    "@type": "NewsArticle",
    "headline": "Bridge opens to traffic",
    "author": {"@type": "Person", "name": "Sam Reporter"},
    "datePublished": "2024-03-01T08:30:00Z",
    "keywords": ["infrastructure", "city"]
  }
  </script>
</head>
<body>
  <article>
    <p>The new bridge opened to traffic on Friday morning, ending years of detours.</p>
    <p>City officials said the crossing would cut commute times, especially at rush hour.</p>
  </article>
</body>
</html>"#;

pub fn pipeline(max_attempts: u32) -> Arc<CrawlPipeline> {
    let client = Client::new();
    Arc::new(CrawlPipeline::new(
        ConcurrencyLimiter::new(8, 2),
        RobotsCache::new(client.clone(), "NewsHarvest"),
        Fetcher::new(
            client,
            RetryPolicy {
                max_attempts,
                backoff_base: Duration::from_millis(1),
                backoff_jitter: Duration::ZERO,
            },
        ),
        Extractor::default(),
        PipelineSettings {
            default_timeout_ms: 2_000,
            default_max_bytes: 500_000,
            robots_timeout: Duration::from_millis(500),
        },
    ))
}

pub fn worker(stream: &SqliteStream, max_attempts: u32) -> CrawlWorker {
    CrawlWorker::new(
        pipeline(max_attempts),
        Box::new(stream.consumer("crawler-workers", REQUESTS)),
        Arc::new(stream.producer()),
        WorkerOptions {
            prefetch: 16,
            results_topic: RESULTS.to_string(),
            poll_interval: Duration::from_millis(10),
            error_backoff: Duration::from_millis(10),
        },
    )
}

pub fn sink(stream: &SqliteStream, store: SqliteJobStore) -> ResultSink<SqliteJobStore> {
    ResultSink::new(
        Box::new(stream.consumer("results-sink", RESULTS)),
        store,
        SinkOptions::default(),
    )
}

pub fn page_url(server: &MockServer, page: &str) -> Url {
    Url::parse(&format!("{}{}", server.uri(), page)).unwrap()
}

pub async fn submit(stream: &SqliteStream, request: &CrawlRequest) {
    stream
        .producer()
        .send(
            REQUESTS,
            &request.routing_key().unwrap(),
            &request.to_vec().unwrap(),
        )
        .await
        .unwrap();
}
