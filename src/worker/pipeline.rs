//! The per-request crawl pipeline
//!
//! One request goes through admission, the optional robots check, the
//! retrying fetch and extraction, and always comes out as exactly one
//! [`CrawlResult`]. Problems with the page become error results; only
//! infrastructure failures (a closed limiter) surface as `Err`.

use crate::config::Config;
use crate::extract::Extractor;
use crate::fetcher::{build_http_client, FetchOptions, FetchResult, Fetcher, RetryPolicy};
use crate::limiter::ConcurrencyLimiter;
use crate::messages::{CrawlRequest, CrawlResult, ErrorCode};
use crate::robots::RobotsCache;
use crate::HarvestError;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Worker-wide values applied to every request
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Timeout used when a request carries none
    pub default_timeout_ms: u64,

    /// Body cap used when a request carries none
    pub default_max_bytes: u64,

    /// Upper bound on the robots.txt lookup, whatever the request timeout
    pub robots_timeout: Duration,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_timeout_ms: config.requests.timeout_ms,
            default_max_bytes: config.requests.max_bytes,
            robots_timeout: Duration::from_millis(config.worker.robots_timeout_ms),
        }
    }
}

/// Everything a worker shares between its concurrent pipelines
pub struct CrawlPipeline {
    limiter: ConcurrencyLimiter,
    robots: RobotsCache,
    fetcher: Fetcher,
    extractor: Arc<Extractor>,
    settings: PipelineSettings,
}

impl CrawlPipeline {
    pub fn new(
        limiter: ConcurrencyLimiter,
        robots: RobotsCache,
        fetcher: Fetcher,
        extractor: Extractor,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            limiter,
            robots,
            fetcher,
            extractor: Arc::new(extractor),
            settings,
        }
    }

    /// Builds the pipeline described by `config`
    ///
    /// The page fetcher and the robots cache share one HTTP client, so both
    /// send the same user agent.
    pub fn from_config(config: &Config) -> Result<Self, HarvestError> {
        let worker = &config.worker;
        let client = build_http_client(&config.user_agent, worker.max_redirects)?;

        let limiter = ConcurrencyLimiter::with_idle_cap(
            worker.concurrency,
            worker.domain_concurrency,
            worker.max_idle_domains,
        );
        let robots = RobotsCache::new(client.clone(), config.user_agent.crawler_name.clone())
            .with_ttl(worker.robots_ttl_secs.map(Duration::from_secs));
        let fetcher = Fetcher::new(
            client,
            RetryPolicy {
                max_attempts: worker.max_attempts,
                backoff_base: Duration::from_millis(worker.backoff_base_ms),
                backoff_jitter: Duration::from_millis(worker.backoff_jitter_ms),
            },
        );

        Ok(Self::new(
            limiter,
            robots,
            fetcher,
            Extractor::default(),
            PipelineSettings::from_config(config),
        ))
    }

    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    /// Runs one request to its result
    ///
    /// The fetch permit is held until the result is built, so the gates
    /// bound whole pipelines rather than single downloads.
    pub async fn process(&self, request: &CrawlRequest) -> Result<CrawlResult, HarvestError> {
        let domain = request.routing_key()?;
        let _permit = self.limiter.acquire(&domain).await?;
        let worker_fetched_at = Utc::now();

        let timeout =
            Duration::from_millis(request.effective_timeout_ms(self.settings.default_timeout_ms));

        if request.respect_robots {
            let robots_timeout = timeout.min(self.settings.robots_timeout);
            if !self.robots.allowed(&request.url, robots_timeout).await {
                tracing::info!(job_id = %request.job_id, url = %request.url, "Blocked by robots.txt");
                return Ok(CrawlResult::error(
                    request,
                    ErrorCode::RobotsDisallowed,
                    None,
                    worker_fetched_at,
                ));
            }
        }

        let options = FetchOptions {
            timeout,
            max_bytes: request.effective_max_bytes(self.settings.default_max_bytes),
        };

        let (status_code, final_url, html) = match self.fetcher.fetch(&request.url, &options).await
        {
            FetchResult::Response {
                status_code,
                final_url,
                html,
                ..
            } => (status_code, final_url, html),
            FetchResult::Failed {
                kind,
                message,
                attempts,
            } => {
                tracing::warn!(
                    job_id = %request.job_id,
                    url = %request.url,
                    kind = %kind,
                    attempts,
                    error = %message,
                    "Fetch failed"
                );
                return Ok(CrawlResult::error(
                    request,
                    kind.into(),
                    None,
                    worker_fetched_at,
                ));
            }
        };

        if !(200..300).contains(&status_code) {
            tracing::warn!(
                job_id = %request.job_id,
                url = %request.url,
                status_code,
                "Non-success HTTP status"
            );
            return Ok(CrawlResult::error(
                request,
                ErrorCode::Http(status_code),
                Some(status_code),
                worker_fetched_at,
            ));
        }

        // Relative canonical links resolve against where the page actually came from
        let page_url = Url::parse(&final_url).unwrap_or_else(|_| request.url.clone());

        // Parsing is CPU-bound and a stage may panic on hostile markup; keep both off the async workers
        let extractor = Arc::clone(&self.extractor);
        let extracted =
            tokio::task::spawn_blocking(move || extractor.extract(&page_url, &html)).await;

        match extracted {
            Ok(Ok(article)) => {
                tracing::info!(
                    job_id = %request.job_id,
                    url = %request.url,
                    status_code,
                    title = article.title.as_deref().unwrap_or(""),
                    "Article extracted"
                );
                Ok(CrawlResult::ok(request, status_code, article, worker_fetched_at))
            }
            Ok(Err(e)) => {
                tracing::warn!(job_id = %request.job_id, url = %request.url, error = %e, "Extraction failed");
                Ok(CrawlResult::error(
                    request,
                    ErrorCode::ExtractionFailed,
                    Some(status_code),
                    worker_fetched_at,
                ))
            }
            Err(e) => {
                tracing::error!(job_id = %request.job_id, url = %request.url, error = %e, "Extraction crashed");
                Ok(CrawlResult::error(
                    request,
                    ErrorCode::ExtractionFailed,
                    Some(status_code),
                    worker_fetched_at,
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{ContentExtractor, ExtractedArticle, ExtractionError, JsonLdExtractor};
    use crate::messages::ResultStatus;
    use reqwest::Client;
    use scraper::Html;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ARTICLE: &str = r#"<html lang="en"><head>
        <title>Harbour reopens</title>
        <link rel="canonical" href="/news/harbour">
        <meta name="author" content="Jane Doe">
        <meta name="keywords" content="ports, shipping">
        </head><body><article>
        <p>The harbour reopened on Monday after three weeks of repairs, officials said.</p>
        <p>Ferries resumed their normal timetable, and cargo traffic is expected to follow.</p>
        </article></body></html>"#;

    fn settings() -> PipelineSettings {
        PipelineSettings {
            default_timeout_ms: 2000,
            default_max_bytes: 100_000,
            robots_timeout: Duration::from_millis(500),
        }
    }

    fn pipeline_with(extractor: Extractor) -> CrawlPipeline {
        let client = Client::new();
        CrawlPipeline::new(
            ConcurrencyLimiter::new(4, 2),
            RobotsCache::new(client.clone(), "TestCrawler"),
            Fetcher::new(
                client,
                RetryPolicy {
                    max_attempts: 3,
                    backoff_base: Duration::from_millis(1),
                    backoff_jitter: Duration::ZERO,
                },
            ),
            extractor,
            settings(),
        )
    }

    fn pipeline() -> CrawlPipeline {
        pipeline_with(Extractor::default())
    }

    fn request(server: &MockServer, page: &str) -> CrawlRequest {
        let url = Url::parse(&format!("{}{}", server.uri(), page)).unwrap();
        CrawlRequest::new("job-1", url)
    }

    #[tokio::test]
    async fn test_article_becomes_ok_result() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/news/harbour"))
            .respond_with(ResponseTemplate::new(200).set_body_string(ARTICLE))
            .mount(&server)
            .await;

        let req = request(&server, "/news/harbour");
        let result = pipeline().process(&req).await.unwrap();

        assert_eq!(result.status, ResultStatus::Ok);
        assert_eq!(result.http_status, Some(200));
        assert_eq!(result.title.as_deref(), Some("Harbour reopens"));
        assert_eq!(result.author.as_deref(), Some("Jane Doe"));
        assert_eq!(result.language.as_deref(), Some("en"));
        assert_eq!(result.tags, vec!["ports", "shipping"]);
        assert_eq!(
            result.canonical_url,
            Some(format!("{}/news/harbour", server.uri()))
        );
        assert!(result.text.contains("Ferries resumed"));
        assert!(result.error.is_none());
        assert_eq!(result.requested_at, req.requested_at);
        assert!(result.worker_fetched_at.is_some());
    }

    #[tokio::test]
    async fn test_not_found_becomes_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let result = pipeline().process(&request(&server, "/gone")).await.unwrap();

        assert_eq!(result.status, ResultStatus::Error);
        assert_eq!(result.error.as_deref(), Some("http_404"));
        assert_eq!(result.http_status, Some(404));
        assert!(result.title.is_none());
    }

    #[tokio::test]
    async fn test_always_unavailable_is_attempted_max_times() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let result = pipeline().process(&request(&server, "/busy")).await.unwrap();

        assert_eq!(result.error.as_deref(), Some("http_503"));
        assert_eq!(result.http_status, Some(503));
    }

    #[tokio::test]
    async fn test_robots_disallowed_skips_page_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /private\n"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/private/page"))
            .respond_with(ResponseTemplate::new(200).set_body_string(ARTICLE))
            .expect(0)
            .mount(&server)
            .await;

        let mut req = request(&server, "/private/page");
        req.respect_robots = true;
        let result = pipeline().process(&req).await.unwrap();

        assert_eq!(result.error.as_deref(), Some("robots_disallowed"));
        assert_eq!(result.http_status, None);
    }

    #[tokio::test]
    async fn test_robots_ignored_unless_requested() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /\n"))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(ResponseTemplate::new(200).set_body_string(ARTICLE))
            .mount(&server)
            .await;

        let result = pipeline().process(&request(&server, "/page")).await.unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_request_byte_cap_applies() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(5_000)))
            .expect(1)
            .mount(&server)
            .await;

        let mut req = request(&server, "/big");
        req.max_bytes = Some(1_000);
        let result = pipeline().process(&req).await.unwrap();

        assert_eq!(result.error.as_deref(), Some("max_bytes_exceeded"));
        assert_eq!(result.http_status, None);
    }

    struct BrokenStage;

    impl ContentExtractor for BrokenStage {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn extract(&self, _: &Html, _: &Url) -> Result<ExtractedArticle, ExtractionError> {
            Err(ExtractionError::Stage {
                stage: "broken",
                reason: "unreadable".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_extraction_failure_keeps_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(ARTICLE))
            .mount(&server)
            .await;

        let extractor = Extractor::new(Box::new(JsonLdExtractor), vec![Box::new(BrokenStage)]);
        let result = pipeline_with(extractor)
            .process(&request(&server, "/page"))
            .await
            .unwrap();

        assert_eq!(result.error.as_deref(), Some("extraction_failed"));
        assert_eq!(result.http_status, Some(200));
    }

    struct CrashingStage;

    impl ContentExtractor for CrashingStage {
        fn name(&self) -> &'static str {
            "crashing"
        }

        fn extract(&self, _: &Html, _: &Url) -> Result<ExtractedArticle, ExtractionError> {
            panic!("stage blew up on this markup");
        }
    }

    #[tokio::test]
    async fn test_extraction_panic_becomes_extraction_failed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(ARTICLE))
            .mount(&server)
            .await;

        let extractor = Extractor::new(Box::new(CrashingStage), vec![]);
        let pipeline = pipeline_with(extractor);
        let result = pipeline.process(&request(&server, "/page")).await.unwrap();

        assert_eq!(result.status, ResultStatus::Error);
        assert_eq!(result.error.as_deref(), Some("extraction_failed"));
        assert_eq!(result.http_status, Some(200));
        assert_eq!(pipeline.limiter().in_flight(), 0);
    }

    #[tokio::test]
    async fn test_permit_released_after_each_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let pipeline = pipeline();
        for _ in 0..5 {
            pipeline.process(&request(&server, "/x")).await.unwrap();
        }
        assert_eq!(pipeline.limiter().in_flight(), 0);
    }
}
