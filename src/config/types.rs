use serde::Deserialize;

/// Main configuration structure for News-Harvest
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    #[serde(default)]
    pub requests: RequestDefaults,
    pub stream: StreamConfig,
    pub store: StoreConfig,
}

/// Crawl worker behavior configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Maximum number of pipelines in flight per process
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Maximum number of pipelines in flight per hostname
    #[serde(rename = "domain-concurrency", default = "default_domain_concurrency")]
    pub domain_concurrency: usize,

    /// Fetch attempts per request, including the first
    #[serde(rename = "max-attempts", default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Requests polled per batch; twice `concurrency` when absent
    #[serde(default)]
    pub prefetch: Option<usize>,

    /// Base retry delay (milliseconds), doubled per attempt
    #[serde(rename = "backoff-base-ms", default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Upper bound of the random delay added to each retry (milliseconds)
    #[serde(rename = "backoff-jitter-ms", default = "default_backoff_jitter_ms")]
    pub backoff_jitter_ms: u64,

    /// Redirect hops followed before a fetch counts as failed
    #[serde(rename = "max-redirects", default = "default_max_redirects")]
    pub max_redirects: usize,

    /// Upper bound on the robots.txt fetch timeout (milliseconds)
    #[serde(rename = "robots-timeout-ms", default = "default_robots_timeout_ms")]
    pub robots_timeout_ms: u64,

    /// Age after which a cached robots.txt is fetched again; never when absent
    #[serde(rename = "robots-ttl-secs", default)]
    pub robots_ttl_secs: Option<u64>,

    /// Idle domain gates kept in memory; unbounded when absent
    #[serde(rename = "max-idle-domains", default)]
    pub max_idle_domains: Option<usize>,
}

impl WorkerConfig {
    pub fn effective_prefetch(&self) -> usize {
        self.prefetch
            .filter(|&p| p > 0)
            .unwrap_or_else(|| self.concurrency.saturating_mul(2))
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            domain_concurrency: default_domain_concurrency(),
            max_attempts: default_max_attempts(),
            prefetch: None,
            backoff_base_ms: default_backoff_base_ms(),
            backoff_jitter_ms: default_backoff_jitter_ms(),
            max_redirects: default_max_redirects(),
            robots_timeout_ms: default_robots_timeout_ms(),
            robots_ttl_secs: None,
            max_idle_domains: None,
        }
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler; also the token matched against robots.txt groups
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

/// Values used when a request message leaves a field out
#[derive(Debug, Clone, Deserialize)]
pub struct RequestDefaults {
    #[serde(rename = "timeout-ms", default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(rename = "max-bytes", default = "default_max_bytes")]
    pub max_bytes: u64,
}

impl Default for RequestDefaults {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_bytes: default_max_bytes(),
        }
    }
}

/// Message stream configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// Path to the SQLite message log
    #[serde(rename = "database-path")]
    pub database_path: String,

    #[serde(rename = "requests-topic", default = "default_requests_topic")]
    pub requests_topic: String,

    #[serde(rename = "results-topic", default = "default_results_topic")]
    pub results_topic: String,

    /// Partitions per topic; every process sharing the log must agree
    #[serde(default = "default_partitions")]
    pub partitions: u32,

    #[serde(rename = "worker-group", default = "default_worker_group")]
    pub worker_group: String,

    #[serde(rename = "sink-group", default = "default_sink_group")]
    pub sink_group: String,

    /// Results applied per sink batch
    #[serde(rename = "sink-batch-size", default = "default_sink_batch_size")]
    pub sink_batch_size: usize,

    /// Sleep between empty polls (milliseconds)
    #[serde(rename = "poll-interval-ms", default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

/// Job store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Path to the SQLite job database
    #[serde(rename = "database-path")]
    pub database_path: String,
}

fn default_concurrency() -> usize {
    10
}

fn default_domain_concurrency() -> usize {
    2
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    300
}

fn default_backoff_jitter_ms() -> u64 {
    200
}

fn default_max_redirects() -> usize {
    5
}

fn default_robots_timeout_ms() -> u64 {
    4000
}

fn default_timeout_ms() -> u64 {
    8000
}

fn default_max_bytes() -> u64 {
    2_000_000
}

fn default_requests_topic() -> String {
    "crawl_requests".to_string()
}

fn default_results_topic() -> String {
    "crawl_results".to_string()
}

fn default_partitions() -> u32 {
    4
}

fn default_worker_group() -> String {
    "crawler-workers".to_string()
}

fn default_sink_group() -> String {
    "results-sink".to_string()
}

fn default_sink_batch_size() -> usize {
    100
}

fn default_poll_interval_ms() -> u64 {
    250
}
