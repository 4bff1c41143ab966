//! HTTP client construction

use crate::config::UserAgentConfig;
use reqwest::{redirect::Policy, Client};
use std::time::Duration;

/// Formats the user agent string: `CrawlerName/Version (+ContactURL; ContactEmail)`
pub fn user_agent_string(config: &UserAgentConfig) -> String {
    format!(
        "{}/{} (+{}; {})",
        config.crawler_name, config.crawler_version, config.contact_url, config.contact_email
    )
}

/// Builds an HTTP client with proper configuration
///
/// Redirects are followed by reqwest up to `max_redirects` hops; exceeding the
/// bound surfaces as a request error, which the fetcher classifies as
/// `download_failed`. There is no client-wide timeout: each attempt is wrapped
/// in its own wall-clock timeout by the fetcher.
///
/// # Example
///
/// ```no_run
/// use news_harvest::config::UserAgentConfig;
/// use news_harvest::fetcher::build_http_client;
///
/// let config = UserAgentConfig {
///     crawler_name: "NewsHarvest".to_string(),
///     crawler_version: "1.0".to_string(),
///     contact_url: "https://example.com/about".to_string(),
///     contact_email: "admin@example.com".to_string(),
/// };
///
/// let client = build_http_client(&config, 5).unwrap();
/// ```
pub fn build_http_client(
    config: &UserAgentConfig,
    max_redirects: usize,
) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(user_agent_string(config))
        .connect_timeout(Duration::from_secs(10))
        .redirect(Policy::limited(max_redirects))
        .gzip(true)
        .brotli(true)
        .build()
}
