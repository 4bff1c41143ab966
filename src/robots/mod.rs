//! Robots.txt handling module
//!
//! This module fetches, parses and caches robots.txt per origin. Lookups are
//! fail-open: if robots.txt cannot be fetched or read, the origin is cached
//! as "allow everything" instead of being retried on every request.

mod cache;
mod parser;

pub use cache::CachedRobots;
pub use parser::RobotsRules;

use crate::url::origin_of;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::OnceCell;
use url::Url;

/// Per-origin robots.txt cache
///
/// Concurrent first lookups for the same origin share one fetch: each origin
/// maps to a `OnceCell` that the first caller initializes and the rest await.
pub struct RobotsCache {
    client: Client,
    user_agent: String,
    ttl: Option<chrono::Duration>,
    entries: Mutex<HashMap<String, Arc<OnceCell<CachedRobots>>>>,
}

impl RobotsCache {
    /// Creates a cache that keeps entries for the life of the process
    ///
    /// # Arguments
    ///
    /// * `client` - The HTTP client used to fetch robots.txt
    /// * `user_agent` - The product token matched against `User-agent` groups
    pub fn new(client: Client, user_agent: impl Into<String>) -> Self {
        Self {
            client,
            user_agent: user_agent.into(),
            ttl: None,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Re-fetches an origin's robots.txt once its entry is older than `ttl`
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl.and_then(|t| chrono::Duration::from_std(t).ok());
        self
    }

    /// Checks whether `url` may be fetched
    ///
    /// The first query for an origin fetches `/robots.txt` bounded by
    /// `timeout`. Any failure is cached as fail-open.
    pub async fn allowed(&self, url: &Url, timeout: Duration) -> bool {
        let origin = match origin_of(url) {
            Ok(origin) => origin,
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "No origin for robots lookup, allowing");
                return true;
            }
        };

        let cell = self.entry(&origin);
        let cached = cell
            .get_or_init(|| async {
                let rules = fetch_robots(&self.client, &origin, timeout).await;
                CachedRobots::new(rules)
            })
            .await;

        cached.is_allowed(url.as_str(), &self.user_agent)
    }

    /// Returns the cached entry for an origin without fetching
    pub fn cached(&self, origin: &str) -> Option<CachedRobots> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.get(origin).and_then(|cell| cell.get().cloned())
    }

    /// Number of origins with an entry (initialized or in flight)
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entry(&self, origin: &str) -> Arc<OnceCell<CachedRobots>> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(cell) = entries.get(origin) {
            let stale = cell.get().is_some_and(|c| c.is_stale(self.ttl));
            if !stale {
                return Arc::clone(cell);
            }
            tracing::debug!(origin, "Robots.txt entry expired, refetching");
        }

        let cell = Arc::new(OnceCell::new());
        entries.insert(origin.to_string(), Arc::clone(&cell));
        cell
    }
}

/// Fetches and parses `<origin>/robots.txt`
///
/// Never fails: network errors, timeouts, HTTP status >= 400 and undecodable
/// bodies all produce `RobotsRules::FailOpen`.
pub async fn fetch_robots(client: &Client, origin: &str, timeout: Duration) -> RobotsRules {
    let robots_url = format!("{}/robots.txt", origin.trim_end_matches('/'));

    let lookup = async {
        let response = client.get(&robots_url).send().await?;
        let status = response.status();
        if status.as_u16() >= 400 {
            return Ok(Err(format!("HTTP {}", status.as_u16())));
        }
        let body = response.bytes().await?;
        Ok::<_, reqwest::Error>(
            String::from_utf8(body.to_vec()).map_err(|e| format!("Invalid UTF-8: {}", e)),
        )
    };

    match tokio::time::timeout(timeout, lookup).await {
        Ok(Ok(Ok(content))) => {
            tracing::debug!(origin, bytes = content.len(), "Fetched robots.txt");
            RobotsRules::from_content(&content)
        }
        Ok(Ok(Err(reason))) => {
            tracing::debug!(origin, %reason, "Robots.txt unusable, failing open");
            RobotsRules::FailOpen
        }
        Ok(Err(e)) => {
            tracing::debug!(origin, error = %e, "Robots.txt fetch failed, failing open");
            RobotsRules::FailOpen
        }
        Err(_) => {
            tracing::debug!(origin, ?timeout, "Robots.txt fetch timed out, failing open");
            RobotsRules::FailOpen
        }
    }
}
