//! Cached robots.txt entries

use crate::robots::RobotsRules;
use chrono::{DateTime, Duration, Utc};

/// Rules for an origin along with when they were obtained
#[derive(Debug, Clone)]
pub struct CachedRobots {
    /// The rules, or the fail-open sentinel
    pub rules: RobotsRules,

    /// When the robots.txt lookup finished
    pub fetched_at: DateTime<Utc>,
}

impl CachedRobots {
    /// Creates an entry stamped with the current time
    pub fn new(rules: RobotsRules) -> Self {
        Self {
            rules,
            fetched_at: Utc::now(),
        }
    }

    /// Returns how long ago the entry was created
    pub fn age(&self) -> Duration {
        Utc::now() - self.fetched_at
    }

    /// Checks whether the entry should be refreshed
    ///
    /// Without a TTL entries never expire and live as long as the process.
    pub fn is_stale(&self, ttl: Option<Duration>) -> bool {
        match ttl {
            Some(ttl) => self.age() > ttl,
            None => false,
        }
    }

    pub fn is_allowed(&self, url: &str, user_agent: &str) -> bool {
        self.rules.is_allowed(url, user_agent)
    }
}
