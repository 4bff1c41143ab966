//! Robots.txt rule evaluation
//!
//! This module wraps the robotstxt crate's matcher behind a small type that
//! also represents the fail-open sentinel.

use robotstxt::DefaultMatcher;

/// Rules for one origin
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RobotsRules {
    /// A fetched robots.txt body, matched on demand
    Parsed(String),

    /// robots.txt could not be obtained; everything is allowed
    FailOpen,
}

impl RobotsRules {
    /// Creates rules from raw robots.txt content
    pub fn from_content(content: &str) -> Self {
        Self::Parsed(content.to_string())
    }

    /// Returns true for the fail-open sentinel
    pub fn is_fail_open(&self) -> bool {
        matches!(self, Self::FailOpen)
    }

    /// Checks if a URL is allowed for the given user agent
    ///
    /// # Arguments
    ///
    /// * `url` - The absolute URL to check
    /// * `user_agent` - The product token to match `User-agent` groups against
    pub fn is_allowed(&self, url: &str, user_agent: &str) -> bool {
        match self {
            Self::FailOpen => true,
            Self::Parsed(content) if content.trim().is_empty() => true,
            Self::Parsed(content) => {
                let mut matcher = DefaultMatcher::default();
                matcher.one_agent_allowed_by_robots(content, user_agent, url)
            }
        }
    }
}
