//! Article extraction
//!
//! Turns a downloaded HTML page into a normalized article record. Extraction
//! runs as an ordered chain of stages:
//!
//! 1. a primary full-document extractor (structured data); best effort, its
//!    failures are logged and ignored
//! 2. a readability-style fallback that scores text blocks
//! 3. a meta-tag pass (`<meta>`, `<html lang>`, `<link rel="canonical">`)
//!
//! Each field is resolved to the first non-empty value in stage order. A
//! failure raised by any stage after the primary one fails the whole
//! extraction.

mod meta;
mod primary;
mod readability;

pub use meta::MetaTagExtractor;
pub use primary::JsonLdExtractor;
pub use readability::ReadabilityExtractor;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use scraper::{Html, Selector};
use thiserror::Error;
use url::Url;

/// Maximum number of tags kept per article
pub const MAX_TAGS: usize = 30;

/// Extraction errors
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Invalid selector {selector}: {reason}")]
    Selector { selector: String, reason: String },

    #[error("{stage} failed: {reason}")]
    Stage { stage: &'static str, reason: String },
}

/// Fields extracted from one page
///
/// Every stage produces one of these; the pipeline merges them field by field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedArticle {
    pub title: Option<String>,
    pub author: Option<String>,
    pub language: Option<String>,
    pub text: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
    pub canonical_url: Option<String>,
}

impl ExtractedArticle {
    /// Fills every empty field from `other`
    fn fill_from(&mut self, other: ExtractedArticle) {
        fill(&mut self.title, other.title);
        fill(&mut self.author, other.author);
        fill(&mut self.language, other.language);
        fill(&mut self.text, other.text);
        fill(&mut self.canonical_url, other.canonical_url);
        if self.published_at.is_none() {
            self.published_at = other.published_at;
        }
        if self.tags.is_empty() {
            self.tags = other.tags;
        }
    }
}

fn fill(slot: &mut Option<String>, candidate: Option<String>) {
    if slot.as_deref().map_or(true, str::is_empty) {
        *slot = candidate.filter(|s| !s.is_empty());
    }
}

/// One extraction stage
pub trait ContentExtractor: Send + Sync {
    /// Stage name used in logs and errors
    fn name(&self) -> &'static str;

    /// Extracts whatever fields this stage knows about
    fn extract(&self, document: &Html, page_url: &Url) -> Result<ExtractedArticle, ExtractionError>;
}

/// Ordered extraction chain
pub struct Extractor {
    primary: Box<dyn ContentExtractor>,
    fallbacks: Vec<Box<dyn ContentExtractor>>,
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new(
            Box::new(JsonLdExtractor),
            vec![Box::new(ReadabilityExtractor), Box::new(MetaTagExtractor)],
        )
    }
}

impl Extractor {
    pub fn new(
        primary: Box<dyn ContentExtractor>,
        fallbacks: Vec<Box<dyn ContentExtractor>>,
    ) -> Self {
        Self { primary, fallbacks }
    }

    /// Extracts an article from `html` fetched from `page_url`
    pub fn extract(&self, page_url: &Url, html: &str) -> Result<ExtractedArticle, ExtractionError> {
        let document = Html::parse_document(html);

        let mut article = match self.primary.extract(&document, page_url) {
            Ok(fields) => fields,
            Err(e) => {
                tracing::debug!(
                    url = %page_url,
                    stage = self.primary.name(),
                    error = %e,
                    "Primary extractor failed, using fallbacks"
                );
                ExtractedArticle::default()
            }
        };

        for stage in &self.fallbacks {
            let fields = stage.extract(&document, page_url)?;
            article.fill_from(fields);
        }

        Ok(article)
    }
}

/// Parses a CSS selector, mapping failures to `ExtractionError`
pub(crate) fn selector(css: &str) -> Result<Selector, ExtractionError> {
    Selector::parse(css).map_err(|e| ExtractionError::Selector {
        selector: css.to_string(),
        reason: format!("{:?}", e),
    })
}

/// The root element's `lang` attribute
pub(crate) fn html_lang(document: &Html) -> Result<Option<String>, ExtractionError> {
    let html_sel = selector("html[lang]")?;
    Ok(document
        .select(&html_sel)
        .next()
        .and_then(|element| element.value().attr("lang"))
        .map(str::trim)
        .filter(|lang| !lang.is_empty())
        .map(str::to_string))
}

/// Collapses runs of whitespace into single spaces and trims the ends
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parses a publish date in any of the forms seen in article markup
///
/// Accepts RFC 3339, RFC 2822, `YYYY-MM-DDTHH:MM:SS`, `YYYY-MM-DD HH:MM:SS`
/// and bare `YYYY-MM-DD`. Values without an offset are taken as UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Splits a comma-separated keyword list, dropping blanks and capping the count
pub fn split_keywords(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .take(MAX_TAGS)
        .map(str::to_string)
        .collect()
}
