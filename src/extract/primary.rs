//! Structured-data extractor
//!
//! Reads schema.org article objects from `<script type="application/ld+json">`
//! blocks. Publishers that emit these usually fill in the headline, byline,
//! body and dates more reliably than the visible markup.

use super::{
    collapse_whitespace, parse_timestamp, selector, split_keywords, ContentExtractor,
    ExtractedArticle, ExtractionError, MAX_TAGS,
};
use scraper::Html;
use serde_json::Value;
use url::Url;

const ARTICLE_TYPES: &[&str] = &[
    "Article",
    "NewsArticle",
    "BlogPosting",
    "ReportageNewsArticle",
    "AnalysisNewsArticle",
];

/// JSON-LD article extractor
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonLdExtractor;

impl ContentExtractor for JsonLdExtractor {
    fn name(&self) -> &'static str {
        "json-ld"
    }

    fn extract(&self, document: &Html, page_url: &Url) -> Result<ExtractedArticle, ExtractionError> {
        let scripts = selector(r#"script[type="application/ld+json"]"#)?;

        for script in document.select(&scripts) {
            let raw = script.text().collect::<String>();
            let value: Value = match serde_json::from_str(raw.trim()) {
                Ok(value) => value,
                Err(e) => {
                    tracing::debug!(url = %page_url, error = %e, "Skipping malformed JSON-LD block");
                    continue;
                }
            };

            if let Some(article) = find_article(&value) {
                return Ok(read_article(article));
            }
        }

        Ok(ExtractedArticle::default())
    }
}

/// Finds the first article-typed object, descending into arrays and `@graph`
fn find_article(value: &Value) -> Option<&Value> {
    match value {
        Value::Array(items) => items.iter().find_map(find_article),
        Value::Object(map) => {
            if is_article(value) {
                return Some(value);
            }
            map.get("@graph").and_then(find_article)
        }
        _ => None,
    }
}

fn is_article(value: &Value) -> bool {
    match value.get("@type") {
        Some(Value::String(t)) => ARTICLE_TYPES.contains(&t.as_str()),
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(Value::as_str)
            .any(|t| ARTICLE_TYPES.contains(&t)),
        _ => false,
    }
}

fn read_article(article: &Value) -> ExtractedArticle {
    let title = string_field(article, "headline").or_else(|| string_field(article, "name"));
    let text = string_field(article, "articleBody").map(|body| collapse_whitespace(&body));
    let published_at = string_field(article, "datePublished").and_then(|d| parse_timestamp(&d));

    ExtractedArticle {
        title,
        author: article.get("author").and_then(author_name),
        language: string_field(article, "inLanguage"),
        text,
        published_at,
        tags: article.get("keywords").map(keywords).unwrap_or_default(),
        canonical_url: None,
    }
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// `author` may be a string, a Person/Organization object, or a list of either
fn author_name(value: &Value) -> Option<String> {
    match value {
        Value::String(name) => Some(name.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Object(_) => string_field(value, "name"),
        Value::Array(items) => {
            let names: Vec<String> = items.iter().filter_map(author_name).collect();
            if names.is_empty() {
                None
            } else {
                Some(names.join(", "))
            }
        }
        _ => None,
    }
}

fn keywords(value: &Value) -> Vec<String> {
    match value {
        Value::String(raw) => split_keywords(raw),
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .take(MAX_TAGS)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}
