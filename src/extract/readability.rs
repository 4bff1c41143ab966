//! Readability-style fallback extractor
//!
//! Scores the parents of paragraph elements by the amount and density of
//! text they hold, and takes the best-scoring block as the article body.

use super::{collapse_whitespace, html_lang, selector, ContentExtractor, ExtractedArticle, ExtractionError};
use scraper::{ElementRef, Html};
use std::collections::HashMap;
use url::Url;

/// Paragraphs shorter than this do not contribute to scoring
const MIN_PARAGRAPH_CHARS: usize = 25;

/// Bylines longer than this are probably not bylines
const MAX_BYLINE_CHARS: usize = 100;

const TITLE_SEPARATORS: &[&str] = &[" | ", " - ", " – ", " — ", " :: ", " » "];

const SKIPPED_TEXT_PARENTS: &[&str] = &["script", "style", "noscript", "template"];

/// Heuristic body/title/byline extractor
#[derive(Debug, Default, Clone, Copy)]
pub struct ReadabilityExtractor;

impl ContentExtractor for ReadabilityExtractor {
    fn name(&self) -> &'static str {
        "readability"
    }

    fn extract(&self, document: &Html, _page_url: &Url) -> Result<ExtractedArticle, ExtractionError> {
        Ok(ExtractedArticle {
            title: title(document)?,
            author: byline(document)?,
            language: html_lang(document)?,
            text: body_text(document)?,
            ..Default::default()
        })
    }
}

/// Document title with a trailing site name removed when what is left still
/// looks like a headline
fn title(document: &Html) -> Result<Option<String>, ExtractionError> {
    let title_sel = selector("head title, title")?;
    let raw = match document.select(&title_sel).next() {
        Some(element) => collapse_whitespace(&element.text().collect::<String>()),
        None => return Ok(None),
    };
    if raw.is_empty() {
        return Ok(None);
    }

    for separator in TITLE_SEPARATORS {
        if let Some(idx) = raw.rfind(separator) {
            let head = raw[..idx].trim();
            if head.split_whitespace().count() >= 3 {
                return Ok(Some(head.to_string()));
            }
        }
    }

    Ok(Some(raw))
}

fn byline(document: &Html) -> Result<Option<String>, ExtractionError> {
    let byline_sel = selector(r#"[rel="author"], [itemprop="author"], .byline, .author"#)?;

    Ok(document
        .select(&byline_sel)
        .map(|element| collapse_whitespace(&visible_text(element)))
        .find(|text| !text.is_empty() && text.chars().count() <= MAX_BYLINE_CHARS)
        .map(|text| text.strip_prefix("By ").unwrap_or(&text).to_string()))
}

/// Picks the highest-scoring paragraph container, or the whole body when no
/// paragraph is long enough to score
fn body_text(document: &Html) -> Result<Option<String>, ExtractionError> {
    let paragraph_sel = selector("p, pre")?;

    let mut scores = HashMap::new();
    for paragraph in document.select(&paragraph_sel) {
        let text = collapse_whitespace(&visible_text(paragraph));
        let len = text.chars().count();
        if len < MIN_PARAGRAPH_CHARS {
            continue;
        }

        let score = 1.0 + text.matches(',').count() as f64 + (len / 100).min(3) as f64;

        let parent = paragraph.parent().and_then(ElementRef::wrap);
        if let Some(parent) = parent {
            scores.entry(parent.id()).or_insert((parent, 0.0)).1 += score;

            if let Some(grandparent) = parent.parent().and_then(ElementRef::wrap) {
                scores
                    .entry(grandparent.id())
                    .or_insert((grandparent, 0.0))
                    .1 += score / 2.0;
            }
        }
    }

    let best = scores
        .into_values()
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(element, _)| element);

    let text = match best {
        Some(element) => collapse_whitespace(&visible_text(element)),
        None => {
            let body_sel = selector("body")?;
            document
                .select(&body_sel)
                .next()
                .map(|body| collapse_whitespace(&visible_text(body)))
                .unwrap_or_default()
        }
    };

    Ok(Some(text).filter(|t| !t.is_empty()))
}

/// Concatenates descendant text, skipping script-like elements
fn visible_text(element: ElementRef<'_>) -> String {
    let mut out = String::new();
    for node in element.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|e| SKIPPED_TEXT_PARENTS.contains(&e.name()))
        });
        if !hidden {
            out.push_str(text);
            out.push(' ');
        }
    }
    out
}
