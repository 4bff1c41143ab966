//! Meta-tag pass
//!
//! Last stage of the chain and the only source of the canonical URL.

use super::{
    html_lang, parse_timestamp, selector, split_keywords, ContentExtractor, ExtractedArticle,
    ExtractionError,
};
use scraper::Html;
use url::Url;

const AUTHOR_META: &[&str] = &["author", "article:author", "dc.creator"];
const TITLE_META: &[&str] = &["og:title", "twitter:title"];
const KEYWORD_META: &[&str] = &["keywords", "news_keywords"];
const LANGUAGE_META: &[&str] = &["og:locale", "content-language"];
const PUBLISHED_META: &[&str] = &[
    "article:published_time",
    "og:published_time",
    "pubdate",
    "publishdate",
    "timestamp",
    "date",
    "dc.date",
    "dc.date.issued",
];

/// Extracts fields from `<meta>`, `<html lang>` and `<link rel="canonical">`
#[derive(Debug, Default, Clone, Copy)]
pub struct MetaTagExtractor;

impl ContentExtractor for MetaTagExtractor {
    fn name(&self) -> &'static str {
        "meta"
    }

    fn extract(&self, document: &Html, page_url: &Url) -> Result<ExtractedArticle, ExtractionError> {
        let language = match html_lang(document)? {
            Some(lang) => Some(lang),
            None => pick_meta(document, LANGUAGE_META)?,
        };

        let published_at = pick_meta(document, PUBLISHED_META)?.and_then(|raw| {
            let parsed = parse_timestamp(&raw);
            if parsed.is_none() {
                tracing::debug!(url = %page_url, value = %raw, "Unparseable publish date");
            }
            parsed
        });

        Ok(ExtractedArticle {
            title: pick_meta(document, TITLE_META)?,
            author: pick_meta(document, AUTHOR_META)?,
            language,
            text: None,
            published_at,
            tags: pick_meta(document, KEYWORD_META)?
                .map(|raw| split_keywords(&raw))
                .unwrap_or_default(),
            canonical_url: canonical(document, page_url)?,
        })
    }
}

/// First non-empty `content` among `names`, checking `property=` before `name=`
fn pick_meta(document: &Html, names: &[&str]) -> Result<Option<String>, ExtractionError> {
    for name in names {
        for attr in ["property", "name"] {
            let meta_sel = selector(&format!(r#"meta[{}="{}"]"#, attr, name))?;
            let content = document
                .select(&meta_sel)
                .next()
                .and_then(|element| element.value().attr("content"))
                .map(str::trim)
                .filter(|content| !content.is_empty());
            if let Some(content) = content {
                return Ok(Some(content.to_string()));
            }
        }
    }
    Ok(None)
}

/// `<link rel="canonical">` resolved against the page URL
fn canonical(document: &Html, page_url: &Url) -> Result<Option<String>, ExtractionError> {
    let link_sel = selector(r#"link[rel="canonical"][href]"#)?;
    let href = document
        .select(&link_sel)
        .next()
        .and_then(|element| element.value().attr("href"))
        .map(str::trim)
        .filter(|href| !href.is_empty());

    Ok(href.and_then(|href| match page_url.join(href) {
        Ok(resolved) => Some(resolved.to_string()),
        Err(e) => {
            tracing::debug!(url = %page_url, href, error = %e, "Unresolvable canonical link");
            None
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn extract(html: &str) -> ExtractedArticle {
        let document = Html::parse_document(html);
        let url = Url::parse("https://example.com/news/item?id=4").unwrap();
        MetaTagExtractor.extract(&document, &url).unwrap()
    }

    #[test]
    fn test_meta_fields() {
        let html = r#"<html><head>
            <meta property="og:title" content=" Open Graph title ">
            <meta name="twitter:title" content="Twitter title">
            <meta name="dc.creator" content="Archivist">
            <meta property="og:locale" content="de_DE">
            <meta name="news_keywords" content="one,two">
            <meta name="dc.date.issued" content="2023-11-30">
            <link rel="canonical" href="https://example.com/news/item">
            </head></html>"#;

        let article = extract(html);
        assert_eq!(article.title.as_deref(), Some("Open Graph title"));
        assert_eq!(article.author.as_deref(), Some("Archivist"));
        assert_eq!(article.language.as_deref(), Some("de_DE"));
        assert_eq!(article.tags, vec!["one", "two"]);
        assert_eq!(
            article.published_at,
            Some(Utc.with_ymd_and_hms(2023, 11, 30, 0, 0, 0).unwrap())
        );
        assert_eq!(article.canonical_url.as_deref(), Some("https://example.com/news/item"));
        assert_eq!(article.text, None);
    }

    #[test]
    fn test_html_lang_wins_over_meta_locale() {
        let html = r#"<html lang="es"><head><meta property="og:locale" content="en_US"></head></html>"#;
        assert_eq!(extract(html).language.as_deref(), Some("es"));
    }

    #[test]
    fn test_empty_content_skipped() {
        let html = r#"<head><meta name="author" content="  "><meta name="article:author" content="Second"></head>"#;
        assert_eq!(extract(html).author.as_deref(), Some("Second"));
    }

    #[test]
    fn test_relative_canonical_resolved() {
        let html = r#"<head><link rel="canonical" href="/news/item"></head>"#;
        assert_eq!(
            extract(html).canonical_url.as_deref(),
            Some("https://example.com/news/item")
        );
    }

    #[test]
    fn test_unparseable_date_dropped() {
        let html = r#"<head><meta name="date" content="yesterday"></head>"#;
        assert_eq!(extract(html).published_at, None);
    }

    #[test]
    fn test_no_meta() {
        let article = extract("<html><body><p>text</p></body></html>");
        assert_eq!(article, ExtractedArticle::default());
    }
}
