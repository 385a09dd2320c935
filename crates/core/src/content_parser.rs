//! SEO metric extraction over a parsed page (§4.6). Pure function of the
//! document and its URL; any failure to locate or parse a piece of markup
//! is recorded as an issue string rather than propagated, so a single
//! malformed block never aborts metric collection for the rest of the page.

use crate::models::SeoMetrics;
use scraper::{Html, Selector};
use serde_json::Value;
use std::collections::HashSet;
use url::Url;

/// Below this many non-whitespace characters a page's body is considered
/// too thin to be meaningful content, per the original's
/// `min_meaningful_content_length`.
const MIN_MEANINGFUL_CONTENT_LENGTH: usize = 500;

/// Phrases that show up on bot-block / interstitial pages rather than
/// real content, carried over from the original's `bot_detection_phrases`.
const BOT_DETECTION_PHRASES: &[&str] = &[
    "access denied",
    "you have been blocked",
    "captcha",
    "robot check",
    "rate limit exceeded",
    "please verify you are human",
    "403 forbidden",
    "too many requests",
    "cloudflare",
];

pub struct ContentParser {
    title: Selector,
    meta_description: Selector,
    h1: Selector,
    h2: Selector,
    anchors: Selector,
    images: Selector,
    canonical: Selector,
    robots_meta: Selector,
    ld_json: Selector,
    og_title: Selector,
    og_description: Selector,
    twitter_title: Selector,
    twitter_description: Selector,
    viewport: Selector,
}

impl Default for ContentParser {
    fn default() -> Self {
        Self::new()
    }
}

fn select(css: &str) -> Selector {
    Selector::parse(css).expect("static selector")
}

impl ContentParser {
    pub fn new() -> Self {
        Self {
            title: select("title"),
            meta_description: select("meta[name='description']"),
            h1: select("h1"),
            h2: select("h2"),
            anchors: select("a[href]"),
            images: select("img"),
            canonical: select("link[rel='canonical']"),
            robots_meta: select("meta[name='robots']"),
            ld_json: select("script[type='application/ld+json']"),
            og_title: select("meta[property='og:title']"),
            og_description: select("meta[property='og:description']"),
            twitter_title: select("meta[name='twitter:title']"),
            twitter_description: select("meta[name='twitter:description']"),
            viewport: select("meta[name='viewport']"),
        }
    }

    /// Computes metrics for `page_url`'s already-parsed `document`. Never
    /// panics; malformed structured-data or missing markup is recorded in
    /// `issues` instead.
    pub fn parse(&self, document: &Html, page_url: &str) -> SeoMetrics {
        let mut metrics = SeoMetrics::new(page_url.to_string());
        let page_host = Url::parse(page_url).ok().and_then(|u| u.host_str().map(str::to_string));

        metrics.title_length = document
            .select(&self.title)
            .next()
            .map(|el| el.text().collect::<String>().trim().len());

        metrics.meta_description_length = self
            .meta_content(document, &self.meta_description)
            .map(|content| content.len());

        metrics.h1_count = document.select(&self.h1).count() as u32;
        metrics.h2_count = document.select(&self.h2).count() as u32;

        self.count_links(document, page_host.as_deref(), &mut metrics);
        self.count_images(document, &mut metrics);

        metrics.has_canonical = document.select(&self.canonical).next().is_some();
        metrics.has_robots_meta = document.select(&self.robots_meta).next().is_some();

        self.extract_structured_data(document, &mut metrics);

        metrics.og_title = self.meta_property_content(document, &self.og_title);
        metrics.og_description = self.meta_property_content(document, &self.og_description);
        metrics.twitter_title = self.meta_content(document, &self.twitter_title);
        metrics.twitter_description = self.meta_content(document, &self.twitter_description);

        metrics.mobile_friendly = document
            .select(&self.viewport)
            .next()
            .and_then(|el| el.value().attr("content"))
            .map(|content| content.replace(' ', "").contains("width=device-width"))
            .unwrap_or(false);

        metrics
    }

    /// Flags raised against a fetched page's raw body: `thin_content` when
    /// it falls under the meaningful-content floor, and
    /// `bot_detection_suspected` when it matches a known bot-block phrase.
    /// A minimal port of the original's `ContentValidator` checks; spam
    /// scoring and readability are not reproduced here.
    pub fn detect_anomalies(&self, body: &str) -> HashSet<String> {
        let mut flags = HashSet::new();
        if body.trim().len() < MIN_MEANINGFUL_CONTENT_LENGTH {
            flags.insert("thin_content".to_string());
        }
        let lower = body.to_lowercase();
        if BOT_DETECTION_PHRASES.iter().any(|phrase| lower.contains(phrase)) {
            flags.insert("bot_detection_suspected".to_string());
        }
        flags
    }

    fn meta_content(&self, document: &Html, selector: &Selector) -> Option<String> {
        document
            .select(selector)
            .next()
            .and_then(|el| el.value().attr("content"))
            .map(str::to_string)
    }

    fn meta_property_content(&self, document: &Html, selector: &Selector) -> Option<String> {
        self.meta_content(document, selector)
    }

    fn count_links(&self, document: &Html, page_host: Option<&str>, metrics: &mut SeoMetrics) {
        for el in document.select(&self.anchors) {
            let Some(href) = el.value().attr("href") else { continue };
            let link_host = Url::parse(href)
                .ok()
                .and_then(|u| u.host_str().map(str::to_string));
            match (page_host, link_host) {
                (Some(page), Some(link)) if page.eq_ignore_ascii_case(&link) => {
                    metrics.internal_links += 1;
                }
                (_, Some(_)) => metrics.external_links += 1,
                // Relative hrefs have no host of their own: internal.
                (_, None) => metrics.internal_links += 1,
            }
        }
    }

    fn count_images(&self, document: &Html, metrics: &mut SeoMetrics) {
        for el in document.select(&self.images) {
            metrics.images_count += 1;
            let has_alt = el
                .value()
                .attr("alt")
                .map(|alt| !alt.trim().is_empty())
                .unwrap_or(false);
            if !has_alt {
                metrics.images_without_alt += 1;
            }
        }
    }

    /// Parses each `application/ld+json` block, recursing into JSON-LD
    /// `@graph` arrays to collect every `@type` seen. Unparseable blocks
    /// are recorded as issues, not fatal.
    fn extract_structured_data(&self, document: &Html, metrics: &mut SeoMetrics) {
        for el in document.select(&self.ld_json) {
            let raw = el.text().collect::<String>();
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(trimmed) {
                Ok(value) => {
                    metrics.has_schema_markup = true;
                    collect_types(&value, &mut metrics.structured_data_types);
                }
                Err(error) => {
                    metrics
                        .issues
                        .push(format!("failed to parse ld+json block: {error}"));
                }
            }
        }
        metrics.structured_data_types.sort();
    }
}

/// Recurses through a JSON-LD value, collecting every `@type` string found
/// in objects and nested arrays (e.g. `@graph`).
fn collect_types(value: &Value, types: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            if let Some(type_value) = map.get("@type") {
                match type_value {
                    Value::String(s) => push_unique(types, s.clone()),
                    Value::Array(items) => {
                        for item in items {
                            if let Some(s) = item.as_str() {
                                push_unique(types, s.to_string());
                            }
                        }
                    }
                    _ => {}
                }
            }
            for (key, nested) in map {
                if key == "@type" {
                    continue;
                }
                collect_types(nested, types);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_types(item, types);
            }
        }
        _ => {}
    }
}

fn push_unique(types: &mut Vec<String>, value: String) {
    if !types.contains(&value) {
        types.push(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults_without_panicking() {
        let document = Html::parse_document("");
        let parser = ContentParser::new();
        let metrics = parser.parse(&document, "https://example.com/");
        assert_eq!(metrics.h1_count, 0);
        assert_eq!(metrics.images_count, 0);
        assert!(!metrics.has_schema_markup);
    }

    #[test]
    fn counts_internal_and_external_links() {
        let html = r#"
            <html><body>
              <a href="/about">about</a>
              <a href="https://example.com/contact">contact</a>
              <a href="https://other.example/">external</a>
            </body></html>
        "#;
        let document = Html::parse_document(html);
        let parser = ContentParser::new();
        let metrics = parser.parse(&document, "https://example.com/page");
        assert_eq!(metrics.internal_links, 2);
        assert_eq!(metrics.external_links, 1);
    }

    #[test]
    fn flags_images_missing_alt_text() {
        let html = r#"<img src="a.png" alt="a"><img src="b.png">"#;
        let document = Html::parse_document(html);
        let parser = ContentParser::new();
        let metrics = parser.parse(&document, "https://example.com/");
        assert_eq!(metrics.images_count, 2);
        assert_eq!(metrics.images_without_alt, 1);
    }

    #[test]
    fn recurses_into_ld_json_graph_for_types() {
        let html = r#"
            <script type="application/ld+json">
            {"@graph": [{"@type": "Organization"}, {"@type": ["WebSite", "Thing"]}]}
            </script>
        "#;
        let document = Html::parse_document(html);
        let parser = ContentParser::new();
        let metrics = parser.parse(&document, "https://example.com/");
        assert!(metrics.has_schema_markup);
        assert!(metrics.structured_data_types.contains(&"Organization".to_string()));
        assert!(metrics.structured_data_types.contains(&"WebSite".to_string()));
        assert!(metrics.structured_data_types.contains(&"Thing".to_string()));
    }

    #[test]
    fn structured_data_types_are_sorted() {
        let html = r#"
            <script type="application/ld+json">
            {"@graph": [{"@type": "WebSite"}, {"@type": ["Organization", "Thing"]}]}
            </script>
        "#;
        let document = Html::parse_document(html);
        let parser = ContentParser::new();
        let metrics = parser.parse(&document, "https://example.com/");
        assert_eq!(
            metrics.structured_data_types,
            vec!["Organization".to_string(), "Thing".to_string(), "WebSite".to_string()]
        );
    }

    #[test]
    fn detect_anomalies_flags_thin_content() {
        let parser = ContentParser::new();
        let flags = parser.detect_anomalies("short page");
        assert!(flags.contains("thin_content"));
        assert!(!flags.contains("bot_detection_suspected"));
    }

    #[test]
    fn detect_anomalies_flags_bot_block_phrase() {
        let parser = ContentParser::new();
        let body = format!("{}{}", "filler ".repeat(100), "Please complete the CAPTCHA to continue");
        let flags = parser.detect_anomalies(&body);
        assert!(flags.contains("bot_detection_suspected"));
        assert!(!flags.contains("thin_content"));
    }

    #[test]
    fn detect_anomalies_empty_for_substantial_clean_content() {
        let parser = ContentParser::new();
        let body = "word ".repeat(200);
        let flags = parser.detect_anomalies(&body);
        assert!(flags.is_empty());
    }

    #[test]
    fn malformed_ld_json_is_recorded_as_issue_not_panic() {
        let html = r#"<script type="application/ld+json">{not valid json</script>"#;
        let document = Html::parse_document(html);
        let parser = ContentParser::new();
        let metrics = parser.parse(&document, "https://example.com/");
        assert!(!metrics.has_schema_markup);
        assert_eq!(metrics.issues.len(), 1);
    }

    #[test]
    fn mobile_viewport_heuristic_tolerates_spacing() {
        let html = r#"<meta name="viewport" content="width = device-width, initial-scale=1">"#;
        let document = Html::parse_document(html);
        let parser = ContentParser::new();
        let metrics = parser.parse(&document, "https://example.com/");
        assert!(metrics.mobile_friendly);
    }
}
