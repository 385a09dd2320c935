//! Outbound link extraction and classification (§4.5). Walks every
//! `<a href>` and the page's canonical link, resolves each against the
//! page URL, and derives a short snippet of surrounding text for context.

use crate::models::{Link, LinkType};
use chrono::Utc;
use scraper::{ElementRef, Html, Selector};
use url::Url;
use uuid::Uuid;

const CONTEXT_CHARS: usize = 100;

pub struct LinkExtractor {
    anchor_selector: Selector,
    canonical_selector: Selector,
}

impl Default for LinkExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkExtractor {
    pub fn new() -> Self {
        Self {
            anchor_selector: Selector::parse("a[href]").expect("static selector"),
            canonical_selector: Selector::parse("link[rel='canonical']").expect("static selector"),
        }
    }

    pub fn extract_links(&self, document: &Html, base_url: &str) -> Vec<Link> {
        let Ok(base) = Url::parse(base_url) else {
            return Vec::new();
        };

        let mut links: Vec<Link> = document
            .select(&self.anchor_selector)
            .filter_map(|el| self.link_from_anchor(el, &base, base_url))
            .collect();

        if let Some(canonical) = document.select(&self.canonical_selector).next() {
            if let Some(href) = canonical.value().attr("href") {
                if let Some(target_url) = resolve_url(&base, href) {
                    links.push(Link {
                        id: Uuid::new_v4(),
                        source_url: base_url.to_string(),
                        target_url,
                        anchor_text: "canonical".to_string(),
                        rel_attributes: vec!["canonical".to_string()],
                        link_type: LinkType::Canonical,
                        context_text: String::new(),
                        http_status: None,
                        discovered_at: Utc::now(),
                    });
                }
            }
        }

        links
    }

    fn link_from_anchor(&self, el: ElementRef, base: &Url, source_url: &str) -> Option<Link> {
        let href = el.value().attr("href")?;
        let target_url = resolve_url(base, href)?;

        let rel_attributes: Vec<String> = el
            .value()
            .attr("rel")
            .map(|rel| rel.split_whitespace().map(|s| s.to_lowercase()).collect())
            .unwrap_or_default();

        Some(Link {
            id: Uuid::new_v4(),
            source_url: source_url.to_string(),
            target_url,
            anchor_text: el.text().collect::<String>().trim().to_string(),
            link_type: LinkType::from_rel_attributes(&rel_attributes),
            rel_attributes,
            context_text: context_text(el),
            http_status: None,
            discovered_at: Utc::now(),
        })
    }
}

/// Resolves `href` against `base`, rejecting anything that doesn't end up
/// as http(s): `mailto:`, `javascript:`, bare fragments, and malformed URLs
/// all drop out here rather than being treated as crawl targets.
fn resolve_url(base: &Url, href: &str) -> Option<String> {
    let resolved = base.join(href).ok()?;
    if resolved.scheme() == "http" || resolved.scheme() == "https" {
        Some(resolved.to_string())
    } else {
        None
    }
}

/// The up-to-100 characters of text immediately surrounding the anchor,
/// taken from its previous and next siblings. A sibling may be a bare text
/// node or an element (e.g. a `<span>` wrapping the surrounding prose); the
/// latter contributes its own collected text.
fn context_text(el: ElementRef) -> String {
    let sibling_text = |sibling: Option<_>| -> Option<String> {
        let sibling = sibling?;
        let text = if let Some(text) = sibling.value().as_text() {
            text.trim().to_string()
        } else {
            ElementRef::wrap(sibling)?.text().collect::<String>().trim().to_string()
        };
        (!text.is_empty()).then_some(text)
    };

    let parts: Vec<String> = [sibling_text(el.prev_sibling()), sibling_text(el.next_sibling())]
        .into_iter()
        .flatten()
        .collect();
    parts.join(" ").chars().take(CONTEXT_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_and_resolves_relative_links() {
        let html = r#"<html><body>before <a href="/about">About</a> after</body></html>"#;
        let document = Html::parse_document(html);
        let extractor = LinkExtractor::new();
        let links = extractor.extract_links(&document, "https://example.com/page");
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].target_url, "https://example.com/about");
        assert_eq!(links[0].anchor_text, "About");
        assert_eq!(links[0].link_type, LinkType::Follow);
        assert_eq!(links[0].context_text, "before after");
    }

    #[test]
    fn rejects_non_http_schemes() {
        let html = r#"<a href="mailto:someone@example.com">Mail</a>"#;
        let document = Html::parse_document(html);
        let extractor = LinkExtractor::new();
        let links = extractor.extract_links(&document, "https://example.com/");
        assert!(links.is_empty());
    }

    #[test]
    fn classifies_sponsored_rel_attribute() {
        let html = r#"<a href="https://ads.example.com" rel="sponsored nofollow">Ad</a>"#;
        let document = Html::parse_document(html);
        let extractor = LinkExtractor::new();
        let links = extractor.extract_links(&document, "https://example.com/");
        assert_eq!(links[0].link_type, LinkType::Sponsored);
    }

    #[test]
    fn context_text_recurses_into_tag_siblings() {
        let html = r#"<html><body><span>before</span><a href="/x">link</a><em>after</em></body></html>"#;
        let document = Html::parse_document(html);
        let extractor = LinkExtractor::new();
        let links = extractor.extract_links(&document, "https://example.com/page");
        assert_eq!(links[0].context_text, "before after");
    }

    #[test]
    fn picks_up_canonical_link_tag() {
        let html = r#"<html><head><link rel="canonical" href="https://example.com/canonical"></head></html>"#;
        let document = Html::parse_document(html);
        let extractor = LinkExtractor::new();
        let links = extractor.extract_links(&document, "https://example.com/page?x=1");
        assert!(links
            .iter()
            .any(|l| l.link_type == LinkType::Canonical && l.target_url == "https://example.com/canonical"));
    }
}
