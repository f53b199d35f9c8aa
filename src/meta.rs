//! Title/meta-tag scraping collaborator (spec §1: "title/metadata
//! extraction" is an external collaborator of the core, only specified here
//! as a thin seam, not a full data-extraction DSL). A default
//! `scraper`-backed implementation is provided since `PageData` needs
//! *some* title/metadata to populate, but callers may substitute their own.

use indexmap::IndexMap;
use scraper::{Html, Selector};

/// Scraped page-level metadata: a title plus whatever `<meta name=...
/// content=...>` tags were present.
pub trait PageMetadataExtractor: Send + Sync {
    fn extract(&self, html: &str) -> (Option<String>, IndexMap<String, String>);
}

/// Default implementation: first `<title>` text, and every `<meta
/// name="..." content="...">` tag keyed by its `name`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScraperMetadataExtractor;

impl PageMetadataExtractor for ScraperMetadataExtractor {
    fn extract(&self, html: &str) -> (Option<String>, IndexMap<String, String>) {
        let document = Html::parse_document(html);

        let title = Selector::parse("title").ok().and_then(|selector| {
            document
                .select(&selector)
                .next()
                .map(|el| el.text().collect::<String>().trim().to_string())
                .filter(|s| !s.is_empty())
        });

        let mut metadata = IndexMap::new();
        if let Ok(selector) = Selector::parse("meta[name]") {
            for element in document.select(&selector) {
                let value = element.value();
                if let (Some(name), Some(content)) = (value.attr("name"), value.attr("content")) {
                    metadata.insert(name.to_string(), content.to_string());
                }
            }
        }

        (title, metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_title_and_meta_tags() {
        let html = r#"<html><head>
            <title>  Hello World  </title>
            <meta name="description" content="a page about things">
            <meta name="keywords" content="a, b, c">
        </head><body></body></html>"#;
        let (title, metadata) = ScraperMetadataExtractor.extract(html);
        assert_eq!(title.as_deref(), Some("Hello World"));
        assert_eq!(
            metadata.get("description").map(String::as_str),
            Some("a page about things")
        );
        assert_eq!(metadata.get("keywords").map(String::as_str), Some("a, b, c"));
    }

    #[test]
    fn missing_title_yields_none() {
        let html = "<html><body>no title here</body></html>";
        let (title, _) = ScraperMetadataExtractor.extract(html);
        assert_eq!(title, None);
    }
}
