//! Link extractor (spec §4.5): HTML -> raw outbound URL strings. No
//! resolution or normalization here, that is `normalize::normalize`'s job.

use std::collections::HashMap;

use scraper::{Html, Selector};

/// Which tags/attributes to scan, and whether to additionally scan hidden
/// form inputs whose `name` looks like a redirect target.
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    pub tags: Vec<String>,
    pub attrs: Vec<String>,
    /// CSS selectors; when non-empty, only elements matching at least one
    /// of these are scanned.
    pub restrict_css: Vec<String>,
    pub extract_from_inputs: bool,
    /// Skip elements carrying a `rel="nofollow"` token (spec §6
    /// `respectNoFollow`). Synced from `CrawlerConfig::respect_nofollow` by
    /// `EngineBuilder::build`.
    pub respect_nofollow: bool,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            tags: vec![
                "a".into(),
                "area".into(),
                "form".into(),
                "frame".into(),
                "iframe".into(),
                "link".into(),
            ],
            attrs: vec!["href".into(), "action".into(), "src".into()],
            restrict_css: Vec::new(),
            extract_from_inputs: false,
            respect_nofollow: true,
        }
    }
}

fn has_nofollow_token(rel: &str) -> bool {
    rel.split_ascii_whitespace().any(|tok| tok.eq_ignore_ascii_case("nofollow"))
}

/// Extraction output: raw link strings plus a per-tag occurrence count.
#[derive(Debug, Clone, Default)]
pub struct ExtractionResult {
    pub links: Vec<String>,
    pub tag_counts: HashMap<String, usize>,
}

/// Extract raw outbound URL strings from an HTML document.
pub fn extract_links(html: &str, config: &ExtractorConfig) -> ExtractionResult {
    let document = Html::parse_document(html);
    let mut result = ExtractionResult::default();

    for tag in &config.tags {
        // When restrictCss is set, only elements nested under a matching
        // ancestor are scanned: build the descendant-combinator selector
        // directly rather than comparing node identities after the fact.
        let selector_strings: Vec<String> = if config.restrict_css.is_empty() {
            vec![tag.clone()]
        } else {
            config
                .restrict_css
                .iter()
                .map(|css| format!("{css} {tag}"))
                .collect()
        };

        for selector_str in &selector_strings {
            let Ok(selector) = Selector::parse(selector_str) else {
                continue;
            };
            for element in document.select(&selector) {
                if config.respect_nofollow
                    && element
                        .value()
                        .attr("rel")
                        .map(has_nofollow_token)
                        .unwrap_or(false)
                {
                    continue;
                }
                for attr in &config.attrs {
                    if let Some(value) = element.value().attr(attr) {
                        let trimmed = value.trim();
                        if !trimmed.is_empty() {
                            result.links.push(trimmed.to_string());
                            *result.tag_counts.entry(tag.clone()).or_insert(0) += 1;
                        }
                    }
                }
            }
        }
    }

    if config.extract_from_inputs {
        if let Ok(input_selector) = Selector::parse("input[type=hidden]") {
            let name_re = ["url", "redirect", "next"];
            for element in document.select(&input_selector) {
                let value = element.value();
                if let Some(name) = value.attr("name") {
                    if name_re.iter().any(|candidate| name.eq_ignore_ascii_case(candidate)) {
                        if let Some(v) = value.attr("value") {
                            let trimmed = v.trim();
                            if !trimmed.is_empty() {
                                result.links.push(trimmed.to_string());
                                *result.tag_counts.entry("input".to_string()).or_insert(0) += 1;
                            }
                        }
                    }
                }
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_anchor_hrefs() {
        let html = r#"<html><body><a href="/a">a</a><a href="  ">blank</a></body></html>"#;
        let result = extract_links(html, &ExtractorConfig::default());
        assert_eq!(result.links, vec!["/a".to_string()]);
        assert_eq!(result.tag_counts.get("a"), Some(&1));
    }

    #[test]
    fn extracts_from_multiple_tags_and_attrs() {
        let html = r#"<html><body>
            <a href="/a">a</a>
            <form action="/submit"></form>
            <iframe src="/frame"></iframe>
        </body></html>"#;
        let result = extract_links(html, &ExtractorConfig::default());
        assert!(result.links.contains(&"/a".to_string()));
        assert!(result.links.contains(&"/submit".to_string()));
        assert!(result.links.contains(&"/frame".to_string()));
    }

    #[test]
    fn restrict_css_limits_scanned_elements() {
        let html = r#"<html><body>
            <div class="content"><a href="/in">in</a></div>
            <div class="sidebar"><a href="/out">out</a></div>
        </body></html>"#;
        let config = ExtractorConfig {
            restrict_css: vec![".content".to_string()],
            ..ExtractorConfig::default()
        };
        let result = extract_links(html, &config);
        assert_eq!(result.links, vec!["/in".to_string()]);
    }

    #[test]
    fn nofollow_links_are_skipped_when_respected() {
        let html = r#"<html><body>
            <a href="/keep">keep</a>
            <a href="/skip" rel="nofollow">skip</a>
        </body></html>"#;
        let result = extract_links(html, &ExtractorConfig::default());
        assert_eq!(result.links, vec!["/keep".to_string()]);
    }

    #[test]
    fn nofollow_links_are_kept_when_not_respected() {
        let html = r#"<html><body><a href="/skip" rel="nofollow">skip</a></body></html>"#;
        let config = ExtractorConfig {
            respect_nofollow: false,
            ..ExtractorConfig::default()
        };
        let result = extract_links(html, &config);
        assert_eq!(result.links, vec!["/skip".to_string()]);
    }

    #[test]
    fn extract_from_inputs_picks_up_redirect_fields() {
        let html = r#"<html><body>
            <input type="hidden" name="redirect" value="/go-here" />
            <input type="hidden" name="csrf_token" value="abc123" />
        </body></html>"#;
        let config = ExtractorConfig {
            extract_from_inputs: true,
            ..ExtractorConfig::default()
        };
        let result = extract_links(html, &config);
        assert_eq!(result.links, vec!["/go-here".to_string()]);
    }
}
