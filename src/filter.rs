//! URL filter: the ordered, first-reject-wins rule chain of spec §4.2.

use url::Url;

use crate::config::{CrawlerConfig, FileExtensionFilters};

/// Outcome of running a canonical URL through the filter chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterVerdict {
    pub follow: bool,
    pub reason: Option<String>,
}

impl FilterVerdict {
    fn follow() -> Self {
        Self {
            follow: true,
            reason: None,
        }
    }

    fn reject(reason: &str) -> Self {
        Self {
            follow: false,
            reason: Some(reason.to_string()),
        }
    }
}

const ARCHIVE_EXTS: &[&str] = &["zip", "tar", "gz", "bz2", "7z", "rar", "xz"];
const IMAGE_EXTS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "svg", "webp", "ico", "tiff",
];
const AUDIO_EXTS: &[&str] = &["mp3", "wav", "ogg", "flac", "aac", "m4a"];
const VIDEO_EXTS: &[&str] = &["mp4", "avi", "mov", "mkv", "webm", "flv", "wmv"];
const OFFICE_EXTS: &[&str] = &[
    "doc", "docx", "xls", "xlsx", "ppt", "pptx", "pdf", "odt", "ods", "odp",
];
const OTHER_EXTS: &[&str] = &["css", "js"];

/// Pure, deterministic URL filter built from a [`CrawlerConfig`].
pub struct UrlFilter<'a> {
    config: &'a CrawlerConfig,
}

impl<'a> UrlFilter<'a> {
    pub fn new(config: &'a CrawlerConfig) -> Self {
        Self { config }
    }

    /// Apply the rule chain to a canonical URL. Rule order matches spec
    /// §4.2 exactly; the first matching rejection wins.
    pub fn check(&self, canonical: &str) -> FilterVerdict {
        let parsed = match Url::parse(canonical) {
            Ok(u) => u,
            Err(_) => return FilterVerdict::reject("Malformed"),
        };

        // Rule 1: scheme.
        if self.config.technical_filters.unsupported_schemes
            && !matches!(parsed.scheme(), "http" | "https")
        {
            return FilterVerdict::reject("Scheme");
        }

        // Rule 2: length.
        if self.config.technical_filters.long_urls && canonical.len() > self.config.max_url_length
        {
            return FilterVerdict::reject("URL length");
        }

        // Rule 3: malformed (empty host).
        let host = match parsed.host_str() {
            Some(h) if !h.is_empty() => h,
            _ => {
                if self.config.technical_filters.malformed {
                    return FilterVerdict::reject("Malformed");
                }
                ""
            }
        };

        // Rule 4: blocked domains (suffix match).
        if self
            .config
            .blocked_domains
            .iter()
            .any(|d| host_matches_suffix(host, d))
        {
            return FilterVerdict::reject("blocked");
        }

        // Rule 5: allowlist (suffix match).
        if !self.config.allowed_domains.is_empty()
            && !self
                .config
                .allowed_domains
                .iter()
                .any(|d| host_matches_suffix(host, d))
        {
            return FilterVerdict::reject("allowlist");
        }

        // Rule 6: file extension families.
        if let Some(category) =
            extension_category(parsed.path(), &self.config.file_extension_filters)
        {
            return FilterVerdict::reject(category);
        }

        // Rule 7: custom regex filters, matched against the full URL.
        if self
            .config
            .custom_url_filters
            .iter()
            .any(|re| re.is_match(canonical))
        {
            return FilterVerdict::reject("custom");
        }

        FilterVerdict::follow()
    }
}

fn host_matches_suffix(host: &str, suffix: &str) -> bool {
    let suffix = suffix.trim_start_matches('.');
    host == suffix || host.ends_with(&format!(".{suffix}"))
}

fn extension_category(path: &str, filters: &FileExtensionFilters) -> Option<&'static str> {
    if !path.contains('.') {
        return None;
    }
    let ext = path.rsplit('.').next()?.to_ascii_lowercase();
    if filters.archives && ARCHIVE_EXTS.contains(&ext.as_str()) {
        return Some("archives");
    }
    if filters.images && IMAGE_EXTS.contains(&ext.as_str()) {
        return Some("images");
    }
    if filters.audio && AUDIO_EXTS.contains(&ext.as_str()) {
        return Some("audio");
    }
    if filters.video && VIDEO_EXTS.contains(&ext.as_str()) {
        return Some("video");
    }
    if filters.office_docs && OFFICE_EXTS.contains(&ext.as_str()) {
        return Some("office");
    }
    if filters.other && OTHER_EXTS.contains(&ext.as_str()) {
        return Some("other");
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    #[test]
    fn rejects_non_http_scheme() {
        let config = CrawlerConfig::default();
        let filter = UrlFilter::new(&config);
        let verdict = filter.check("ftp://example.com/file");
        assert!(!verdict.follow);
        assert_eq!(verdict.reason.as_deref(), Some("Scheme"));
    }

    #[test]
    fn allowlist_scenario_from_spec_section_8_4() {
        let mut config = CrawlerConfig::default();
        config.allowed_domains = vec!["example.com".to_string()];
        let filter = UrlFilter::new(&config);
        assert!(filter.check("https://example.com/page").follow);
        let verdict = filter.check("https://other.com/page");
        assert!(!verdict.follow);
        assert_eq!(verdict.reason.as_deref(), Some("allowlist"));
    }

    #[test]
    fn blocklist_suffix_match() {
        let mut config = CrawlerConfig::default();
        config.blocked_domains = vec!["ads.example.com".to_string()];
        let filter = UrlFilter::new(&config);
        assert!(!filter.check("https://tracker.ads.example.com/x").follow);
        assert!(filter.check("https://example.com/x").follow);
    }

    #[test]
    fn rejects_image_extension() {
        let config = CrawlerConfig::default();
        let filter = UrlFilter::new(&config);
        let verdict = filter.check("https://example.com/a/b/photo.JPG");
        assert!(!verdict.follow);
        assert_eq!(verdict.reason.as_deref(), Some("images"));
    }

    #[test]
    fn custom_regex_filter() {
        let mut config = CrawlerConfig::default();
        config.custom_url_filters = vec![Regex::new(r"/private/").unwrap()];
        let filter = UrlFilter::new(&config);
        assert!(!filter.check("https://example.com/private/x").follow);
    }

    #[test]
    fn rejects_too_long_url() {
        let mut config = CrawlerConfig::default();
        config.max_url_length = 20;
        let filter = UrlFilter::new(&config);
        let verdict = filter.check("https://example.com/a-very-long-path-here");
        assert_eq!(verdict.reason.as_deref(), Some("URL length"));
    }

    #[test]
    fn is_deterministic_and_idempotent() {
        let config = CrawlerConfig::default();
        let filter = UrlFilter::new(&config);
        let first = filter.check("https://example.com/file.pdf");
        let second = filter.check("https://example.com/file.pdf");
        assert_eq!(first, second);
    }
}
