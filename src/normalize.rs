//! URL canonicalization (spec §4.1). Turns a possibly-relative URL string
//! into the canonical form used as the seen-set key.

use url::Url;

use crate::config::{
    FragmentHandling, NormalizationPolicy, ProtocolHandling, QueryParamHandling,
    TrailingSlashHandling, WwwHandling,
};
use crate::error::CrawlError;

/// Result of a successful normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedUrl {
    pub original: String,
    pub canonical: String,
    pub host: String,
}

/// Canonicalize `raw`, resolving it against `base` first if it is relative.
pub fn normalize(
    raw: &str,
    base: Option<&Url>,
    policy: &NormalizationPolicy,
) -> Result<NormalizedUrl, CrawlError> {
    let original = raw.to_string();

    // Step 1: resolve against base if relative.
    let mut url = match base {
        Some(base) => base
            .join(raw)
            .map_err(|e| CrawlError::MalformedUrl(format!("{raw}: {e}")))?,
        None => Url::parse(raw).map_err(|e| CrawlError::MalformedUrl(format!("{raw}: {e}")))?,
    };

    let scheme = url.scheme().to_ascii_lowercase();
    if !policy
        .allowed_schemes
        .iter()
        .any(|s| s.eq_ignore_ascii_case(&scheme))
    {
        return Err(CrawlError::MalformedUrl(format!(
            "scheme {scheme} not permitted by normalization policy"
        )));
    }

    let host = url
        .host_str()
        .ok_or_else(|| CrawlError::MalformedUrl(format!("{raw}: missing host")))?
        .to_ascii_lowercase();

    // url::Url already performs percent-decode of unreserved octets,
    // percent-encodes reserved ones, and punycodes IDN hosts on parse/join,
    // satisfying step 8.
    url.set_host(Some(&host))
        .map_err(|e| CrawlError::MalformedUrl(format!("{raw}: {e}")))?;
    let _ = url.set_scheme(&scheme);

    // Step 2: strip default ports.
    let default_port = match scheme.as_str() {
        "http" => Some(80),
        "https" => Some(443),
        _ => None,
    };
    if url.port() == default_port {
        let _ = url.set_port(None);
    }

    // Step 3: www handling.
    let host = url.host_str().unwrap_or_default().to_string();
    let new_host = match policy.www_handling {
        WwwHandling::Ignore => host.strip_prefix("www.").unwrap_or(&host).to_string(),
        WwwHandling::Preserve => host.clone(),
        WwwHandling::PreferWww => {
            if host.starts_with("www.") {
                host.clone()
            } else {
                format!("www.{host}")
            }
        }
        WwwHandling::PreferNonWww => host.strip_prefix("www.").unwrap_or(&host).to_string(),
    };
    if new_host != host {
        url.set_host(Some(&new_host))
            .map_err(|e| CrawlError::MalformedUrl(format!("{raw}: {e}")))?;
    }
    let host = new_host;

    // Step 4: protocol handling.
    match policy.protocol_handling {
        ProtocolHandling::Ignore | ProtocolHandling::PreferHttps => {
            if url.scheme() == "http" {
                let _ = url.set_scheme("https");
            }
        }
        ProtocolHandling::Preserve => {}
    }

    // Path: empty path becomes "/".
    if url.path().is_empty() {
        url.set_path("/");
    }
    if policy.collapse_duplicate_slashes {
        let collapsed = collapse_slashes(url.path());
        url.set_path(&collapsed);
    }

    // Step 5: trailing slash.
    if policy.trailing_slash_handling == TrailingSlashHandling::Ignore {
        let path = url.path();
        if path.len() > 1 && path.ends_with('/') {
            let trimmed = path.trim_end_matches('/').to_string();
            url.set_path(&trimmed);
        }
    }

    // Step 6: query params.
    match policy.query_param_handling {
        QueryParamHandling::Ignore => url.set_query(None),
        QueryParamHandling::Sort => {
            if let Some(query) = url.query() {
                let mut pairs: Vec<(String, String)> = url
                    .query_pairs()
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect();
                // Stable sort: ties keep their original relative order.
                pairs.sort_by(|a, b| a.0.cmp(&b.0));
                if pairs.is_empty() {
                    url.set_query(if query.is_empty() { Some("") } else { None });
                } else {
                    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
                    for (k, v) in &pairs {
                        serializer.append_pair(k, v);
                    }
                    url.set_query(Some(&serializer.finish()));
                }
            }
        }
        QueryParamHandling::Preserve => {}
    }

    // Step 7: fragment.
    if policy.fragment_handling == FragmentHandling::Ignore {
        url.set_fragment(None);
    }

    Ok(NormalizedUrl {
        original,
        canonical: url.to_string(),
        host,
    })
}

fn collapse_slashes(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut last_was_slash = false;
    for c in path.chars() {
        if c == '/' {
            if last_was_slash {
                continue;
            }
            last_was_slash = true;
        } else {
            last_was_slash = false;
        }
        out.push(c);
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_policy() -> NormalizationPolicy {
        NormalizationPolicy::default()
    }

    #[test]
    fn lowercases_scheme_and_host_and_strips_default_port() {
        let n = normalize("HTTP://Example.COM:80/Path", None, &default_policy()).unwrap();
        assert!(n.canonical.starts_with("https://example.com/Path"));
    }

    #[test]
    fn is_idempotent() {
        let policy = default_policy();
        let once = normalize("http://www.Example.com/a/b/?b=2&a=1#frag", None, &policy).unwrap();
        let twice = normalize(&once.canonical, None, &policy).unwrap();
        assert_eq!(once.canonical, twice.canonical);
    }

    #[test]
    fn dedup_scenario_from_spec_section_8_5() {
        let policy = default_policy();
        let a = normalize("http://www.Example.com/", None, &policy).unwrap();
        let b = normalize("https://example.com/?b=2&a=1", None, &policy).unwrap();
        let c = normalize("https://example.com/?a=1&b=2#frag", None, &policy).unwrap();
        assert_eq!(a.canonical, "https://example.com/");
        assert_eq!(a.canonical, b.canonical);
        assert_eq!(b.canonical, c.canonical);
    }

    #[test]
    fn sort_policy_orders_query_params_stably() {
        let policy = NormalizationPolicy {
            query_param_handling: QueryParamHandling::Sort,
            ..default_policy()
        };
        let n = normalize("https://example.com/?b=2&a=1", None, &policy).unwrap();
        assert_eq!(n.canonical, "https://example.com/?a=1&b=2");
    }

    #[test]
    fn resolves_relative_against_base() {
        let base = Url::parse("https://example.com/dir/page").unwrap();
        let n = normalize("../other", Some(&base), &default_policy()).unwrap();
        assert_eq!(n.canonical, "https://example.com/other");
    }

    #[test]
    fn rejects_disallowed_scheme() {
        let err = normalize("mailto:a@b.com", None, &default_policy()).unwrap_err();
        assert!(matches!(err, CrawlError::MalformedUrl(_)));
    }

    #[test]
    fn empty_path_becomes_slash() {
        let n = normalize("https://example.com", None, &default_policy()).unwrap();
        assert_eq!(n.canonical, "https://example.com/");
    }
}
