//! Link discovery and internal/external/social classification.

use std::collections::HashSet;
use std::sync::LazyLock;

use scraper::{Html, Selector};
use url::Url;

static ANCHOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("valid selector"));

/// Hosts treated as social networks (subdomains included).
const SOCIAL_HOSTS: &[&str] = &[
    "facebook.com",
    "twitter.com",
    "x.com",
    "linkedin.com",
    "instagram.com",
    "youtube.com",
    "tiktok.com",
    "pinterest.com",
    "reddit.com",
    "mastodon.social",
    "discord.com",
    "discord.gg",
    "t.me",
];

/// Links found on one page, split by destination.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassifiedLinks {
    /// Same scheme, host and port as the page.
    pub internal: Vec<String>,
    pub external: Vec<String>,
    pub social: Vec<String>,
}

/// Collect `a[href]` targets resolved against `page_url`, in document order.
///
/// Fragments are stripped, non-HTTP targets are ignored and duplicates keep
/// their first occurrence.
pub fn classify_links(doc: &Html, page_url: &Url) -> ClassifiedLinks {
    let mut seen = HashSet::new();
    let mut links = ClassifiedLinks::default();

    for el in doc.select(&ANCHOR) {
        let Some(href) = el.value().attr("href") else {
            continue;
        };
        let href = href.trim();
        if href.is_empty()
            || href.starts_with('#')
            || href.starts_with("javascript:")
            || href.starts_with("mailto:")
            || href.starts_with("tel:")
        {
            continue;
        }

        let Ok(mut resolved) = page_url.join(href) else {
            continue;
        };
        if !matches!(resolved.scheme(), "http" | "https") {
            continue;
        }
        resolved.set_fragment(None);

        let link = resolved.to_string();
        if !seen.insert(link.clone()) {
            continue;
        }

        if resolved.origin() == page_url.origin() {
            links.internal.push(link);
        } else if resolved.host_str().is_some_and(is_social_host) {
            links.social.push(link);
        } else {
            links.external.push(link);
        }
    }

    links
}

/// Whether `host` is a known social network or one of its subdomains.
pub fn is_social_host(host: &str) -> bool {
    let host = host.trim_start_matches("www.").to_ascii_lowercase();
    SOCIAL_HOSTS
        .iter()
        .any(|social| host == *social || host.ends_with(&format!(".{social}")))
}

/// `scheme://host[:port]` of a URL, the prefix internal links must share.
pub fn origin_prefix(url: &Url) -> String {
    url.origin().ascii_serialization()
}

/// Whether `link` lives under `origin` (a value from [`origin_prefix`]).
///
/// Requires a path, query or end-of-string boundary after the prefix so that
/// `https://example.com.evil.org` is not mistaken for `https://example.com`.
pub fn is_under_origin(link: &str, origin: &str) -> bool {
    match link.strip_prefix(origin) {
        Some(rest) => rest.is_empty() || rest.starts_with(['/', '?', '#']),
        None => false,
    }
}
