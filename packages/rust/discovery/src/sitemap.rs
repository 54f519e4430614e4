//! Sitemap download and flattening.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use reqwest::Client;
use sitekb_shared::{Result, SiteKbError};
use tracing::{debug, info, instrument, warn};

use crate::{DiscoveryOptions, build_client};

static LOC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<loc>\s*(.*?)\s*</loc>").expect("loc regex"));

/// Whether a `<loc>` value points at another sitemap rather than a page.
pub fn is_nested_sitemap(url: &str) -> bool {
    let url = url.to_ascii_lowercase();
    url.contains("sitemap") && url.ends_with(".xml")
}

/// Extract every `<loc>` value from a sitemap or sitemap index, in document order.
pub fn extract_locs(xml: &str) -> Vec<String> {
    LOC_RE
        .captures_iter(xml)
        .filter_map(|cap| cap.get(1))
        .map(|m| unescape_xml(m.as_str()))
        .filter(|loc| !loc.is_empty())
        .collect()
}

fn unescape_xml(raw: &str) -> String {
    raw.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Flatten a sitemap (possibly a sitemap of sitemaps) into page URLs.
///
/// Nested sitemaps are spliced in place, so the result keeps document order.
/// Each sitemap URL is fetched at most once, which makes self-referencing or
/// mutually-referencing indexes terminate. A sitemap that fails to download
/// contributes nothing and the remaining branches still resolve. Duplicate
/// page URLs keep their first position.
///
/// With `limit`, resolution stops as soon as that many pages are collected.
#[instrument(skip_all, fields(sitemap = %sitemap_url))]
pub async fn resolve(
    sitemap_url: &str,
    limit: Option<usize>,
    opts: &DiscoveryOptions,
) -> Vec<String> {
    if limit == Some(0) {
        return Vec::new();
    }

    let client = match build_client(opts.sitemap_timeout_secs) {
        Ok(client) => client,
        Err(e) => {
            warn!(error = %e, "could not build sitemap client");
            return Vec::new();
        }
    };

    let mut visited_sitemaps: HashSet<String> = HashSet::new();
    let mut seen_pages: HashSet<String> = HashSet::new();
    let mut pages = Vec::new();

    visited_sitemaps.insert(sitemap_url.to_string());
    let mut stack = vec![fetch_branch(&client, sitemap_url).await.into_iter()];

    while let Some(branch) = stack.last_mut() {
        let Some(loc) = branch.next() else {
            stack.pop();
            continue;
        };

        if is_nested_sitemap(&loc) {
            if visited_sitemaps.insert(loc.clone()) {
                let nested = fetch_branch(&client, &loc).await;
                stack.push(nested.into_iter());
            } else {
                debug!(%loc, "sitemap already expanded, skipping");
            }
            continue;
        }

        if seen_pages.insert(loc.clone()) {
            pages.push(loc);
            if limit.is_some_and(|max| pages.len() >= max) {
                debug!(pages = pages.len(), "page limit reached, stopping resolution");
                break;
            }
        }
    }

    info!(
        pages = pages.len(),
        sitemaps = visited_sitemaps.len(),
        "sitemap resolved"
    );
    pages
}

/// Fetch one sitemap document; failures are logged and yield no entries.
async fn fetch_branch(client: &Client, url: &str) -> Vec<String> {
    match fetch_sitemap(client, url).await {
        Ok(locs) => {
            debug!(%url, entries = locs.len(), "sitemap fetched");
            locs
        }
        Err(e) => {
            warn!(%url, error = %e, "sitemap branch failed");
            Vec::new()
        }
    }
}

async fn fetch_sitemap(client: &Client, url: &str) -> Result<Vec<String>> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| SiteKbError::Network(format!("{url}: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(SiteKbError::Network(format!("{url}: HTTP {status}")));
    }

    let body = response
        .text()
        .await
        .map_err(|e| SiteKbError::Network(format!("{url}: failed to read body: {e}")))?;

    Ok(extract_locs(&body))
}
