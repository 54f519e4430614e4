//! Crawl strategy detection and sitemap resolution.
//!
//! Before crawling a site, sitekb checks whether it publishes a sitemap at one
//! of the conventional locations, or points at one from `robots.txt`. If so the
//! crawl fetches the listed pages in batches; otherwise it falls back to
//! recursive link-following from the seed.

mod robots;
mod sitemap;

use std::time::Duration;

use reqwest::Client;
use sitekb_shared::{CrawlConfig, Result, SiteKbError, Strategy};
use tracing::{debug, info, instrument};
use url::Url;

pub use robots::sitemap_directives;
pub use sitemap::{extract_locs, is_nested_sitemap, resolve};

/// Conventional sitemap locations, probed in order against the seed's origin.
pub const SITEMAP_CANDIDATES: [&str; 3] =
    ["/sitemap.xml", "/sitemap_index.xml", "/sitemap/sitemap.xml"];

/// Maximum number of redirects to follow during discovery.
const MAX_REDIRECTS: usize = 5;

/// User-Agent string for discovery requests.
const USER_AGENT: &str = concat!("sitekb/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

/// Outcome of strategy detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub strategy: Strategy,
    /// Where the crawl starts: the sitemap URL in sitemap mode, the canonical
    /// seed in recursive mode.
    pub target: String,
    /// The canonicalized seed (`https://` added, trailing slash removed).
    pub seed: String,
}

impl Detection {
    fn recursive(seed: String) -> Self {
        Self {
            strategy: Strategy::Recursive,
            target: seed.clone(),
            seed,
        }
    }
}

/// Configuration for detection and sitemap fetching.
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// Timeout for HEAD probes and the robots.txt fetch.
    pub probe_timeout_secs: u64,
    /// Timeout for each sitemap document download.
    pub sitemap_timeout_secs: u64,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self::from(&CrawlConfig::default())
    }
}

impl From<&CrawlConfig> for DiscoveryOptions {
    fn from(config: &CrawlConfig) -> Self {
        Self {
            probe_timeout_secs: config.probe_timeout_secs,
            sitemap_timeout_secs: config.sitemap_timeout_secs,
        }
    }
}

/// Canonicalize a seed: prefix `https://` when no scheme is given and strip
/// trailing slashes.
pub fn normalize_seed(seed: &str) -> String {
    let seed = seed.trim();
    let with_scheme = if seed.starts_with("http://") || seed.starts_with("https://") {
        seed.to_string()
    } else {
        format!("https://{seed}")
    };
    with_scheme.trim_end_matches('/').to_string()
}

/// Decide whether to crawl `seed` from a sitemap or recursively.
///
/// Never fails: every network error during probing counts as "not found" and
/// detection falls through to the next candidate, ending at the recursive
/// fallback.
#[instrument(skip_all, fields(seed = %seed))]
pub async fn detect(seed: &str, opts: &DiscoveryOptions) -> Detection {
    let canonical = normalize_seed(seed);

    let base = match Url::parse(&canonical) {
        Ok(url) if url.has_host() => url,
        _ => {
            debug!(%canonical, "seed is not a usable URL, falling back to recursive");
            return Detection::recursive(canonical);
        }
    };

    let client = match build_client(opts.probe_timeout_secs) {
        Ok(client) => client,
        Err(e) => {
            debug!(error = %e, "could not build probe client");
            return Detection::recursive(canonical);
        }
    };

    for candidate in SITEMAP_CANDIDATES {
        let Ok(url) = base.join(candidate) else {
            continue;
        };
        if probe(&client, url.as_str()).await {
            info!(sitemap = %url, "sitemap found at conventional location");
            return Detection {
                strategy: Strategy::Sitemap,
                target: url.to_string(),
                seed: canonical,
            };
        }
    }

    if let Some(sitemap_url) = sitemap_from_robots(&client, &base).await {
        info!(sitemap = %sitemap_url, "sitemap found via robots.txt");
        return Detection {
            strategy: Strategy::Sitemap,
            target: sitemap_url,
            seed: canonical,
        };
    }

    info!("no sitemap found, using recursive crawl");
    Detection::recursive(canonical)
}

/// Read `robots.txt` at the origin and return the first `sitemap:` pointer that
/// answers a HEAD probe.
async fn sitemap_from_robots(client: &Client, base: &Url) -> Option<String> {
    let robots_url = base.join("/robots.txt").ok()?;

    let response = match client.get(robots_url.as_str()).send().await {
        Ok(resp) if resp.status().is_success() => resp,
        Ok(resp) => {
            debug!(status = %resp.status(), "robots.txt not available");
            return None;
        }
        Err(e) => {
            debug!(error = %e, "robots.txt fetch failed");
            return None;
        }
    };

    let body = match response.text().await {
        Ok(body) => body,
        Err(e) => {
            debug!(error = %e, "failed to read robots.txt body");
            return None;
        }
    };

    for directive in sitemap_directives(&body) {
        let Ok(candidate) = base.join(&directive) else {
            debug!(%directive, "ignoring unparseable sitemap directive");
            continue;
        };
        if probe(client, candidate.as_str()).await {
            return Some(candidate.to_string());
        }
    }

    None
}

/// Lightweight existence check: HEAD, no body download.
async fn probe(client: &Client, url: &str) -> bool {
    match client.head(url).send().await {
        Ok(resp) => {
            let ok = resp.status().is_success();
            debug!(%url, status = %resp.status(), ok, "probe");
            ok
        }
        Err(e) => {
            debug!(%url, error = %e, "probe failed");
            false
        }
    }
}

/// Build a reqwest client with appropriate settings.
pub(crate) fn build_client(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| SiteKbError::Network(format!("failed to build HTTP client: {e}")))
}
