//! Recursive same-origin crawl driven by a FIFO frontier.

use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};

use sitekb_shared::{FrontierEntry, Result, SiteKbError, Strategy};
use tracing::{debug, info, instrument};
use url::Url;

use crate::extract::ExtractorFactory;
use crate::fetch::{FetchOutcome, fetch_one};
use crate::links::{is_under_origin, origin_prefix};
use crate::{CrawlOutcome, CrawlProgress};

/// Key used for visited-set membership: fragment dropped, trailing slash
/// trimmed, so `https://a.test` and `https://a.test/` are one page.
fn visit_key(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            parsed.as_str().trim_end_matches('/').to_string()
        }
        Err(_) => url.trim_end_matches('/').to_string(),
    }
}

/// Breadth-first crawl from `seed`, one fetch in flight at a time.
///
/// Stops when the frontier is empty or `max_pages` pages were accepted. An
/// entry is dropped at pop time if its URL was already visited or it is deeper
/// than `max_depth`; otherwise it is marked visited before the fetch, so no URL
/// is fetched twice even when the fetch fails. Internal links are followed
/// only from accepted pages shallower than `max_depth`.
#[instrument(skip_all, fields(seed = %seed, max_pages, max_depth))]
pub async fn crawl_recursive(
    factory: &dyn ExtractorFactory,
    seed: &str,
    max_pages: usize,
    max_depth: u32,
    timeout: Duration,
    progress: &dyn CrawlProgress,
) -> Result<CrawlOutcome> {
    let started = Instant::now();
    let seed_url = Url::parse(seed)
        .map_err(|e| SiteKbError::validation(format!("invalid seed URL {seed}: {e}")))?;
    let origin = origin_prefix(&seed_url);

    let extractor = factory.open()?;

    let mut frontier: VecDeque<FrontierEntry> = VecDeque::new();
    frontier.push_back(FrontierEntry {
        url: seed.to_string(),
        depth: 0,
    });
    let mut visited: HashSet<String> = HashSet::new();

    let mut pages = Vec::new();
    let mut failures = Vec::new();
    let mut skipped = 0usize;

    while pages.len() < max_pages {
        let Some(FrontierEntry { url, depth }) = frontier.pop_front() else {
            break;
        };

        if depth > max_depth || !visited.insert(visit_key(&url)) {
            skipped += 1;
            continue;
        }

        match fetch_one(extractor.as_ref(), &url, depth, timeout).await {
            FetchOutcome::Fetched {
                page,
                internal_links,
            } => {
                if depth < max_depth {
                    let before = frontier.len();
                    frontier.extend(
                        internal_links
                            .into_iter()
                            .filter(|link| is_under_origin(link, &origin))
                            .map(|link| FrontierEntry {
                                url: link,
                                depth: depth + 1,
                            }),
                    );
                    debug!(%url, enqueued = frontier.len() - before, "links enqueued");
                }
                pages.push(page);
                progress.page_fetched(&url, pages.len(), max_pages);
            }
            FetchOutcome::Failed(failure) => {
                progress.page_failed(&failure.url);
                failures.push(failure);
            }
        }
    }

    let outcome = CrawlOutcome {
        strategy: Strategy::Recursive,
        pages,
        failures,
        skipped,
        duration: started.elapsed(),
    };

    info!(
        pages = outcome.pages.len(),
        failed = outcome.failures.len(),
        skipped = outcome.skipped,
        remaining = frontier.len(),
        duration_ms = outcome.duration.as_millis() as u64,
        "recursive crawl completed"
    );

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::NoProgress;
    use crate::extract::{ContentExtractor, Extraction, ExtractOptions, HttpExtractorFactory};

    /// In-memory site: URL → (text, internal links). Records every fetch.
    #[derive(Clone, Default)]
    struct FakeSite {
        pages: Arc<HashMap<String, (String, Vec<String>)>>,
        fetched: Arc<Mutex<Vec<String>>>,
    }

    impl FakeSite {
        fn new(pages: Vec<(&str, &str, Vec<&str>)>) -> Self {
            let pages = pages
                .into_iter()
                .map(|(url, text, links)| {
                    (
                        url.to_string(),
                        (text.to_string(), links.into_iter().map(String::from).collect()),
                    )
                })
                .collect();
            Self {
                pages: Arc::new(pages),
                fetched: Arc::default(),
            }
        }

        fn fetched(&self) -> Vec<String> {
            self.fetched.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ContentExtractor for FakeSite {
        async fn extract(&self, url: &str) -> Result<Extraction> {
            self.fetched.lock().unwrap().push(url.to_string());
            match self.pages.get(url) {
                Some((text, links)) => Ok(Extraction {
                    success: true,
                    markdown: text.clone(),
                    title: text.clone(),
                    internal_links: links.clone(),
                    ..Extraction::default()
                }),
                None => Ok(Extraction::failed("HTTP 404 Not Found")),
            }
        }
    }

    impl ExtractorFactory for FakeSite {
        fn open(&self) -> Result<Box<dyn ContentExtractor>> {
            Ok(Box::new(self.clone()))
        }
    }

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn budget_and_depth_hold_with_wide_fanout() {
        let children: Vec<String> = (1..=8).map(|i| format!("https://site.test/c{i}")).collect();
        let mut pages: Vec<(&str, &str, Vec<&str>)> = vec![(
            "https://site.test",
            "root",
            children.iter().map(String::as_str).collect(),
        )];
        for child in &children {
            pages.push((child.as_str(), "child", vec!["https://site.test/deeper"]));
        }
        pages.push(("https://site.test/deeper", "too deep", vec![]));
        let site = FakeSite::new(pages);

        let outcome = crawl_recursive(&site, "https://site.test", 5, 1, TIMEOUT, &NoProgress)
            .await
            .unwrap();

        assert_eq!(outcome.pages.len(), 5);
        assert!(outcome.pages.iter().all(|p| p.depth <= 1));
        assert_eq!(outcome.pages[0].url, "https://site.test");
        assert_eq!(outcome.pages[1].url, "https://site.test/c1");
        assert!(!site.fetched().contains(&"https://site.test/deeper".to_string()));
    }

    #[tokio::test]
    async fn never_fetches_a_url_twice() {
        let site = FakeSite::new(vec![
            (
                "https://site.test",
                "root",
                vec!["https://site.test/a", "https://site.test/b", "https://site.test/"],
            ),
            (
                "https://site.test/a",
                "a",
                vec!["https://site.test/b", "https://site.test", "https://site.test/missing"],
            ),
            (
                "https://site.test/b",
                "b",
                vec!["https://site.test/a", "https://site.test/missing"],
            ),
        ]);

        let outcome = crawl_recursive(&site, "https://site.test", 100, 5, TIMEOUT, &NoProgress)
            .await
            .unwrap();

        let fetched = site.fetched();
        let unique: HashSet<_> = fetched.iter().map(|u| visit_key(u)).collect();
        assert_eq!(fetched.len(), unique.len(), "fetched twice: {fetched:?}");

        let urls: Vec<&str> = outcome.pages.iter().map(|p| p.url.as_str()).collect();
        assert_eq!(
            urls,
            vec!["https://site.test", "https://site.test/a", "https://site.test/b"]
        );
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].url, "https://site.test/missing");
        assert!(outcome.skipped > 0);
    }

    #[tokio::test]
    async fn off_origin_links_are_not_followed() {
        let site = FakeSite::new(vec![
            (
                "https://site.test",
                "root",
                vec![
                    "https://site.test.evil.org/x",
                    "http://site.test/insecure",
                    "https://other.test/page",
                    "https://site.test/ok",
                ],
            ),
            ("https://site.test/ok", "ok", vec![]),
        ]);

        let outcome = crawl_recursive(&site, "https://site.test", 10, 2, TIMEOUT, &NoProgress)
            .await
            .unwrap();

        assert_eq!(outcome.pages.len(), 2);
        assert_eq!(
            site.fetched(),
            vec!["https://site.test".to_string(), "https://site.test/ok".to_string()]
        );
    }

    #[tokio::test]
    async fn failed_seed_yields_empty_outcome() {
        let site = FakeSite::new(vec![]);
        let outcome = crawl_recursive(&site, "https://site.test", 10, 3, TIMEOUT, &NoProgress)
            .await
            .unwrap();
        assert!(outcome.pages.is_empty());
        assert_eq!(outcome.failures.len(), 1);
    }

    #[tokio::test]
    async fn invalid_seed_is_err() {
        let site = FakeSite::new(vec![]);
        let result = crawl_recursive(&site, "not a url", 10, 3, TIMEOUT, &NoProgress).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn crawls_mock_server_respecting_depth() {
        let server = MockServer::start().await;

        let pages = [
            ("/", r#"<html><body><main><h1>Root</h1><p>Root page.</p><a href="/page2">Page 2</a></main></body></html>"#),
            ("/page2", r#"<html><body><main><h1>Page 2</h1><p>Second.</p><a href="/page3">Page 3</a></main></body></html>"#),
            ("/page3", r#"<html><body><main><h1>Page 3</h1><p>Deep page.</p></main></body></html>"#),
        ];
        for (route, body) in pages {
            Mock::given(method("GET"))
                .and(path(route))
                .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/html"))
                .mount(&server)
                .await;
        }

        let factory = HttpExtractorFactory::new(ExtractOptions {
            timeout_secs: 5,
            ..ExtractOptions::default()
        });

        // Depth 1 = root + one level
        let outcome = crawl_recursive(&factory, &server.uri(), 10, 1, TIMEOUT, &NoProgress)
            .await
            .unwrap();

        let titles: Vec<&str> = outcome.pages.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(titles, vec!["Root", "Page 2"]);
        assert!(outcome.pages[1].text.contains("Second."));
    }
}
