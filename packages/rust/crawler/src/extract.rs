//! Content-extraction collaborator: fetch a URL and turn it into Markdown plus
//! classified links.
//!
//! The crawl drivers only see the [`ContentExtractor`] trait. A fresh extractor
//! (one HTTP session) is opened per crawl or batch invocation through an
//! [`ExtractorFactory`] and dropped when that invocation ends.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{CACHE_CONTROL, CONTENT_TYPE, PRAGMA};
use scraper::Html;
use sitekb_shared::{CrawlConfig, Result, SiteKbError};
use tracing::debug;
use url::Url;

use crate::convert::document_to_markdown;
use crate::links::classify_links;

/// User-Agent string for crawl requests.
const USER_AGENT: &str = concat!("sitekb/", env!("CARGO_PKG_VERSION"));

/// Maximum number of redirects followed per page.
const MAX_REDIRECTS: usize = 5;

/// What the extractor produced for one URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub success: bool,
    /// Extracted page text as Markdown.
    pub markdown: String,
    pub title: String,
    pub internal_links: Vec<String>,
    pub external_links: Vec<String>,
    pub social_links: Vec<String>,
    /// Why extraction was unsuccessful, when it was not.
    pub error: Option<String>,
}

impl Extraction {
    /// An unsuccessful extraction carrying a reason.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(reason.into()),
            ..Self::default()
        }
    }
}

/// Fetches and renders a single URL.
#[async_trait]
pub trait ContentExtractor: Send + Sync {
    /// Fetch `url` and extract its content.
    ///
    /// `Err` means the fetch itself broke (network, bad URL); an HTTP error
    /// status or unusable body is reported as `Ok` with `success == false`.
    async fn extract(&self, url: &str) -> Result<Extraction>;
}

/// Opens one extraction session per crawl or batch invocation.
pub trait ExtractorFactory: Send + Sync {
    fn open(&self) -> Result<Box<dyn ContentExtractor>>;
}

/// Options controlling HTTP extraction.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub timeout_secs: u64,
    /// Send `Cache-Control: no-cache` so intermediaries revalidate.
    pub bypass_cache: bool,
    pub exclude_external_links: bool,
    pub exclude_social_links: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self::from(&CrawlConfig::default())
    }
}

impl From<&CrawlConfig> for ExtractOptions {
    fn from(config: &CrawlConfig) -> Self {
        Self {
            timeout_secs: config.fetch_timeout_secs,
            bypass_cache: config.bypass_cache,
            exclude_external_links: config.exclude_external_links,
            exclude_social_links: config.exclude_social_links,
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP extractor
// ---------------------------------------------------------------------------

/// Plain HTTP GET + HTML → Markdown extractor. No JavaScript rendering.
pub struct HttpExtractor {
    client: Client,
    opts: ExtractOptions,
}

impl HttpExtractor {
    pub fn new(opts: ExtractOptions) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(Duration::from_secs(opts.timeout_secs))
            .build()
            .map_err(|e| SiteKbError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, opts })
    }

    /// Build an [`Extraction`] from an already-downloaded body.
    fn extract_body(&self, page_url: &Url, body: &str, is_html: bool) -> Result<Extraction> {
        if !is_html {
            return Ok(Extraction {
                success: true,
                markdown: body.trim().to_string(),
                title: "Untitled".to_string(),
                ..Extraction::default()
            });
        }

        let doc = Html::parse_document(body);
        let (title, markdown) = document_to_markdown(&doc)?;
        let links = classify_links(&doc, page_url);

        Ok(Extraction {
            success: true,
            markdown,
            title,
            internal_links: links.internal,
            external_links: if self.opts.exclude_external_links {
                Vec::new()
            } else {
                links.external
            },
            social_links: if self.opts.exclude_social_links {
                Vec::new()
            } else {
                links.social
            },
            error: None,
        })
    }
}

#[async_trait]
impl ContentExtractor for HttpExtractor {
    async fn extract(&self, url: &str) -> Result<Extraction> {
        let page_url = Url::parse(url)
            .map_err(|e| SiteKbError::validation(format!("invalid URL {url}: {e}")))?;

        let mut request = self.client.get(page_url.as_str());
        if self.opts.bypass_cache {
            request = request
                .header(CACHE_CONTROL, "no-cache")
                .header(PRAGMA, "no-cache");
        }

        let response = request
            .send()
            .await
            .map_err(|e| SiteKbError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            debug!(%url, %status, "non-success status");
            return Ok(Extraction::failed(format!("HTTP {status}")));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        if !content_type.is_empty()
            && !content_type.contains("html")
            && !content_type.starts_with("text/")
        {
            return Ok(Extraction::failed(format!(
                "unsupported content type {content_type}"
            )));
        }

        // Redirects may land on another page; links resolve against the final URL.
        let final_url = response.url().clone();
        let body = response
            .text()
            .await
            .map_err(|e| SiteKbError::Network(format!("{url}: body read failed: {e}")))?;

        let is_html = content_type.is_empty()
            || content_type.contains("html")
            || looks_like_html(&body);
        self.extract_body(&final_url, &body, is_html)
    }
}

/// Servers that mislabel HTML as `text/plain` still get parsed as HTML.
fn looks_like_html(body: &str) -> bool {
    let head: String = body.trim_start().chars().take(15).collect();
    let head = head.to_ascii_lowercase();
    head.starts_with("<!doctype html") || head.starts_with("<html")
}

/// Factory producing [`HttpExtractor`] sessions.
#[derive(Debug, Clone, Default)]
pub struct HttpExtractorFactory {
    opts: ExtractOptions,
}

impl HttpExtractorFactory {
    pub fn new(opts: ExtractOptions) -> Self {
        Self { opts }
    }
}

impl ExtractorFactory for HttpExtractorFactory {
    fn open(&self) -> Result<Box<dyn ContentExtractor>> {
        Ok(Box::new(HttpExtractor::new(self.opts.clone())?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn opts() -> ExtractOptions {
        ExtractOptions {
            timeout_secs: 5,
            bypass_cache: true,
            exclude_external_links: true,
            exclude_social_links: true,
        }
    }

    const PAGE: &str = r#"<html><head><title>Guide</title></head><body>
        <main>
            <h1>Guide</h1>
            <p>Read the guide.</p>
            <a href="/next">Next</a>
            <a href="https://other.org/page">Elsewhere</a>
            <a href="https://twitter.com/example">Follow</a>
        </main>
    </body></html>"#;

    #[tokio::test]
    async fn extracts_html_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/guide"))
            .and(header("cache-control", "no-cache"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(PAGE, "text/html; charset=utf-8"),
            )
            .mount(&server)
            .await;

        let extractor = HttpExtractor::new(opts()).unwrap();
        let result = extractor
            .extract(&format!("{}/guide", server.uri()))
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.title, "Guide");
        assert!(result.markdown.contains("Read the guide."));
        assert_eq!(result.internal_links, vec![format!("{}/next", server.uri())]);
        assert!(result.external_links.is_empty());
        assert!(result.social_links.is_empty());
    }

    #[tokio::test]
    async fn keeps_external_links_when_not_excluded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/guide"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(PAGE, "text/html"),
            )
            .mount(&server)
            .await;

        let extractor = HttpExtractor::new(ExtractOptions {
            bypass_cache: false,
            exclude_external_links: false,
            exclude_social_links: false,
            ..opts()
        })
        .unwrap();
        let result = extractor
            .extract(&format!("{}/guide", server.uri()))
            .await
            .unwrap();

        assert_eq!(result.external_links, vec!["https://other.org/page"]);
        assert_eq!(result.social_links, vec!["https://twitter.com/example"]);
    }

    #[tokio::test]
    async fn http_error_is_unsuccessful_not_err() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let extractor = HttpExtractor::new(opts()).unwrap();
        let result = extractor
            .extract(&format!("{}/boom", server.uri()))
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("500"));
    }

    #[tokio::test]
    async fn binary_content_is_unsuccessful() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(vec![0u8, 1, 2], "application/pdf"),
            )
            .mount(&server)
            .await;

        let extractor = HttpExtractor::new(opts()).unwrap();
        let result = extractor
            .extract(&format!("{}/file.pdf", server.uri()))
            .await
            .unwrap();
        assert!(!result.success);
    }

    #[tokio::test]
    async fn plain_text_is_kept_verbatim() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("  just text  "))
            .mount(&server)
            .await;

        let extractor = HttpExtractor::new(opts()).unwrap();
        let result = extractor
            .extract(&format!("{}/notes.txt", server.uri()))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.markdown, "just text");
        assert_eq!(result.title, "Untitled");
    }

    #[test]
    fn sniffs_mislabelled_html() {
        assert!(looks_like_html("\n  <!DOCTYPE html><html></html>"));
        assert!(looks_like_html("<html lang=\"en\">"));
        assert!(!looks_like_html("plain words"));
    }

    #[tokio::test]
    async fn invalid_url_is_err() {
        let extractor = HttpExtractor::new(opts()).unwrap();
        assert!(extractor.extract("not a url").await.is_err());
    }
}
