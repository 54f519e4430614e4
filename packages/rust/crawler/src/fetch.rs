//! Fetch executor: one URL at a time, or fixed-size concurrent batches.
//!
//! Both paths share [`fetch_one`], which turns every failure mode (error,
//! unsuccessful extraction, empty text, timeout, panic) into a per-URL
//! [`FetchOutcome::Failed`] so nothing escapes its own unit of work.

use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use futures::FutureExt;
use futures::future::join_all;
use sitekb_shared::{CrawlConfig, Page, Result, Strategy};
use tracing::{debug, info, instrument, warn};

use crate::extract::{ContentExtractor, ExtractorFactory};
use crate::{CrawlOutcome, CrawlProgress, FailedUrl};

/// Knobs for the fetch executor.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// URLs fetched concurrently per batch.
    pub batch_size: usize,
    /// Upper bound on a single extraction, network included.
    pub timeout: Duration,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self::from(&CrawlConfig::default())
    }
}

impl From<&CrawlConfig> for FetchOptions {
    fn from(config: &CrawlConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            timeout: Duration::from_secs(config.fetch_timeout_secs),
        }
    }
}

/// Result of fetching one URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Fetched {
        page: Page,
        /// Internal links reported by the extractor.
        internal_links: Vec<String>,
    },
    Failed(FailedUrl),
}

/// Fetch and extract a single URL.
///
/// Never fails as a whole: any problem is reported as [`FetchOutcome::Failed`]
/// for this URL only.
pub async fn fetch_one(
    extractor: &dyn ContentExtractor,
    url: &str,
    depth: u32,
    timeout: Duration,
) -> FetchOutcome {
    let failed = |reason: String| {
        warn!(%url, %reason, "fetch failed");
        FetchOutcome::Failed(FailedUrl {
            url: url.to_string(),
            reason,
        })
    };

    let guarded = AssertUnwindSafe(extractor.extract(url)).catch_unwind();
    let extraction = match tokio::time::timeout(timeout, guarded).await {
        Err(_) => return failed(format!("timed out after {timeout:?}")),
        Ok(Err(_)) => return failed("extractor panicked".to_string()),
        Ok(Ok(Err(e))) => return failed(e.to_string()),
        Ok(Ok(Ok(extraction))) => extraction,
    };

    if !extraction.success {
        return failed(
            extraction
                .error
                .unwrap_or_else(|| "extraction unsuccessful".to_string()),
        );
    }
    if extraction.markdown.trim().is_empty() {
        return failed("no extractable text".to_string());
    }

    debug!(%url, depth, chars = extraction.markdown.len(), "page fetched");
    FetchOutcome::Fetched {
        page: Page {
            url: url.to_string(),
            title: extraction.title,
            text: extraction.markdown,
            depth,
        },
        internal_links: extraction.internal_links,
    }
}

/// Fetch `urls` in sequential batches of `opts.batch_size`.
///
/// Fetches within a batch run concurrently and are joined together; results
/// are appended in the batch's input order. A failing URL never affects its
/// siblings. One extraction session is held for the whole invocation.
#[instrument(skip_all, fields(urls = urls.len(), batch_size = opts.batch_size))]
pub async fn fetch_batch(
    factory: &dyn ExtractorFactory,
    urls: &[String],
    opts: &FetchOptions,
    progress: &dyn CrawlProgress,
) -> Result<CrawlOutcome> {
    let started = Instant::now();
    let extractor = factory.open()?;

    let mut pages = Vec::new();
    let mut failures = Vec::new();

    for (batch_no, batch) in urls.chunks(opts.batch_size.max(1)).enumerate() {
        debug!(batch = batch_no, size = batch.len(), "starting batch");

        let results = join_all(
            batch
                .iter()
                .map(|url| fetch_one(extractor.as_ref(), url, 0, opts.timeout)),
        )
        .await;

        for outcome in results {
            match outcome {
                FetchOutcome::Fetched { page, .. } => {
                    progress.page_fetched(&page.url, pages.len() + 1, urls.len());
                    pages.push(page);
                }
                FetchOutcome::Failed(failure) => {
                    progress.page_failed(&failure.url);
                    failures.push(failure);
                }
            }
        }
    }

    let outcome = CrawlOutcome {
        strategy: Strategy::Sitemap,
        pages,
        failures,
        skipped: 0,
        duration: started.elapsed(),
    };

    info!(
        pages = outcome.pages.len(),
        failed = outcome.failures.len(),
        duration_ms = outcome.duration.as_millis() as u64,
        "batch fetch completed"
    );

    Ok(outcome)
}
