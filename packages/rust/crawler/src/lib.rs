//! Page fetching, content extraction, and crawl drivers.
//!
//! This crate provides:
//! - [`extract`]: the content-extraction collaborator ([`ContentExtractor`]) and
//!   its HTTP implementation
//! - [`fetch`]: the fetch executor (single fetch and fixed-size batches)
//! - [`frontier`]: recursive same-origin crawling with depth/page budgets

pub mod convert;
pub mod extract;
pub mod fetch;
pub mod frontier;
pub mod links;

use std::time::Duration;

use sitekb_shared::{Page, Strategy};

pub use extract::{
    ContentExtractor, ExtractOptions, Extraction, ExtractorFactory, HttpExtractor,
    HttpExtractorFactory,
};
pub use fetch::{FetchOptions, FetchOutcome, fetch_batch, fetch_one};
pub use frontier::crawl_recursive;

/// A URL that produced no page, with the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedUrl {
    pub url: String,
    pub reason: String,
}

/// Summary of a completed crawl.
#[derive(Debug, Clone)]
pub struct CrawlOutcome {
    pub strategy: Strategy,
    /// Accepted pages, in acceptance order.
    pub pages: Vec<Page>,
    pub failures: Vec<FailedUrl>,
    /// Frontier entries dropped as already visited or too deep.
    pub skipped: usize,
    pub duration: Duration,
}

/// Per-page progress hook for long crawls.
pub trait CrawlProgress: Send + Sync {
    /// A page was accepted; `accepted` of at most `budget`.
    fn page_fetched(&self, _url: &str, _accepted: usize, _budget: usize) {}

    fn page_failed(&self, _url: &str) {}
}

/// Progress hook that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl CrawlProgress for NoProgress {}
