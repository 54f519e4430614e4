//! Core pipeline orchestration and domain logic for sitekb.
//!
//! This crate ties together discovery, crawling, embedding and the vector
//! store into end-to-end workflows: crawling a site, committing it as a
//! knowledge base, and searching it.

pub mod assembler;
pub mod pipeline;
pub mod registry;
pub mod search;

pub use pipeline::{
    CreateKbConfig, CreateReport, ProgressReporter, STAGING_PREFIX, ServerStep, Services,
    SilentProgress, crawl_site, create_knowledge_base,
};
pub use registry::{DeleteReport, KbStats, KbSummary, Registry};
pub use search::SearchService;
