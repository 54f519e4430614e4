//! Shared types, error model, and configuration for sitekb.
//!
//! This crate is the foundation depended on by all other sitekb crates.
//! It provides:
//! - [`SiteKbError`], the unified error type
//! - Domain types ([`CrawlRequest`], [`Page`], [`Document`], [`KbMetadata`], [`SearchResult`])
//! - Configuration ([`AppConfig`], [`CrawlConfig`], config loading)

pub mod config;
pub mod error;
pub mod fs;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CrawlConfig, CrawlSection, DefaultsConfig, EmbeddingConfig, ServerConfig,
    config_dir, config_file_path, init_config, load_config, load_config_from, validate_api_key,
};
pub use error::{Result, SiteKbError};
pub use fs::write_atomic;
pub use types::{
    CrawlRequest, Document, EmbeddingIdentity, FrontierEntry, KbMetadata, KnowledgeBase,
    METADATA_FILE, METADATA_VERSION, Page, SearchResult, Strategy, VECTOR_DB_FILE, VECTORS_DIR,
    validate_kb_name, vector_store_path,
};
