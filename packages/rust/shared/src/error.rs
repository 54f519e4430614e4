//! Error types for sitekb.
//!
//! Library crates use [`SiteKbError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all sitekb operations.
#[derive(Debug, thiserror::Error)]
pub enum SiteKbError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error during discovery, crawl or embedding calls.
    #[error("network error: {0}")]
    Network(String),

    /// Sitemap, HTML or JSON parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Vector store or database error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Embedding provider error (request, response shape, model support).
    #[error("embedding error: {0}")]
    Embedding(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad URL, out-of-range option, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Knowledge base name outside `[A-Za-z0-9_-]+`.
    #[error("invalid knowledge base name '{name}': use only letters, digits, hyphens and underscores")]
    InvalidName { name: String },

    /// A knowledge base with this name is already committed.
    #[error("knowledge base '{name}' already exists")]
    NameConflict { name: String },

    /// No knowledge base with this name.
    #[error("knowledge base '{name}' not found")]
    NotFound { name: String },

    /// The crawl produced zero usable pages.
    #[error("no pages were crawled from {url}")]
    EmptyCrawl { url: String },

    /// Embedding or vector-store write failed while building a knowledge base.
    #[error("indexing failed: {0}")]
    Indexing(String),

    /// Query-time embedder does not match the identity recorded at index time.
    #[error("embedding identity mismatch: knowledge base uses '{expected}', embedder is '{actual}'")]
    EmbeddingMismatch { expected: String, actual: String },

    /// Downstream query-server generation failed.
    #[error("query server generation failed: {0}")]
    Codegen(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, SiteKbError>;

impl SiteKbError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
