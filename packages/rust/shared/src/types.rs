//! Core domain types for sitekb knowledge bases.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SiteKbError};

/// Version string written into every `metadata.json`.
pub const METADATA_VERSION: &str = "2.0";

/// Metadata file at the root of each knowledge base directory.
pub const METADATA_FILE: &str = "metadata.json";

/// Directory (under the KB root) holding the vector store.
pub const VECTORS_DIR: &str = "vectors";

/// Vector store database file name inside [`VECTORS_DIR`].
pub const VECTOR_DB_FILE: &str = "documents.db";

static KB_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("kb name regex"));

/// Reject knowledge base names outside `[A-Za-z0-9_-]+`.
///
/// Names become directory names, so this also rules out path traversal.
pub fn validate_kb_name(name: &str) -> Result<()> {
    if KB_NAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(SiteKbError::InvalidName {
            name: name.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Crawl types
// ---------------------------------------------------------------------------

/// Which traversal a crawl uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Pages listed in a sitemap, fetched in batches.
    Sitemap,
    /// Same-domain link following from the seed.
    Recursive,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sitemap => "sitemap",
            Self::Recursive => "recursive",
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters of one crawl. Immutable for the duration of the crawl.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlRequest {
    /// Seed URL as given by the caller (scheme optional).
    pub seed: String,
    /// Upper bound on accepted pages.
    pub max_pages: usize,
    /// Upper bound on link depth (recursive mode only).
    pub max_depth: u32,
}

impl CrawlRequest {
    /// Build a request, rejecting empty seeds and zero budgets.
    pub fn new(seed: impl Into<String>, max_pages: usize, max_depth: u32) -> Result<Self> {
        let seed = seed.into();
        if seed.trim().is_empty() {
            return Err(SiteKbError::validation("seed URL must not be empty"));
        }
        if max_pages == 0 {
            return Err(SiteKbError::validation("max_pages must be at least 1"));
        }
        if max_depth == 0 {
            return Err(SiteKbError::validation("max_depth must be at least 1"));
        }
        Ok(Self {
            seed,
            max_pages,
            max_depth,
        })
    }
}

/// A discovered URL waiting in the frontier. The seed has depth 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontierEntry {
    pub url: String,
    pub depth: u32,
}

/// A successfully fetched page with non-empty extracted text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub url: String,
    pub title: String,
    /// Extracted Markdown.
    pub text: String,
    /// Discovery depth (0 for the seed and for sitemap entries).
    pub depth: u32,
}

// ---------------------------------------------------------------------------
// Indexing types
// ---------------------------------------------------------------------------

/// An indexable document derived 1:1 from a [`Page`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Unique within one knowledge base.
    pub id: String,
    pub content: String,
    pub title: String,
    pub source_url: String,
    /// Extra string metadata stored alongside the vector.
    pub metadata: BTreeMap<String, String>,
}

/// The model/provider pair used to turn text into vectors.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmbeddingIdentity {
    /// Model name, e.g. `feature-hash-384` or `text-embedding-3-small`.
    pub model: String,
    /// Whether the model is served by an external provider.
    pub external: bool,
}

impl EmbeddingIdentity {
    pub fn local(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            external: false,
        }
    }

    pub fn external(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            external: true,
        }
    }
}

impl std::fmt::Display for EmbeddingIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.external {
            write!(f, "{} (external)", self.model)
        } else {
            f.write_str(&self.model)
        }
    }
}

// ---------------------------------------------------------------------------
// Knowledge base metadata
// ---------------------------------------------------------------------------

/// The `metadata.json` record at the root of each KB directory.
///
/// Its presence is what makes a directory a committed knowledge base.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KbMetadata {
    pub created_at: DateTime<Utc>,
    pub embedding_model: String,
    pub use_external_embedding: bool,
    pub version: String,
    /// Number of indexed documents.
    pub documents: usize,
    pub source_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pages: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<Strategy>,
}

impl KbMetadata {
    /// The embedding identity every document and query of this KB must use.
    pub fn embedding_identity(&self) -> EmbeddingIdentity {
        EmbeddingIdentity {
            model: self.embedding_model.clone(),
            external: self.use_external_embedding,
        }
    }
}

/// A committed knowledge base as seen through the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct KnowledgeBase {
    pub name: String,
    /// KB root directory.
    pub path: PathBuf,
    pub metadata: KbMetadata,
}

impl KnowledgeBase {
    pub fn embedding_identity(&self) -> EmbeddingIdentity {
        self.metadata.embedding_identity()
    }

    /// Location of the vector store database for this KB.
    pub fn vector_store_path(&self) -> PathBuf {
        vector_store_path(&self.path)
    }
}

/// Vector store location for a KB rooted at `kb_path`.
pub fn vector_store_path(kb_path: &Path) -> PathBuf {
    kb_path.join(VECTORS_DIR).join(VECTOR_DB_FILE)
}

/// One nearest-neighbor hit returned by a search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub document_id: String,
    pub content: String,
    /// Vector distance (lower is closer).
    pub distance: f32,
    pub metadata: BTreeMap<String, String>,
}
