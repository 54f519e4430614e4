//! Semantic search over a committed knowledge base.

use std::sync::Arc;

use sitekb_embedding::{Embedder, EmbedderProvider};
use sitekb_shared::{KnowledgeBase, Result, SearchResult, SiteKbError};
use sitekb_storage::{LibsqlVectorStore, VectorStore};
use tracing::{debug, instrument};

use crate::registry::Registry;

/// Answers queries against knowledge bases.
///
/// The embedding identity always comes from the knowledge base's own
/// metadata, never from the caller, so a query is embedded exactly the way its
/// documents were.
#[derive(Clone)]
pub struct SearchService {
    registry: Registry,
    embedders: Arc<dyn EmbedderProvider>,
}

impl SearchService {
    pub fn new(registry: Registry, embedders: Arc<dyn EmbedderProvider>) -> Self {
        Self {
            registry,
            embedders,
        }
    }

    /// Up to `limit` documents nearest to `query`, closest first.
    #[instrument(skip_all, fields(kb = %kb_name, limit))]
    pub async fn search(
        &self,
        kb_name: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        let kb = self.registry.get(kb_name)?;
        let embedder = self.embedder_for(&kb)?;
        let store = LibsqlVectorStore::open(&kb.vector_store_path()).await?;
        search_store(embedder.as_ref(), &store, query, limit).await
    }

    fn embedder_for(&self, kb: &KnowledgeBase) -> Result<Arc<dyn Embedder>> {
        let expected = kb.embedding_identity();
        let embedder = self.embedders.embedder_for(&expected)?;
        if embedder.identity() != &expected {
            return Err(SiteKbError::EmbeddingMismatch {
                expected: expected.to_string(),
                actual: embedder.identity().to_string(),
            });
        }
        Ok(embedder)
    }
}

/// Embed `query` and map the store's nearest neighbors to results.
pub async fn search_store(
    embedder: &dyn Embedder,
    store: &dyn VectorStore,
    query: &str,
    limit: usize,
) -> Result<Vec<SearchResult>> {
    if limit == 0 {
        return Ok(Vec::new());
    }

    let vector = embedder.embed(query).await?;
    let hits = store.query(&vector, limit).await?;
    debug!(hits = hits.len(), "search complete");

    let mut results: Vec<SearchResult> = hits
        .into_iter()
        .map(|hit| {
            let mut metadata = hit.metadata;
            metadata
                .entry("title".to_string())
                .or_insert(hit.title);
            metadata
                .entry("source_url".to_string())
                .or_insert(hit.source_url);
            SearchResult {
                document_id: hit.id,
                content: hit.content,
                distance: hit.distance,
                metadata,
            }
        })
        .collect();

    results.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    Ok(results)
}
