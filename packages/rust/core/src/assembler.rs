//! Document assembly: crawled pages → indexable documents → vector records.

use std::collections::BTreeMap;

use sitekb_shared::{Document, Page, Result, SiteKbError};
use sitekb_storage::VectorRecord;
use tracing::debug;

/// Document id for the `ordinal`-th page of a knowledge base.
pub fn document_id(kb_name: &str, ordinal: usize) -> String {
    format!("{kb_name}_page_{ordinal}")
}

/// One [`Document`] per page with non-blank text, in page order.
///
/// Ordinals count every input page, so ids stay tied to crawl order even
/// when a blank page is dropped.
pub fn build_documents(kb_name: &str, pages: &[Page]) -> Vec<Document> {
    let documents: Vec<Document> = pages
        .iter()
        .enumerate()
        .filter(|(_, page)| !page.text.trim().is_empty())
        .map(|(ordinal, page)| Document {
            id: document_id(kb_name, ordinal),
            content: page.text.clone(),
            title: page.title.clone(),
            source_url: page.url.clone(),
            metadata: BTreeMap::from([
                ("title".to_string(), page.title.clone()),
                ("source_url".to_string(), page.url.clone()),
                ("depth".to_string(), page.depth.to_string()),
            ]),
        })
        .collect();

    debug!(pages = pages.len(), documents = documents.len(), "documents built");
    documents
}

/// Pair documents with their embeddings.
pub fn into_records(documents: Vec<Document>, vectors: Vec<Vec<f32>>) -> Result<Vec<VectorRecord>> {
    if documents.len() != vectors.len() {
        return Err(SiteKbError::Indexing(format!(
            "embedder returned {} vectors for {} documents",
            vectors.len(),
            documents.len()
        )));
    }

    Ok(documents
        .into_iter()
        .zip(vectors)
        .map(|(doc, vector)| VectorRecord {
            id: doc.id,
            content: doc.content,
            title: doc.title,
            source_url: doc.source_url,
            metadata: doc.metadata,
            vector,
        })
        .collect())
}
