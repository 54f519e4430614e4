//! Local sentence-transformer models run in-process through fastembed.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use sitekb_shared::{EmbeddingIdentity, Result, SiteKbError};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::Embedder;

/// The fastembed model behind a local model name, if this build knows it.
///
/// Accepts bare names and `sentence-transformers/` / `BAAI/` qualified ones.
pub fn model_for(name: &str) -> Option<EmbeddingModel> {
    let bare = name.rsplit('/').next().unwrap_or(name).to_ascii_lowercase();
    match bare.as_str() {
        "all-minilm-l6-v2" => Some(EmbeddingModel::AllMiniLML6V2),
        "all-minilm-l12-v2" => Some(EmbeddingModel::AllMiniLML12V2),
        "bge-small-en-v1.5" => Some(EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Some(EmbeddingModel::BGEBaseENV15),
        _ => None,
    }
}

/// Embedder for a local sentence-transformer model.
///
/// Weights are downloaded into `cache_dir` and loaded on first use, so
/// resolving the embedder stays cheap.
pub struct FastEmbedder {
    model: EmbeddingModel,
    cache_dir: PathBuf,
    identity: EmbeddingIdentity,
    loaded: OnceCell<Arc<Mutex<TextEmbedding>>>,
}

impl FastEmbedder {
    /// `None` when `name` is not a model this build supports.
    pub fn from_model(name: &str, cache_dir: PathBuf) -> Option<Self> {
        let model = model_for(name)?;
        Some(Self {
            model,
            cache_dir,
            identity: EmbeddingIdentity::local(name),
            loaded: OnceCell::new(),
        })
    }

    async fn load(&self) -> Result<Arc<Mutex<TextEmbedding>>> {
        self.loaded
            .get_or_try_init(|| async {
                let options = InitOptions::new(self.model.clone())
                    .with_cache_dir(self.cache_dir.clone())
                    .with_show_download_progress(false);
                info!(model = %self.identity.model, cache = %self.cache_dir.display(), "loading local embedding model");

                let model = tokio::task::spawn_blocking(move || TextEmbedding::try_new(options))
                    .await
                    .map_err(|e| SiteKbError::Embedding(format!("model loader panicked: {e}")))?
                    .map_err(|e| {
                        SiteKbError::Embedding(format!("cannot load {}: {e}", self.identity.model))
                    })?;
                Ok::<_, SiteKbError>(Arc::new(Mutex::new(model)))
            })
            .await
            .cloned()
    }
}

#[async_trait]
impl Embedder for FastEmbedder {
    fn identity(&self) -> &EmbeddingIdentity {
        &self.identity
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| SiteKbError::Embedding("model returned no vector".into()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let model = self.load().await?;
        let input = texts.to_vec();
        debug!(texts = input.len(), "embedding locally");

        let vectors = tokio::task::spawn_blocking(move || {
            let model = model
                .lock()
                .map_err(|_| SiteKbError::Embedding("embedding model lock poisoned".into()))?;
            model
                .embed(input, None)
                .map_err(|e| SiteKbError::Embedding(e.to_string()))
        })
        .await
        .map_err(|e| SiteKbError::Embedding(format!("embedding task panicked: {e}")))??;

        if vectors.len() != texts.len() {
            return Err(SiteKbError::Embedding(format!(
                "model returned {} vectors for {} texts",
                vectors.len(),
                texts.len()
            )));
        }
        Ok(vectors)
    }
}
