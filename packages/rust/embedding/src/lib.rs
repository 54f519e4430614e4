//! Embedding collaborators.
//!
//! An [`Embedder`] turns text into vectors under one fixed
//! [`EmbeddingIdentity`]. The [`EmbedderProvider`] builds the embedder for an
//! identity, which is how search reuses the identity recorded at index time.

mod hashing;
#[cfg(feature = "local-models")]
mod local;
mod openai;

use std::sync::Arc;

use async_trait::async_trait;
use sitekb_shared::{EmbeddingConfig, EmbeddingIdentity, Result, SiteKbError};

pub use hashing::HashingEmbedder;
#[cfg(feature = "local-models")]
pub use local::FastEmbedder;
pub use openai::OpenAiEmbedder;

/// Text → vector under a fixed identity. Must be deterministic for identical
/// input and identity.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn identity(&self) -> &EmbeddingIdentity;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed many texts; output order matches input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }
}

/// Builds embedders for identities.
pub trait EmbedderProvider: Send + Sync {
    /// The identity new knowledge bases are created with.
    fn default_identity(&self) -> EmbeddingIdentity;

    /// An embedder whose [`Embedder::identity`] equals `identity`.
    fn embedder_for(&self, identity: &EmbeddingIdentity) -> Result<Arc<dyn Embedder>>;
}

/// Provider backed by the `[embedding]` config section.
///
/// External identities go to the configured OpenAI-compatible endpoint with
/// any model name. Local `feature-hash-<dims>` identities use the hashing
/// embedder; other local names load a sentence-transformer model when the
/// `local-models` feature is enabled.
#[derive(Debug, Clone, Default)]
pub struct DefaultEmbedderProvider {
    config: EmbeddingConfig,
}

impl DefaultEmbedderProvider {
    pub fn new(config: EmbeddingConfig) -> Self {
        Self { config }
    }
}

impl EmbedderProvider for DefaultEmbedderProvider {
    fn default_identity(&self) -> EmbeddingIdentity {
        if self.config.use_external {
            EmbeddingIdentity::external(&self.config.external_model)
        } else {
            EmbeddingIdentity::local(&self.config.model)
        }
    }

    fn embedder_for(&self, identity: &EmbeddingIdentity) -> Result<Arc<dyn Embedder>> {
        if identity.external {
            return Ok(Arc::new(OpenAiEmbedder::from_config(
                &self.config,
                &identity.model,
            )?));
        }

        if let Some(embedder) = HashingEmbedder::from_model(&identity.model) {
            return Ok(Arc::new(embedder?));
        }
        self.local_model(identity)
    }
}

impl DefaultEmbedderProvider {
    #[cfg(feature = "local-models")]
    fn local_model(&self, identity: &EmbeddingIdentity) -> Result<Arc<dyn Embedder>> {
        let cache_dir = sitekb_shared::AppConfig::resolve_path(&self.config.model_cache_dir);
        match FastEmbedder::from_model(&identity.model, cache_dir) {
            Some(embedder) => Ok(Arc::new(embedder)),
            None => Err(SiteKbError::Embedding(format!(
                "unsupported local embedding model '{}'",
                identity.model
            ))),
        }
    }

    #[cfg(not(feature = "local-models"))]
    fn local_model(&self, identity: &EmbeddingIdentity) -> Result<Arc<dyn Embedder>> {
        Err(SiteKbError::Embedding(format!(
            "unsupported local embedding model '{}' (sentence-transformer models need the \
             `local-models` build feature)",
            identity.model
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_identity_follows_config() {
        let provider = DefaultEmbedderProvider::default();
        assert_eq!(
            provider.default_identity(),
            EmbeddingIdentity::local("feature-hash-384")
        );

        let provider = DefaultEmbedderProvider::new(EmbeddingConfig {
            use_external: true,
            ..EmbeddingConfig::default()
        });
        assert_eq!(
            provider.default_identity(),
            EmbeddingIdentity::external("text-embedding-3-small")
        );
    }

    #[test]
    fn provider_returns_matching_identity() {
        let provider = DefaultEmbedderProvider::default();
        let identity = EmbeddingIdentity::local("feature-hash-32");
        let embedder = provider.embedder_for(&identity).unwrap();
        assert_eq!(embedder.identity(), &identity);
    }

    #[test]
    fn unknown_local_model_is_rejected() {
        let provider = DefaultEmbedderProvider::default();
        let result = provider.embedder_for(&EmbeddingIdentity::local("word2vec-from-1999"));
        assert!(matches!(result, Err(SiteKbError::Embedding(_))));
    }

    #[cfg(feature = "local-models")]
    #[test]
    fn sentence_transformer_names_resolve_locally() {
        let provider = DefaultEmbedderProvider::default();
        let identity = EmbeddingIdentity::local("all-MiniLM-L6-v2");
        let embedder = provider.embedder_for(&identity).unwrap();
        assert_eq!(embedder.identity(), &identity);
    }

    #[cfg(not(feature = "local-models"))]
    #[test]
    fn sentence_transformer_names_need_the_feature() {
        let provider = DefaultEmbedderProvider::default();
        let err = match provider.embedder_for(&EmbeddingIdentity::local("all-MiniLM-L6-v2")) {
            Err(e) => e,
            Ok(_) => panic!("expected an error"),
        };
        assert!(err.to_string().contains("local-models"));
    }

    #[tokio::test]
    async fn default_batch_is_ordered() {
        let embedder = HashingEmbedder::new(8).unwrap();
        let texts = vec!["alpha".to_string(), "beta".to_string()];
        let batch = embedder.embed_batch(&texts).await.unwrap();
        assert_eq!(batch[0], embedder.embed("alpha").await.unwrap());
        assert_eq!(batch[1], embedder.embed("beta").await.unwrap());
    }
}
