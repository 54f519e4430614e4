//! Local, deterministic feature-hashing embedder.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sitekb_shared::{EmbeddingIdentity, Result, SiteKbError};

use crate::Embedder;

/// Model-name prefix selecting this embedder, e.g. `feature-hash-384`.
pub const MODEL_PREFIX: &str = "feature-hash-";

/// Signed feature hashing of lower-cased alphanumeric tokens, L2-normalized.
///
/// Identical text always yields an identical vector, which keeps indexing and
/// search reproducible without a model download.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dims: usize,
    identity: EmbeddingIdentity,
}

impl HashingEmbedder {
    pub fn new(dims: usize) -> Result<Self> {
        if dims == 0 {
            return Err(SiteKbError::Embedding(
                "feature-hash dimension must be positive".into(),
            ));
        }
        Ok(Self {
            dims,
            identity: EmbeddingIdentity::local(format!("{MODEL_PREFIX}{dims}")),
        })
    }

    /// Parse a `feature-hash-<dims>` model name. `None` for other models.
    pub fn from_model(model: &str) -> Option<Result<Self>> {
        let dims = model.strip_prefix(MODEL_PREFIX)?;
        Some(
            dims.parse::<usize>()
                .map_err(|_| SiteKbError::Embedding(format!("invalid model name '{model}'")))
                .and_then(Self::new),
        )
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dims];

        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.to_lowercase().as_bytes());
            let mut bucket_bytes = [0u8; 8];
            bucket_bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bucket_bytes) % self.dims as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn identity(&self) -> &EmbeddingIdentity {
        &self.identity
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.vectorize(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn l2(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum::<f32>().sqrt()
    }

    #[tokio::test]
    async fn deterministic_and_normalized() {
        let embedder = HashingEmbedder::new(64).unwrap();
        let a = embedder.embed("Rust ownership and borrowing").await.unwrap();
        let b = embedder.embed("rust OWNERSHIP, and borrowing!").await.unwrap();

        assert_eq!(a.len(), 64);
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn empty_text_is_zero_vector() {
        let embedder = HashingEmbedder::new(16).unwrap();
        let v = embedder.embed("  ... ").await.unwrap();
        assert_eq!(v, vec![0.0; 16]);
    }

    #[tokio::test]
    async fn related_text_is_closer() {
        let embedder = HashingEmbedder::new(384).unwrap();
        let doc_rust = embedder
            .embed("rust ownership borrowing lifetimes compiler")
            .await
            .unwrap();
        let doc_garden = embedder
            .embed("tomato garden soil watering sunlight")
            .await
            .unwrap();
        let query = embedder.embed("ownership and lifetimes in rust").await.unwrap();

        assert!(l2(&query, &doc_rust) < l2(&query, &doc_garden));
    }

    #[test]
    fn model_name_parsing() {
        let embedder = HashingEmbedder::from_model("feature-hash-128").unwrap().unwrap();
        assert_eq!(embedder.dims(), 128);
        assert_eq!(embedder.identity().model, "feature-hash-128");
        assert!(!embedder.identity().external);

        assert!(HashingEmbedder::from_model("text-embedding-3-small").is_none());
        assert!(HashingEmbedder::from_model("feature-hash-abc").unwrap().is_err());
        assert!(HashingEmbedder::from_model("feature-hash-0").unwrap().is_err());
    }
}
