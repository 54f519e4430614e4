//! External embedder speaking the OpenAI-compatible `/embeddings` API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sitekb_shared::{EmbeddingConfig, EmbeddingIdentity, Result, SiteKbError, validate_api_key};
use tracing::debug;

use crate::Embedder;

/// Inputs sent per request.
const MAX_INPUTS_PER_REQUEST: usize = 64;

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

pub struct OpenAiEmbedder {
    client: Client,
    api_key: String,
    base_url: String,
    identity: EmbeddingIdentity,
}

impl OpenAiEmbedder {
    pub fn new(
        model: impl Into<String>,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SiteKbError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            identity: EmbeddingIdentity::external(model),
        })
    }

    /// Build from the `[embedding]` config, reading the key from `api_key_env`.
    pub fn from_config(config: &EmbeddingConfig, model: &str) -> Result<Self> {
        let api_key = validate_api_key(config)?;
        Self::new(
            model,
            api_key,
            &config.base_url,
            Duration::from_secs(config.timeout_secs),
        )
    }

    async fn request(&self, input: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.identity.model,
                input,
            })
            .send()
            .await
            .map_err(|e| SiteKbError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SiteKbError::Embedding(format!(
                "provider returned {status}: {body}"
            )));
        }

        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| SiteKbError::Embedding(format!("malformed response: {e}")))?;

        if parsed.data.len() != input.len() {
            return Err(SiteKbError::Embedding(format!(
                "expected {} embeddings, got {}",
                input.len(),
                parsed.data.len()
            )));
        }

        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn identity(&self) -> &EmbeddingIdentity {
        &self.identity
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.request(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| SiteKbError::Embedding("no embedding returned".into()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(MAX_INPUTS_PER_REQUEST) {
            debug!(inputs = chunk.len(), model = %self.identity.model, "embedding request");
            vectors.extend(self.request(chunk).await?);
        }
        Ok(vectors)
    }
}
