use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Embedder, VectorFuture};
use crate::ChatError;
use crate::config::EndpointConfig;

/// Default model for [`OpenAiEmbedder`].
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

/// Embeddings from an OpenAI-compatible `/embeddings` endpoint.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    config: EndpointConfig,
    model: String,
}

impl OpenAiEmbedder {
    pub fn new(config: EndpointConfig) -> Result<Self, ChatError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.timeout)
            .build()
            .map_err(|e| ChatError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            config,
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ChatError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!("Embedding {} text(s) with {}", texts.len(), self.model);

        let resp = self
            .client
            .post(self.config.url("embeddings"))
            .bearer_auth(&self.config.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .map_err(|e| ChatError::transport(format!("request failed: {e}")))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| ChatError::transport(format!("failed to read response: {e}")))?;
        if !status.is_success() {
            return Err(ChatError::upstream(Some(status.as_u16()), body));
        }

        let mut parsed: EmbeddingResponse = serde_json::from_str(&body).map_err(|e| {
            ChatError::upstream(
                Some(status.as_u16()),
                format!("failed to parse embeddings: {e}"),
            )
        })?;
        if parsed.data.len() != texts.len() {
            return Err(ChatError::upstream(
                Some(status.as_u16()),
                format!(
                    "expected {} embeddings, got {}",
                    texts.len(),
                    parsed.data.len()
                ),
            ));
        }
        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

impl Embedder for OpenAiEmbedder {
    fn embed<'a>(&'a self, texts: &'a [String]) -> VectorFuture<'a, Vec<Vec<f32>>> {
        Box::pin(self.request(texts))
    }
}
