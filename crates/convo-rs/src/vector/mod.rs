//! Vector store seam used for retrieval augmentation.
//!
//! The crate does not implement a vector database. [`VectorStore`] is the
//! narrow interface a backend has to offer; [`memory::InMemoryVectorStore`]
//! is a brute-force reference backend for tests and small corpora, and
//! [`openai::OpenAiEmbedder`] produces embeddings over HTTP.

pub mod memory;
pub mod openai;

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ChatError;

pub use memory::InMemoryVectorStore;
pub use openai::OpenAiEmbedder;

/// Boxed future returned by [`VectorStore`] and [`Embedder`] methods.
pub type VectorFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ChatError>> + Send + 'a>>;

/// A piece of text stored for similarity search.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Document {
    pub id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl Document {
    /// A document with a fresh random id and no metadata.
    pub fn new(text: impl Into<String>) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), text)
    }

    pub fn with_id(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Parameters of a similarity search.
#[derive(Clone, Debug, PartialEq)]
pub struct SearchRequest {
    pub query: String,
    pub top_k: usize,
    /// Minimum score a hit must reach. `0.0` accepts everything with
    /// non-negative similarity.
    pub similarity_threshold: f32,
}

impl SearchRequest {
    pub const DEFAULT_TOP_K: usize = 4;

    pub fn query(text: impl Into<String>) -> Self {
        Self {
            query: text.into(),
            top_k: Self::DEFAULT_TOP_K,
            similarity_threshold: 0.0,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_similarity_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = threshold;
        self
    }
}

/// A search hit.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ScoredDocument {
    pub document: Document,
    pub score: f32,
}

impl ScoredDocument {
    pub fn text(&self) -> &str {
        &self.document.text
    }
}

/// A store of documents searchable by semantic similarity.
pub trait VectorStore: Send + Sync {
    fn add(&self, documents: Vec<Document>) -> VectorFuture<'_, ()>;

    /// Hits ordered by descending score, at most `request.top_k` of them.
    fn similarity_search<'a>(
        &'a self,
        request: &'a SearchRequest,
    ) -> VectorFuture<'a, Vec<ScoredDocument>>;

    /// Remove documents by id. Unknown ids are ignored.
    fn delete<'a>(&'a self, ids: &'a [String]) -> VectorFuture<'a, ()>;
}

/// Turns texts into embedding vectors, one per input, in input order.
pub trait Embedder: Send + Sync {
    fn embed<'a>(&'a self, texts: &'a [String]) -> VectorFuture<'a, Vec<Vec<f32>>>;
}
