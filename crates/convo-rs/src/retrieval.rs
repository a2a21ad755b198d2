//! Retrieval augmentation: ground the user message in documents pulled from
//! a [`VectorStore`].

use std::sync::Arc;

use tracing::debug;

use crate::ChatError;
use crate::vector::{ScoredDocument, SearchRequest, VectorStore};

const CONTEXT_FENCE: &str = "---------------------";

/// Appends similar documents to the user message before it is sent.
#[derive(Clone)]
pub struct RetrievalAugmenter {
    store: Arc<dyn VectorStore>,
    top_k: usize,
    similarity_threshold: f32,
}

impl RetrievalAugmenter {
    pub fn new(store: Arc<dyn VectorStore>) -> Self {
        Self {
            store,
            top_k: SearchRequest::DEFAULT_TOP_K,
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

    /// Documents relevant to `user_text`, best first.
    pub async fn retrieve(&self, user_text: &str) -> Result<Vec<ScoredDocument>, ChatError> {
        let request = SearchRequest::query(user_text)
            .with_top_k(self.top_k)
            .with_similarity_threshold(self.similarity_threshold);
        self.store.similarity_search(&request).await
    }

    /// `user_text` followed by a context block of retrieved documents, or
    /// `user_text` unchanged when nothing relevant was found.
    pub async fn augment(&self, user_text: &str) -> Result<String, ChatError> {
        let hits = self.retrieve(user_text).await?;
        debug!("Retrieved {} document(s) for prompt context", hits.len());
        Ok(with_context(user_text, &hits))
    }
}

fn with_context(user_text: &str, hits: &[ScoredDocument]) -> String {
    if hits.is_empty() {
        return user_text.to_string();
    }
    let context = hits
        .iter()
        .map(ScoredDocument::text)
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "{user_text}\n\n\
         Context information is below.\n\
         {CONTEXT_FENCE}\n\
         {context}\n\
         {CONTEXT_FENCE}\n\
         Answer using the context above and the conversation so far. \
         If the context does not contain the answer, say that you cannot answer."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::{Document, Embedder, InMemoryVectorStore, VectorFuture};

    struct MentionEmbedder;

    impl Embedder for MentionEmbedder {
        fn embed<'a>(&'a self, texts: &'a [String]) -> VectorFuture<'a, Vec<Vec<f32>>> {
            Box::pin(async move {
                Ok(texts
                    .iter()
                    .map(|t| vec![1.0, if t.contains("andrew") { 1.0 } else { 0.0 }])
                    .collect())
            })
        }
    }

    fn store() -> Arc<InMemoryVectorStore> {
        Arc::new(InMemoryVectorStore::new(Arc::new(MentionEmbedder)))
    }

    #[tokio::test]
    async fn augment_appends_context_block() {
        let store = store();
        store
            .add(vec![Document::new(
                "My name is andrew, and my job is software engineer",
            )])
            .await
            .unwrap();

        let augmenter = RetrievalAugmenter::new(store);
        let text = augmenter.augment("who is andrew?").await.unwrap();
        assert!(text.starts_with("who is andrew?\n\n"));
        assert!(text.contains("my job is software engineer"));
        assert_eq!(text.matches(CONTEXT_FENCE).count(), 2);
    }

    #[tokio::test]
    async fn no_hits_leaves_text_unchanged() {
        let augmenter = RetrievalAugmenter::new(store());
        assert_eq!(
            augmenter.augment("who is andrew?").await.unwrap(),
            "who is andrew?"
        );
    }

    #[tokio::test]
    async fn threshold_filters_weak_hits() {
        let store = store();
        store
            .add(vec![Document::new("unrelated text")])
            .await
            .unwrap();
        let augmenter = RetrievalAugmenter::new(store).with_similarity_threshold(0.99);
        assert!(augmenter.retrieve("andrew").await.unwrap().is_empty());
    }
}
