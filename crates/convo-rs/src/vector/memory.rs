use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use super::{Document, Embedder, ScoredDocument, SearchRequest, VectorFuture, VectorStore};
use crate::ChatError;

struct Entry {
    document: Document,
    embedding: Vec<f32>,
}

/// Brute-force store: every search scores every document.
///
/// Documents are embedded once on [`add`](VectorStore::add). Adding a
/// document whose id already exists replaces it in place.
pub struct InMemoryVectorStore {
    embedder: Arc<dyn Embedder>,
    entries: RwLock<Vec<Entry>>,
}

impl InMemoryVectorStore {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            entries: RwLock::new(Vec::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    async fn insert(&self, documents: Vec<Document>) -> Result<(), ChatError> {
        if documents.is_empty() {
            return Ok(());
        }
        let texts: Vec<String> = documents.iter().map(|d| d.text.clone()).collect();
        let embeddings = self.embedder.embed(&texts).await?;
        if embeddings.len() != documents.len() {
            return Err(ChatError::vector_store(format!(
                "embedder returned {} vectors for {} documents",
                embeddings.len(),
                documents.len()
            )));
        }

        let mut entries = self.entries.write().await;
        for (document, embedding) in documents.into_iter().zip(embeddings) {
            match entries.iter_mut().find(|e| e.document.id == document.id) {
                Some(existing) => {
                    existing.document = document;
                    existing.embedding = embedding;
                }
                None => entries.push(Entry {
                    document,
                    embedding,
                }),
            }
        }
        debug!("Vector store now holds {} document(s)", entries.len());
        Ok(())
    }

    async fn search(&self, request: &SearchRequest) -> Result<Vec<ScoredDocument>, ChatError> {
        if request.top_k == 0 {
            return Ok(Vec::new());
        }
        let query = self
            .embedder
            .embed(std::slice::from_ref(&request.query))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ChatError::vector_store("embedder returned no query vector"))?;

        let entries = self.entries.read().await;
        let mut scored: Vec<ScoredDocument> = entries
            .iter()
            .map(|e| ScoredDocument {
                document: e.document.clone(),
                score: cosine_similarity(&query, &e.embedding),
            })
            .filter(|hit| hit.score >= request.similarity_threshold)
            .collect();

        // Stable sort keeps insertion order among equal scores.
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(request.top_k);

        debug!(
            "Similarity search '{}' -> {} hit(s) of {}",
            request.query,
            scored.len(),
            entries.len()
        );
        Ok(scored)
    }

    async fn remove(&self, ids: &[String]) -> Result<(), ChatError> {
        self.entries
            .write()
            .await
            .retain(|e| !ids.contains(&e.document.id));
        Ok(())
    }
}

impl VectorStore for InMemoryVectorStore {
    fn add(&self, documents: Vec<Document>) -> VectorFuture<'_, ()> {
        Box::pin(self.insert(documents))
    }

    fn similarity_search<'a>(
        &'a self,
        request: &'a SearchRequest,
    ) -> VectorFuture<'a, Vec<ScoredDocument>> {
        Box::pin(self.search(request))
    }

    fn delete<'a>(&'a self, ids: &'a [String]) -> VectorFuture<'a, ()> {
        Box::pin(self.remove(ids))
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Bag-of-keywords embedding: one dimension per keyword.
    struct KeywordEmbedder(&'static [&'static str]);

    impl Embedder for KeywordEmbedder {
        fn embed<'a>(&'a self, texts: &'a [String]) -> VectorFuture<'a, Vec<Vec<f32>>> {
            Box::pin(async move {
                Ok(texts
                    .iter()
                    .map(|t| {
                        let lower = t.to_lowercase();
                        self.0
                            .iter()
                            .map(|k| if lower.contains(k) { 1.0 } else { 0.0 })
                            .collect()
                    })
                    .collect())
            })
        }
    }

    fn store() -> InMemoryVectorStore {
        InMemoryVectorStore::new(Arc::new(KeywordEmbedder(&["andrew", "engineer", "pirate"])))
    }

    #[test]
    fn cosine_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn search_orders_by_descending_score() {
        let store = store();
        store
            .add(vec![
                Document::with_id("1", "Pirates sail the seas"),
                Document::with_id("2", "Andrew is a software engineer"),
                Document::with_id("3", "Andrew likes pirates"),
            ])
            .await
            .unwrap();

        let hits = store
            .similarity_search(&SearchRequest::query("who is andrew the engineer?").with_top_k(5))
            .await
            .unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.document.id.as_str()).collect();
        assert_eq!(ids, vec!["2", "3", "1"]);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test]
    async fn top_k_and_threshold_limit_results() {
        let store = store();
        store
            .add(vec![
                Document::with_id("1", "andrew"),
                Document::with_id("2", "andrew engineer"),
                Document::with_id("3", "nothing relevant"),
            ])
            .await
            .unwrap();

        let hits = store
            .similarity_search(&SearchRequest::query("andrew").with_top_k(1))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document.id, "1");

        let hits = store
            .similarity_search(&SearchRequest::query("andrew").with_similarity_threshold(0.5))
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn equal_scores_keep_insertion_order() {
        let store = store();
        store
            .add(vec![
                Document::with_id("a", "pirate one"),
                Document::with_id("b", "pirate two"),
            ])
            .await
            .unwrap();
        let hits = store
            .similarity_search(&SearchRequest::query("pirate"))
            .await
            .unwrap();
        assert_eq!(hits[0].document.id, "a");
        assert_eq!(hits[1].document.id, "b");
    }

    #[tokio::test]
    async fn re_adding_id_replaces_and_delete_removes() {
        let store = store();
        store
            .add(vec![Document::with_id("x", "pirate")])
            .await
            .unwrap();
        store
            .add(vec![Document::with_id("x", "andrew")])
            .await
            .unwrap();
        assert_eq!(store.len().await, 1);

        let hits = store
            .similarity_search(&SearchRequest::query("andrew"))
            .await
            .unwrap();
        assert_eq!(hits[0].text(), "andrew");

        store.delete(&["x".to_string()]).await.unwrap();
        assert!(store.is_empty().await);
    }
}
