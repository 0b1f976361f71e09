//! Shared-handle sparse searcher backed by [`LexicalIndex`].

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::config::LexicalConfig;
use crate::error::Result;
use crate::index::lexical::Aggregation;
use crate::index::lexical::LexicalIndex;
use crate::traits::SparseBackend;
use crate::types::DocumentRecord;
use crate::types::SearchHit;

/// Point-in-time shape of the index, for status reporting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexStats {
    pub documents: usize,
    pub terms: usize,
    pub avg_doc_len: f32,
}

/// Concurrency wrapper that lets many readers search while a writer
/// swaps the corpus.
#[derive(Clone)]
pub struct LexicalSearcher {
    index: Arc<RwLock<LexicalIndex>>,
}

impl LexicalSearcher {
    pub fn new(config: &LexicalConfig) -> Self {
        Self::from_index(LexicalIndex::new(config))
    }

    pub fn from_index(index: LexicalIndex) -> Self {
        Self {
            index: Arc::new(RwLock::new(index)),
        }
    }

    /// Rebuild the corpus and drop cached query results in one step.
    ///
    /// This is the convenience path; [`SparseBackend::index_documents`]
    /// alone leaves the query cache intact.
    pub async fn reindex(&self, documents: &[DocumentRecord]) -> usize {
        let mut index = self.index.write().await;
        let count = index.index(documents);
        index.clear_query_cache();
        count
    }

    /// Drop cached query results without touching the corpus.
    pub async fn clear_query_cache(&self) {
        self.index.read().await.clear_query_cache();
    }

    /// Score each variant independently and aggregate per document.
    pub async fn search_multi(
        &self,
        queries: &[String],
        top_k: usize,
        min_score: Option<f32>,
        aggregation: Aggregation,
    ) -> Vec<SearchHit> {
        self.index
            .read()
            .await
            .retrieve_multi_query(queries, top_k, min_score, aggregation)
    }

    pub async fn stats(&self) -> IndexStats {
        let index = self.index.read().await;
        IndexStats {
            documents: index.doc_count(),
            terms: index.term_count(),
            avg_doc_len: index.avg_doc_len(),
        }
    }
}

impl Default for LexicalSearcher {
    fn default() -> Self {
        Self::new(&LexicalConfig::default())
    }
}

#[async_trait]
impl SparseBackend for LexicalSearcher {
    async fn is_available(&self) -> bool {
        true
    }

    async fn is_indexed(&self) -> bool {
        !self.index.read().await.is_empty()
    }

    async fn index_documents(&self, documents: &[DocumentRecord]) -> Result<usize> {
        Ok(self.index.write().await.index(documents))
    }

    async fn search(&self, query: &str, top_k: usize, min_score: Option<f32>) -> Vec<SearchHit> {
        self.index.read().await.retrieve(query, top_k, min_score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_corpus() -> Vec<DocumentRecord> {
        vec![
            DocumentRecord::new("a", "cats and dogs"),
            DocumentRecord::new("b", "dogs only"),
        ]
    }

    #[tokio::test]
    async fn test_index_then_search() {
        let searcher = LexicalSearcher::default();
        assert!(!searcher.is_indexed().await);

        let count = searcher.index_documents(&make_corpus()).await.unwrap();
        assert_eq!(count, 2);
        assert!(searcher.is_indexed().await);

        let hits = searcher.search("cats", 10, None).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc_id, "a");
    }

    #[tokio::test]
    async fn test_reindex_clears_query_cache() {
        let searcher = LexicalSearcher::default();
        searcher.index_documents(&make_corpus()).await.unwrap();
        assert_eq!(searcher.search("cats", 10, None).await.len(), 1);

        let count = searcher
            .reindex(&[DocumentRecord::new("c", "birds fly south")])
            .await;
        assert_eq!(count, 1);
        assert!(searcher.search("cats", 10, None).await.is_empty());
        assert_eq!(searcher.search("birds", 10, None).await.len(), 1);
    }

    #[tokio::test]
    async fn test_usable_as_trait_object() {
        let searcher: Arc<dyn SparseBackend> = Arc::new(LexicalSearcher::default());
        assert!(searcher.is_available().await);
        searcher.index_documents(&make_corpus()).await.unwrap();
        assert_eq!(searcher.search("dogs", 10, None).await.len(), 2);
    }

    #[tokio::test]
    async fn test_stats_reflect_corpus() {
        let searcher = LexicalSearcher::default();
        searcher.index_documents(&make_corpus()).await.unwrap();

        let stats = searcher.stats().await;
        assert_eq!(stats.documents, 2);
        assert!(stats.terms >= 4);
        assert!((stats.avg_doc_len - 2.5).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_multi_query_through_searcher() {
        let searcher = LexicalSearcher::default();
        searcher.index_documents(&make_corpus()).await.unwrap();

        let queries = vec!["cats".to_string(), "dogs".to_string()];
        let hits = searcher
            .search_multi(&queries, 10, None, Aggregation::Max)
            .await;
        assert_eq!(hits.len(), 2);
    }
}
