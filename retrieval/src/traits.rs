//! Collaborator capabilities consumed by the pipeline.
//!
//! Dense retrieval, corpus indexing, text generation, and relevance scoring
//! are external services. The pipeline depends on these traits only; the
//! crate ships a lexical `SparseBackend` and an HTTP `TextGenerator`, the
//! rest are wired in by the caller.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::DocumentRecord;
use crate::types::SearchHit;

/// Which retrieval entry points a dense backend exposes.
///
/// Backends report their newest supported entry point; the orchestrator
/// resolves this once at construction and never re-probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenseCapability {
    /// `search_with_params` is supported (filters, per-call overrides).
    FilteredSearch,
    /// Only the plain `search` call is supported.
    BasicSearch,
}

/// Embedding-based document retrieval.
#[async_trait]
pub trait DenseRetriever: Send + Sync {
    /// Backend name for diagnostics and `meta.backend`.
    fn name(&self) -> &str;

    /// Newest entry point this backend supports.
    fn capability(&self) -> DenseCapability {
        DenseCapability::BasicSearch
    }

    /// Similarity search for the query's nearest documents.
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>>;

    /// Similarity search with per-call parameters (filters, namespaces).
    ///
    /// The default implementation ignores `params` and delegates to
    /// [`DenseRetriever::search`], so `BasicSearch` backends implement one
    /// method.
    async fn search_with_params(
        &self,
        query: &str,
        top_k: usize,
        _params: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Vec<SearchHit>> {
        self.search(query, top_k).await
    }
}

/// Lexical term-matching retrieval over an indexed corpus.
///
/// Retrieval is infallible by signature: an unavailable backend or an empty
/// index is a normal degraded mode and yields an empty result set.
#[async_trait]
pub trait SparseBackend: Send + Sync {
    /// Whether the backend is usable at all.
    async fn is_available(&self) -> bool;

    /// Whether a corpus has been indexed.
    async fn is_indexed(&self) -> bool;

    /// Replace the corpus wholesale. Returns the number of documents indexed.
    async fn index_documents(&self, documents: &[DocumentRecord]) -> Result<usize>;

    /// Lexical search; empty when unavailable, unindexed, or nothing matches.
    async fn search(&self, query: &str, top_k: usize, min_score: Option<f32>) -> Vec<SearchHit>;
}

/// Parameters for one text-generation call.
#[derive(Debug, Clone)]
pub struct GenerationParams {
    /// Model identifier understood by the backend
    pub model: String,
    /// Sampling temperature
    pub temperature: f32,
    /// Completion budget in tokens
    pub max_tokens: i32,
    /// Hard deadline for the call
    pub timeout: Duration,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.3,
            max_tokens: 200,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Prompt-in, text-out generation service (query reformulation).
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate a completion for the prompt.
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String>;
}

/// Joint (query, passage) relevance scoring for short candidate lists.
#[async_trait]
pub trait RelevanceScorer: Send + Sync {
    /// Whether the scorer is ready to take batches.
    async fn is_available(&self) -> bool;

    /// Score every span against the query in one batched call.
    ///
    /// Must return exactly one score per input span, in input order.
    async fn score_batch(&self, query: &str, spans: &[String]) -> Result<Vec<f32>>;
}
