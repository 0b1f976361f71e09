//! Hybrid retrieval orchestration.
//!
//! One request fans out per query variant to the dense and sparse backends
//! concurrently, pools the hits flat across variants, and fuses the pools
//! by reciprocal rank. Source failures and timeouts degrade the request
//! instead of failing it; the caller sees what was lost in
//! [`RetrievalOutcome::degradations`].

use std::collections::HashSet;
use std::sync::Arc;

use tokio::time::timeout;
use tracing::debug;
use tracing::warn;

use crate::config::SearchConfig;
use crate::expansion::QueryExpander;
use crate::expansion::QueryVariant;
use crate::fusion::RrfConfig;
use crate::fusion::fuse_pair;
use crate::search::capability::ProbeState;
use crate::search::capability::probe_dense;
use crate::search::capability::probe_sparse;
use crate::traits::DenseCapability;
use crate::traits::DenseRetriever;
use crate::traits::SparseBackend;
use crate::types::Metadata;
use crate::types::RetrievalMethod;
use crate::types::RetrievedItem;
use crate::types::SearchHit;

/// Per-call overrides; unset fields fall back to the search config.
#[derive(Debug, Clone, Default)]
pub struct RetrieveOptions {
    /// Final result budget
    pub top_k: Option<usize>,
    /// Override `enable_sparse`
    pub enable_sparse: Option<bool>,
    /// Override `enable_query_expansion`
    pub enable_query_expansion: Option<bool>,
    /// Parameters forwarded to a `FilteredSearch` dense backend
    pub dense_params: Option<Metadata>,
    /// Sparse score floor
    pub min_sparse_score: Option<f32>,
}

/// What one retrieval request produced.
#[derive(Debug, Clone)]
pub struct RetrievalOutcome {
    pub items: Vec<RetrievedItem>,
    pub method: RetrievalMethod,
    /// Why sources dropped out, empty when every call succeeded. A request
    /// can carry results and degradations at once.
    pub degradations: Vec<String>,
}

/// What one source call produced for one variant.
enum FetchOutcome {
    Fetched(Vec<SearchHit>),
    Degraded(String),
}

/// Configures and probes a [`RetrievalOrchestrator`].
pub struct OrchestratorBuilder {
    dense: Option<Arc<dyn DenseRetriever>>,
    sparse: Option<Arc<dyn SparseBackend>>,
    expander: Option<Arc<QueryExpander>>,
    config: SearchConfig,
}

impl OrchestratorBuilder {
    pub fn new(config: SearchConfig) -> Self {
        Self {
            dense: None,
            sparse: None,
            expander: None,
            config,
        }
    }

    pub fn with_dense(mut self, retriever: Arc<dyn DenseRetriever>) -> Self {
        self.dense = Some(retriever);
        self
    }

    pub fn with_sparse(mut self, backend: Arc<dyn SparseBackend>) -> Self {
        self.sparse = Some(backend);
        self
    }

    pub fn with_expander(mut self, expander: Arc<QueryExpander>) -> Self {
        self.expander = Some(expander);
        self
    }

    /// Probe the wired backends and fix their state for the orchestrator's
    /// lifetime.
    pub async fn build(self) -> RetrievalOrchestrator {
        let (dense_probe, dense_capability) = probe_dense(self.dense.as_ref());
        let sparse_probe = probe_sparse(self.sparse.as_ref()).await;
        RetrievalOrchestrator {
            dense: self.dense,
            sparse: self.sparse,
            expander: self.expander,
            config: self.config,
            dense_probe,
            dense_capability,
            sparse_probe,
        }
    }
}

/// Fans one query out to the wired backends and fuses the results.
pub struct RetrievalOrchestrator {
    dense: Option<Arc<dyn DenseRetriever>>,
    sparse: Option<Arc<dyn SparseBackend>>,
    expander: Option<Arc<QueryExpander>>,
    config: SearchConfig,
    dense_probe: ProbeState,
    dense_capability: DenseCapability,
    sparse_probe: ProbeState,
}

impl RetrievalOrchestrator {
    pub fn builder(config: SearchConfig) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config)
    }

    pub fn dense_probe(&self) -> ProbeState {
        self.dense_probe
    }

    pub fn sparse_probe(&self) -> ProbeState {
        self.sparse_probe
    }

    /// Name of the wired dense backend, if any.
    pub fn dense_name(&self) -> Option<&str> {
        self.dense.as_deref().map(DenseRetriever::name)
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Run one retrieval request.
    ///
    /// Variants run sequentially; within a variant the dense and sparse
    /// calls run concurrently and neither can cancel the other. The sparse
    /// pool is fused with the dense pool when fusion is on and sparse
    /// produced anything; otherwise the dense pool is deduplicated and
    /// returned alone.
    pub async fn retrieve(&self, query: &str, options: &RetrieveOptions) -> RetrievalOutcome {
        let top_k = options
            .top_k
            .unwrap_or(self.config.fused_top_k.max(0) as usize);
        if query.trim().is_empty() {
            return RetrievalOutcome {
                items: Vec::new(),
                method: RetrievalMethod::DenseOnly,
                degradations: Vec::new(),
            };
        }

        let fusion_enabled = self.config.enable_fusion;
        // Sparse hits only enter results through fusion, so a disabled
        // fusion stage makes the sparse calls pointless.
        let sparse_active = fusion_enabled
            && options.enable_sparse.unwrap_or(self.config.enable_sparse)
            && self.sparse_probe.is_available();
        let expansion_active = options
            .enable_query_expansion
            .unwrap_or(self.config.enable_query_expansion);

        let variants: Vec<QueryVariant> = match (&self.expander, expansion_active) {
            (Some(expander), true) => expander.expand_default(query).await,
            _ => vec![QueryVariant::original(query)],
        };
        debug!(variants = variants.len(), "retrieving");

        let mut dense_pool: Vec<SearchHit> = Vec::new();
        let mut sparse_pool: Vec<SearchHit> = Vec::new();
        let mut degradations: Vec<String> = Vec::new();

        for variant in &variants {
            let sparse_call = async {
                if sparse_active {
                    Some(self.fetch_sparse(&variant.text, options).await)
                } else {
                    None
                }
            };
            let (dense_outcome, sparse_outcome) =
                tokio::join!(self.fetch_dense(&variant.text, options), sparse_call);

            absorb(dense_outcome, &mut dense_pool, &mut degradations);
            absorb(sparse_outcome, &mut sparse_pool, &mut degradations);
        }

        if !sparse_pool.is_empty() && fusion_enabled {
            let rrf = RrfConfig {
                k: self.config.rrf_k,
                top_k,
                min_sources: None,
            };
            let items = fuse_pair(
                &dense_pool,
                &sparse_pool,
                self.config.dense_weight,
                self.config.sparse_weight,
                &rrf,
            )
            .into_iter()
            .map(|candidate| RetrievedItem::from_fused(candidate, RetrievalMethod::Hybrid))
            .collect();
            return RetrievalOutcome {
                items,
                method: RetrievalMethod::Hybrid,
                degradations,
            };
        }

        // Dense pool alone: first occurrence wins across variants.
        let mut seen: HashSet<String> = HashSet::new();
        let mut items: Vec<RetrievedItem> = Vec::new();
        for hit in dense_pool {
            if items.len() >= top_k {
                break;
            }
            if !seen.insert(hit.doc_id.clone()) {
                continue;
            }
            let rank = items.len() + 1;
            items.push(RetrievedItem::from_dense_hit(hit, rank));
        }
        RetrievalOutcome {
            items,
            method: RetrievalMethod::DenseOnly,
            degradations,
        }
    }

    /// Dense call for one variant; `None` when no dense backend is wired.
    async fn fetch_dense(&self, query: &str, options: &RetrieveOptions) -> Option<FetchOutcome> {
        let retriever = match (&self.dense, self.dense_probe) {
            (Some(retriever), ProbeState::Available) => retriever,
            _ => return None,
        };
        let top_k = self.config.dense_top_k.max(0) as usize;

        let call = async {
            match (self.dense_capability, &options.dense_params) {
                (DenseCapability::FilteredSearch, Some(params)) => {
                    retriever.search_with_params(query, top_k, params).await
                }
                (DenseCapability::BasicSearch, Some(_)) => {
                    debug!(
                        backend = retriever.name(),
                        "dense backend ignores per-call params"
                    );
                    retriever.search(query, top_k).await
                }
                (_, None) => retriever.search(query, top_k).await,
            }
        };

        let outcome = match timeout(self.config.call_timeout(), call).await {
            Ok(Ok(hits)) => {
                let before = hits.len();
                let valid: Vec<SearchHit> =
                    hits.into_iter().filter(SearchHit::has_identity).collect();
                if valid.len() < before {
                    debug!(
                        backend = retriever.name(),
                        dropped = before - valid.len(),
                        "dropped dense hits without a document id"
                    );
                }
                FetchOutcome::Fetched(valid)
            }
            Ok(Err(error)) => {
                warn!(backend = retriever.name(), error = %error, "dense search failed");
                FetchOutcome::Degraded(format!("dense: {error}"))
            }
            Err(_) => {
                warn!(backend = retriever.name(), "dense search timed out");
                FetchOutcome::Degraded("dense: timed out".to_string())
            }
        };
        Some(outcome)
    }

    /// Sparse call for one variant. The backend is infallible by signature,
    /// so only a timeout can degrade it.
    async fn fetch_sparse(&self, query: &str, options: &RetrieveOptions) -> FetchOutcome {
        let Some(backend) = &self.sparse else {
            return FetchOutcome::Fetched(Vec::new());
        };
        let top_k = self.config.sparse_top_k.max(0) as usize;

        match timeout(
            self.config.call_timeout(),
            backend.search(query, top_k, options.min_sparse_score),
        )
        .await
        {
            Ok(hits) => FetchOutcome::Fetched(hits),
            Err(_) => {
                warn!("sparse search timed out");
                FetchOutcome::Degraded("sparse: timed out".to_string())
            }
        }
    }
}

fn absorb(
    outcome: Option<FetchOutcome>,
    pool: &mut Vec<SearchHit>,
    degradations: &mut Vec<String>,
) {
    match outcome {
        Some(FetchOutcome::Fetched(hits)) => pool.extend(hits),
        Some(FetchOutcome::Degraded(reason)) => degradations.push(reason),
        None => {}
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::error::Result;
    use crate::error::RetrievalErr;
    use crate::index::LexicalSearcher;
    use crate::types::DocumentRecord;
    use crate::types::SOURCE_DENSE;
    use crate::types::SOURCE_SPARSE;

    struct StubDense {
        capability: DenseCapability,
        hits: Vec<SearchHit>,
        failing: bool,
        delay: Option<Duration>,
        basic_calls: AtomicUsize,
        filtered_calls: AtomicUsize,
    }

    impl StubDense {
        fn with_hits(hits: Vec<SearchHit>) -> Self {
            Self {
                capability: DenseCapability::BasicSearch,
                hits,
                failing: false,
                delay: None,
                basic_calls: AtomicUsize::new(0),
                filtered_calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                failing: true,
                ..Self::with_hits(Vec::new())
            }
        }

        fn filtered(hits: Vec<SearchHit>) -> Self {
            Self {
                capability: DenseCapability::FilteredSearch,
                ..Self::with_hits(hits)
            }
        }
    }

    #[async_trait]
    impl DenseRetriever for StubDense {
        fn name(&self) -> &str {
            "stub"
        }

        fn capability(&self) -> DenseCapability {
            self.capability
        }

        async fn search(&self, _query: &str, _top_k: usize) -> Result<Vec<SearchHit>> {
            self.basic_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.failing {
                return Err(RetrievalErr::DenseSearchFailed {
                    backend: "stub".to_string(),
                    cause: "scripted failure".to_string(),
                });
            }
            Ok(self.hits.clone())
        }

        async fn search_with_params(
            &self,
            _query: &str,
            _top_k: usize,
            _params: &serde_json::Map<String, serde_json::Value>,
        ) -> Result<Vec<SearchHit>> {
            self.filtered_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.hits.clone())
        }
    }

    async fn make_sparse_corpus() -> Arc<LexicalSearcher> {
        let searcher = LexicalSearcher::default();
        searcher
            .index_documents(&[
                DocumentRecord::new("shared", "cats and dogs live together"),
                DocumentRecord::new("sparse_only", "dogs bark at cats loudly"),
            ])
            .await
            .unwrap();
        Arc::new(searcher)
    }

    async fn make_orchestrator(
        dense: Option<StubDense>,
        sparse: Option<Arc<LexicalSearcher>>,
    ) -> RetrievalOrchestrator {
        let mut builder = RetrievalOrchestrator::builder(SearchConfig::default());
        if let Some(dense) = dense {
            builder = builder.with_dense(Arc::new(dense));
        }
        if let Some(sparse) = sparse {
            builder = builder.with_sparse(sparse);
        }
        builder.build().await
    }

    #[tokio::test]
    async fn test_empty_query_yields_empty_outcome() {
        let orchestrator =
            make_orchestrator(None, Some(make_sparse_corpus().await)).await;
        let outcome = orchestrator.retrieve("   ", &RetrieveOptions::default()).await;
        assert!(outcome.items.is_empty());
        assert!(outcome.degradations.is_empty());
    }

    #[tokio::test]
    async fn test_hybrid_fuses_dense_and_sparse() {
        let dense = StubDense::with_hits(vec![
            SearchHit::new("shared", "cats and dogs live together", 0.9),
            SearchHit::new("dense_only", "embedding neighbor", 0.8),
        ]);
        let orchestrator =
            make_orchestrator(Some(dense), Some(make_sparse_corpus().await)).await;

        let outcome = orchestrator
            .retrieve("cats", &RetrieveOptions::default())
            .await;

        assert_eq!(outcome.method, RetrievalMethod::Hybrid);
        assert!(outcome.degradations.is_empty());
        // The document both sources agree on wins.
        assert_eq!(outcome.items[0].doc_id, "shared");
        assert_eq!(
            outcome.items[0].sources,
            vec![SOURCE_DENSE.to_string(), SOURCE_SPARSE.to_string()]
        );
        assert_eq!(outcome.items[0].dense_rank, Some(1));
        assert!(outcome.items[0].sparse_score.is_some());
        assert_eq!(outcome.items[0].retrieval_method, RetrievalMethod::Hybrid);
    }

    #[tokio::test]
    async fn test_dense_failure_keeps_sparse_results() {
        let orchestrator =
            make_orchestrator(Some(StubDense::failing()), Some(make_sparse_corpus().await))
                .await;

        let outcome = orchestrator
            .retrieve("cats", &RetrieveOptions::default())
            .await;

        assert_eq!(outcome.method, RetrievalMethod::Hybrid);
        assert_eq!(outcome.degradations.len(), 1);
        assert!(outcome.degradations[0].contains("dense"));
        assert!(!outcome.items.is_empty());
        for item in &outcome.items {
            assert_eq!(item.sources, vec![SOURCE_SPARSE.to_string()]);
        }
    }

    #[tokio::test]
    async fn test_empty_sparse_pool_gives_dense_only() {
        let dense = StubDense::with_hits(vec![
            SearchHit::new("a", "first", 0.9),
            SearchHit::new("a", "first again", 0.8),
            SearchHit::new("b", "second", 0.7),
        ]);
        // Available but unindexed: sparse searches come back empty.
        let orchestrator =
            make_orchestrator(Some(dense), Some(Arc::new(LexicalSearcher::default()))).await;

        let outcome = orchestrator
            .retrieve("cats", &RetrieveOptions::default())
            .await;

        assert_eq!(outcome.method, RetrievalMethod::DenseOnly);
        let ids: Vec<&str> = outcome.items.iter().map(|i| i.doc_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(outcome.items[0].dense_rank, Some(1));
    }

    #[tokio::test]
    async fn test_sparse_disabled_per_call() {
        let dense = StubDense::with_hits(vec![SearchHit::new("a", "first", 0.9)]);
        let orchestrator =
            make_orchestrator(Some(dense), Some(make_sparse_corpus().await)).await;

        let options = RetrieveOptions {
            enable_sparse: Some(false),
            ..RetrieveOptions::default()
        };
        let outcome = orchestrator.retrieve("cats", &options).await;
        assert_eq!(outcome.method, RetrievalMethod::DenseOnly);
    }

    #[tokio::test]
    async fn test_sparse_only_still_fuses() {
        let orchestrator = make_orchestrator(None, Some(make_sparse_corpus().await)).await;

        let outcome = orchestrator
            .retrieve("cats", &RetrieveOptions::default())
            .await;

        assert_eq!(outcome.method, RetrievalMethod::Hybrid);
        assert!(outcome.degradations.is_empty());
        assert!(!outcome.items.is_empty());
        assert!(outcome.items[0].dense_score.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dense_timeout_degrades() {
        let mut dense = StubDense::with_hits(vec![SearchHit::new("a", "late", 0.9)]);
        dense.delay = Some(Duration::from_secs(60));
        let orchestrator =
            make_orchestrator(Some(dense), Some(make_sparse_corpus().await)).await;

        let outcome = orchestrator
            .retrieve("cats", &RetrieveOptions::default())
            .await;

        assert_eq!(outcome.degradations, vec!["dense: timed out".to_string()]);
        // Sparse results survive the dense timeout.
        assert!(!outcome.items.is_empty());
    }

    #[tokio::test]
    async fn test_params_use_filtered_entry_point() {
        let dense = Arc::new(StubDense::filtered(vec![SearchHit::new("a", "first", 0.9)]));
        let orchestrator = RetrievalOrchestrator::builder(SearchConfig::default())
            .with_dense(dense.clone())
            .build()
            .await;

        let mut params = Metadata::new();
        params.insert("domain".to_string(), serde_json::json!("legal"));
        let options = RetrieveOptions {
            dense_params: Some(params),
            ..RetrieveOptions::default()
        };
        orchestrator.retrieve("cats", &options).await;

        assert_eq!(dense.filtered_calls.load(Ordering::SeqCst), 1);
        assert_eq!(dense.basic_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_basic_backend_ignores_params() {
        let dense = Arc::new(StubDense::with_hits(vec![SearchHit::new("a", "first", 0.9)]));
        let orchestrator = RetrievalOrchestrator::builder(SearchConfig::default())
            .with_dense(dense.clone())
            .build()
            .await;

        let mut params = Metadata::new();
        params.insert("domain".to_string(), serde_json::json!("legal"));
        let options = RetrieveOptions {
            dense_params: Some(params),
            ..RetrieveOptions::default()
        };
        orchestrator.retrieve("cats", &options).await;

        assert_eq!(dense.basic_calls.load(Ordering::SeqCst), 1);
        assert_eq!(dense.filtered_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dense_hits_without_id_are_dropped() {
        let dense = StubDense::with_hits(vec![
            SearchHit::new("", "orphan", 0.9),
            SearchHit::new("a", "kept", 0.8),
        ]);
        let orchestrator = make_orchestrator(Some(dense), None).await;

        let outcome = orchestrator
            .retrieve("cats", &RetrieveOptions::default())
            .await;

        assert_eq!(outcome.items.len(), 1);
        assert_eq!(outcome.items[0].doc_id, "a");
    }

    #[tokio::test]
    async fn test_top_k_override() {
        let orchestrator = make_orchestrator(None, Some(make_sparse_corpus().await)).await;
        let options = RetrieveOptions {
            top_k: Some(1),
            ..RetrieveOptions::default()
        };
        let outcome = orchestrator.retrieve("cats dogs", &options).await;
        assert_eq!(outcome.items.len(), 1);
    }
}
