//! Context assembly over the retrieval pipeline.
//!
//! [`ContextBuilder`] is the subsystem's front door: it runs hybrid
//! retrieval, falls back to a direct single-backend call when the
//! orchestrated request produced nothing but degradations, re-ranks when
//! enabled, and normalizes everything into a [`ContextBundle`]. The ladder
//! is hybrid, then direct dense, then direct sparse; only when every rung
//! fails does a query surface [`RetrievalErr::PipelineExhausted`].

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use tokio::time::timeout;
use tracing::info;
use tracing::warn;

use crate::config::RetrievalConfig;
use crate::error::Result;
use crate::error::RetrievalErr;
use crate::expansion::QueryExpander;
use crate::fusion::RrfConfig;
use crate::fusion::fuse_pair;
use crate::rerank::PrecisionReranker;
use crate::rerank::truncate_chars;
use crate::search::OrchestratorBuilder;
use crate::search::RetrievalOrchestrator;
use crate::search::RetrieveOptions;
use crate::traits::DenseRetriever;
use crate::traits::RelevanceScorer;
use crate::traits::SparseBackend;
use crate::traits::TextGenerator;
use crate::types::Metadata;
use crate::types::RetrievalMethod;
use crate::types::RetrievedItem;
use crate::types::SOURCE_DENSE;
use crate::types::SOURCE_SPARSE;

/// Snippet length when a document carries no snippet of its own.
const SNIPPET_CHARS: usize = 240;

/// Caller-supplied retrieval hints.
///
/// Hints narrow what a capable dense backend searches; backends that only
/// support basic search ignore them. They never filter sparse results.
#[derive(Debug, Clone, Default)]
pub struct QueryHints {
    /// Domain labels the caller wants results restricted to
    pub domain_tags: Vec<String>,
    /// Backend-specific parameters forwarded untouched
    pub extra_params: Metadata,
}

impl QueryHints {
    /// Collapse the hints into dense search parameters.
    ///
    /// Returns `None` when there is nothing to forward, so a hint-free
    /// call stays on the basic search entry point.
    pub fn to_dense_params(&self) -> Option<Metadata> {
        if self.domain_tags.is_empty() && self.extra_params.is_empty() {
            return None;
        }
        let mut params = self.extra_params.clone();
        if !self.domain_tags.is_empty() {
            params.insert(
                "domain_tags".to_string(),
                Value::Array(
                    self.domain_tags
                        .iter()
                        .map(|tag| Value::String(tag.clone()))
                        .collect(),
                ),
            );
        }
        Some(params)
    }
}

/// Per-call overrides for `build_context`; unset fields fall back to the
/// loaded configuration.
#[derive(Debug, Clone, Default)]
pub struct ContextOptions {
    /// Final document budget
    pub top_k: Option<usize>,
    /// Override `search.enable_sparse`
    pub enable_sparse: Option<bool>,
    /// Override `search.enable_query_expansion`
    pub enable_query_expansion: Option<bool>,
    /// Override `rerank.enable_reranking`
    pub enable_reranking: Option<bool>,
    /// Sparse score floor
    pub min_sparse_score: Option<f32>,
}

/// The assembled context for one query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextBundle {
    /// Retrieved documents, best first
    pub documents: Vec<ContextDocument>,
    /// Raw match detail behind `documents`
    pub vector: VectorSection,
    /// Reserved section, always an empty object
    #[serde(default)]
    pub graph: serde_json::Map<String, Value>,
    /// Reserved section, always an empty object
    #[serde(default)]
    pub relational: serde_json::Map<String, Value>,
    /// How this bundle was produced
    pub meta: ContextMeta,
}

/// One document in the assembled context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextDocument {
    pub id: String,
    /// Display title; the document id when the backend supplied none
    pub title: String,
    /// Short excerpt; derived from content when the backend supplied none
    pub snippet: String,
    /// Score normalized to [0, 1] against the best match in the bundle
    pub relevance: f32,
    /// Contributing sources joined with `+`, e.g. `dense+sparse`
    pub source: String,
    /// Domain labels carried by the document
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub domain_tags: Vec<String>,
    /// Remaining backend fields, flattened in place
    #[serde(flatten)]
    pub extra: Metadata,
}

/// Match-level detail for the bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorSection {
    pub matches: Vec<VectorMatch>,
    pub statistics: VectorStatistics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorMatch {
    pub doc_id: String,
    /// Raw pipeline score before normalization
    pub score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dense_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sparse_score: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStatistics {
    pub total_matches: usize,
    pub max_score: f32,
    /// Sources that contributed at least one match, sorted
    pub sources: Vec<String>,
}

/// Provenance and mode flags for one `build_context` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextMeta {
    pub query_text: String,
    /// `hybrid`, `sparse`, the dense backend's name, or `none`
    pub backend: String,
    /// A direct single-backend call served this bundle
    pub fallback_used: bool,
    /// Rank fusion produced the result list
    pub hybrid_applied: bool,
    /// The relevance scorer re-ordered the result list
    pub reranking_applied: bool,
    pub duration_ms: u64,
    pub result_summary: String,
}

/// Wires backends into a [`ContextBuilder`].
///
/// Every collaborator is optional. A builder with no backends still
/// produces a working `ContextBuilder`; its bundles are just empty.
pub struct PipelineBuilder {
    config: RetrievalConfig,
    dense: Option<Arc<dyn DenseRetriever>>,
    sparse: Option<Arc<dyn SparseBackend>>,
    generator: Option<Arc<dyn TextGenerator>>,
    scorer: Option<Arc<dyn RelevanceScorer>>,
}

impl PipelineBuilder {
    pub fn new(config: RetrievalConfig) -> Self {
        Self {
            config,
            dense: None,
            sparse: None,
            generator: None,
            scorer: None,
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

    pub fn with_generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn RelevanceScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    /// Probe the wired backends and assemble the builder.
    pub async fn build(self) -> ContextBuilder {
        let expander = self.generator.map(|generator| {
            Arc::new(
                QueryExpander::new(generator, &self.config.expansion)
                    .with_generation_params(self.config.generation.params()),
            )
        });

        let mut orchestrator = OrchestratorBuilder::new(self.config.search.clone());
        if let Some(dense) = &self.dense {
            orchestrator = orchestrator.with_dense(Arc::clone(dense));
        }
        if let Some(sparse) = &self.sparse {
            orchestrator = orchestrator.with_sparse(Arc::clone(sparse));
        }
        if let Some(expander) = expander {
            orchestrator = orchestrator.with_expander(expander);
        }
        let orchestrator = orchestrator.build().await;

        let reranker = PrecisionReranker::new(self.scorer, &self.config.rerank);

        ContextBuilder {
            orchestrator,
            dense: self.dense,
            sparse: self.sparse,
            reranker,
            config: self.config,
        }
    }
}

/// Assembles retrieval results into context bundles.
pub struct ContextBuilder {
    orchestrator: RetrievalOrchestrator,
    dense: Option<Arc<dyn DenseRetriever>>,
    sparse: Option<Arc<dyn SparseBackend>>,
    reranker: PrecisionReranker,
    config: RetrievalConfig,
}

impl ContextBuilder {
    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    pub fn orchestrator(&self) -> &RetrievalOrchestrator {
        &self.orchestrator
    }

    /// Build the context bundle for one query.
    ///
    /// Degraded sources and empty results are normal outcomes; the only
    /// error this returns is [`RetrievalErr::PipelineExhausted`], raised
    /// when the hybrid path degraded to nothing and no direct backend
    /// call could serve the query either.
    pub async fn build_context(
        &self,
        query: &str,
        hints: &QueryHints,
        options: &ContextOptions,
    ) -> Result<ContextBundle> {
        let started = Instant::now();
        let top_k = options
            .top_k
            .unwrap_or(self.config.search.fused_top_k.max(0) as usize);

        let retrieve_options = RetrieveOptions {
            top_k: Some(top_k),
            enable_sparse: options.enable_sparse,
            enable_query_expansion: options.enable_query_expansion,
            dense_params: hints.to_dense_params(),
            min_sparse_score: options.min_sparse_score,
        };
        let outcome = self.orchestrator.retrieve(query, &retrieve_options).await;

        let mut fallback_used = false;
        let (items, method) = if outcome.items.is_empty() && !outcome.degradations.is_empty() {
            warn!(
                degradations = ?outcome.degradations,
                "hybrid retrieval produced nothing, trying direct backends"
            );
            fallback_used = true;
            self.direct_retrieve(query, top_k, options).await?
        } else {
            (outcome.items, outcome.method)
        };

        let hybrid_applied = method == RetrievalMethod::Hybrid && !items.is_empty();

        let rerank_enabled = options
            .enable_reranking
            .unwrap_or(self.config.rerank.enable_reranking);
        let mut reranking_applied = false;
        let scored: Vec<(RetrievedItem, f32)> = if rerank_enabled && !items.is_empty() {
            let outcome = self.reranker.rerank(query, items).await;
            reranking_applied = outcome.applied;
            outcome
                .candidates
                .into_iter()
                .map(|candidate| (candidate.item, candidate.relevance))
                .collect()
        } else {
            items
                .into_iter()
                .map(|item| {
                    let score = item.score;
                    (item, score)
                })
                .collect()
        };

        Ok(self.assemble(
            query,
            scored,
            BundleFlags {
                fallback_used,
                hybrid_applied,
                reranking_applied,
            },
            started,
        ))
    }

    /// Direct single-backend fallback: dense first, then sparse.
    ///
    /// A backend that answers, even with an empty list, ends the ladder;
    /// only unanswered queries move down a rung.
    async fn direct_retrieve(
        &self,
        query: &str,
        top_k: usize,
        options: &ContextOptions,
    ) -> Result<(Vec<RetrievedItem>, RetrievalMethod)> {
        let deadline = self.config.search.call_timeout();
        let mut last_failure: Option<(String, String)> = None;

        if let Some(dense) = &self.dense {
            match timeout(deadline, dense.search(query, top_k)).await {
                Ok(Ok(hits)) => {
                    info!(backend = dense.name(), hits = hits.len(), "direct dense fallback served");
                    let items = hits
                        .into_iter()
                        .filter(|hit| hit.has_identity())
                        .take(top_k)
                        .enumerate()
                        .map(|(index, hit)| RetrievedItem::from_dense_hit(hit, index + 1))
                        .collect();
                    return Ok((items, RetrievalMethod::DenseOnly));
                }
                Ok(Err(error)) => {
                    warn!(backend = dense.name(), error = %error, "direct dense fallback failed");
                    last_failure = Some((dense.name().to_string(), error.to_string()));
                }
                Err(_) => {
                    warn!(backend = dense.name(), "direct dense fallback timed out");
                    last_failure = Some((
                        dense.name().to_string(),
                        format!("timed out after {}s", deadline.as_secs()),
                    ));
                }
            }
        }

        if let Some(sparse) = &self.sparse {
            match timeout(deadline, sparse.search(query, top_k, options.min_sparse_score)).await {
                Ok(hits) => {
                    info!(hits = hits.len(), "direct sparse fallback served");
                    let rrf = RrfConfig {
                        k: self.config.search.rrf_k,
                        top_k,
                        min_sources: None,
                    };
                    // Routing the lone sparse list through fusion keeps its
                    // scores and tagging consistent with the hybrid path.
                    let items = fuse_pair(
                        &[],
                        &hits,
                        self.config.search.dense_weight,
                        self.config.search.sparse_weight,
                        &rrf,
                    )
                    .into_iter()
                    .map(|candidate| {
                        RetrievedItem::from_fused(candidate, RetrievalMethod::Hybrid)
                    })
                    .collect();
                    return Ok((items, RetrievalMethod::Hybrid));
                }
                Err(_) => {
                    warn!("direct sparse fallback timed out");
                    last_failure = Some((
                        "sparse".to_string(),
                        format!("timed out after {}s", deadline.as_secs()),
                    ));
                }
            }
        }

        let (backend, cause) = last_failure
            .unwrap_or_else(|| ("none".to_string(), "no retrieval backend wired".to_string()));
        Err(RetrievalErr::PipelineExhausted {
            backend,
            query: query.to_string(),
            cause,
        })
    }

    fn assemble(
        &self,
        query: &str,
        scored: Vec<(RetrievedItem, f32)>,
        flags: BundleFlags,
        started: Instant,
    ) -> ContextBundle {
        let max_score = scored
            .iter()
            .fold(0.0_f32, |acc, (_, score)| acc.max(*score));

        let mut source_union: BTreeSet<String> = BTreeSet::new();
        let mut has_dense = false;
        let mut has_sparse = false;
        for (item, _) in &scored {
            for source in &item.sources {
                has_dense = has_dense || source == SOURCE_DENSE;
                has_sparse = has_sparse || source == SOURCE_SPARSE;
                source_union.insert(source.clone());
            }
        }
        let backend = match (has_dense, has_sparse) {
            (true, true) => "hybrid".to_string(),
            (false, true) => "sparse".to_string(),
            (true, false) => self
                .orchestrator
                .dense_name()
                .unwrap_or(SOURCE_DENSE)
                .to_string(),
            (false, false) => "none".to_string(),
        };

        let mut documents = Vec::with_capacity(scored.len());
        let mut matches = Vec::with_capacity(scored.len());
        for (item, score) in scored {
            let relevance = if max_score > 0.0 {
                (score / max_score).clamp(0.0, 1.0)
            } else {
                0.0
            };
            matches.push(VectorMatch {
                doc_id: item.doc_id.clone(),
                score,
                dense_score: item.dense_score,
                sparse_score: item.sparse_score,
            });
            documents.push(make_document(item, relevance));
        }

        let result_summary = if documents.is_empty() {
            "no documents retrieved".to_string()
        } else {
            format!("{} documents via {}", documents.len(), backend)
        };

        ContextBundle {
            vector: VectorSection {
                statistics: VectorStatistics {
                    total_matches: matches.len(),
                    max_score,
                    sources: source_union.into_iter().collect(),
                },
                matches,
            },
            documents,
            graph: serde_json::Map::new(),
            relational: serde_json::Map::new(),
            meta: ContextMeta {
                query_text: query.to_string(),
                backend,
                fallback_used: flags.fallback_used,
                hybrid_applied: flags.hybrid_applied,
                reranking_applied: flags.reranking_applied,
                duration_ms: started.elapsed().as_millis() as u64,
                result_summary,
            },
        }
    }
}

struct BundleFlags {
    fallback_used: bool,
    hybrid_applied: bool,
    reranking_applied: bool,
}

/// Shape one retrieved item into a context document.
///
/// `title`, `snippet` and `domain_tags` are reserved metadata keys: they
/// are lifted into named fields and removed from the flattened remainder
/// so the serialized document never carries a key twice. Unusable values
/// under those keys fall back the same way missing ones do.
fn make_document(item: RetrievedItem, relevance: f32) -> ContextDocument {
    let mut extra = item.metadata;
    let title = lift_string(extra.remove("title")).unwrap_or_else(|| item.doc_id.clone());
    let snippet = lift_string(extra.remove("snippet"))
        .unwrap_or_else(|| truncate_chars(item.content.trim(), SNIPPET_CHARS).to_string());
    let domain_tags = lift_tags(extra.remove("domain_tags"));

    ContextDocument {
        id: item.doc_id,
        title,
        snippet,
        relevance,
        source: item.sources.join("+"),
        domain_tags,
        extra,
    }
}

fn lift_string(value: Option<Value>) -> Option<String> {
    let value = value?;
    let text = value.as_str()?.trim();
    if text.is_empty() {
        return None;
    }
    Some(text.to_string())
}

fn lift_tags(value: Option<Value>) -> Vec<String> {
    match value {
        Some(Value::Array(values)) => values
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}
