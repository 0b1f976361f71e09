//! Quarry Retrieval Pipeline
//!
//! Hybrid document retrieval: dense (embedding) and sparse (BM25) search
//! fused by reciprocal rank, with optional generation-backed query
//! expansion and precision re-ranking, assembled into a context bundle.
//!
//! ## Stages
//!
//! | Stage | Description | Config Key | Default |
//! |-------|-------------|------------|---------|
//! | **BM25 Lexical Search** | In-memory inverted index, citation-safe tokens | `lexical` | On |
//! | **Dense Retrieval** | Injected embedding backend | - | On when wired |
//! | **Rank Fusion** | Weighted reciprocal rank fusion | `search.enable_fusion` | On |
//! | **Query Expansion** | Multi-strategy LLM reformulation | `search.enable_query_expansion` | Off |
//! | **Re-ranking** | Cross-encoder style precision pass | `rerank.enable_reranking` | Off |
//!
//! ## Quick Start
//!
//! ```toml
//! # .quarry/retrieval.toml
//! [search]
//! fused_top_k = 20
//! enable_sparse = true
//!
//! [generation]
//! api_base = "http://localhost:8080/v1"
//! ```
//!
//! Backends are traits ([`DenseRetriever`], [`SparseBackend`],
//! [`TextGenerator`], [`RelevanceScorer`]); wire the ones you have into a
//! [`PipelineBuilder`] and call [`ContextBuilder::build_context`]. Missing
//! backends degrade the pipeline, they never break it.

// Core modules
pub mod cache;
pub mod config;
pub mod error;
pub mod traits;
pub mod types;

// Subsystems
pub mod context;
pub mod expansion;
pub mod fusion;
pub mod generation;
pub mod index;
pub mod rerank;
pub mod search;

// Re-exports
pub use cache::BoundedCache;
pub use config::ConfigWarning;
pub use config::ExpansionConfig;
pub use config::GenerationConfig;
pub use config::LexicalConfig;
pub use config::RerankConfig;
pub use config::RetrievalConfig;
pub use config::SearchConfig;
pub use context::ContextBuilder;
pub use context::ContextBundle;
pub use context::ContextDocument;
pub use context::ContextMeta;
pub use context::ContextOptions;
pub use context::PipelineBuilder;
pub use context::QueryHints;
pub use error::Result;
pub use error::RetrievalErr;
pub use expansion::ExpansionStrategy;
pub use expansion::QueryExpander;
pub use expansion::QueryVariant;
pub use expansion::VariantOrigin;
pub use fusion::RankedSource;
pub use fusion::RrfConfig;
pub use fusion::fuse_pair;
pub use fusion::fuse_sources;
pub use generation::HttpTextGenerator;
pub use index::Aggregation;
pub use index::IndexStats;
pub use index::LexicalIndex;
pub use index::LexicalSearcher;
pub use index::tokenize;
pub use rerank::PrecisionReranker;
pub use rerank::RerankOutcome;
pub use rerank::RerankedCandidate;
pub use search::OrchestratorBuilder;
pub use search::ProbeState;
pub use search::RetrievalOrchestrator;
pub use search::RetrievalOutcome;
pub use search::RetrieveOptions;
pub use traits::DenseCapability;
pub use traits::DenseRetriever;
pub use traits::GenerationParams;
pub use traits::RelevanceScorer;
pub use traits::SparseBackend;
pub use traits::TextGenerator;
pub use types::DocumentRecord;
pub use types::FusedCandidate;
pub use types::Metadata;
pub use types::RetrievalMethod;
pub use types::RetrievedItem;
pub use types::SOURCE_DENSE;
pub use types::SOURCE_SPARSE;
pub use types::SearchHit;
