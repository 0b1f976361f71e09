//! Error types for the retrieval pipeline.
//!
//! Almost every failure in this subsystem is recovered close to its origin
//! and surfaces as a degraded (possibly empty) result, not as an error.
//! The variants here cover the few paths that do propagate: configuration
//! problems, collaborator call failures before they are absorbed, and the
//! single fatal case where no retrieval path is left at all.

use std::path::PathBuf;

use thiserror::Error;

/// Result alias for retrieval operations.
pub type Result<T> = std::result::Result<T, RetrievalErr>;

/// Retrieval pipeline errors.
#[derive(Debug, Error)]
pub enum RetrievalErr {
    /// Every retrieval path failed for a query. The only fatal condition
    /// of the pipeline; everything else degrades.
    #[error("no retrieval path available for query `{query}`: backend `{backend}` failed: {cause}")]
    PipelineExhausted {
        backend: String,
        query: String,
        cause: String,
    },

    /// A configuration field holds an unusable value.
    #[error("config error in `{field}`: {cause}")]
    ConfigError { field: String, cause: String },

    /// A configuration file exists but could not be parsed.
    #[error("failed to parse config file {path}: {cause}")]
    ConfigParseError { path: PathBuf, cause: String },

    /// The dense backend raised on a search call.
    #[error("dense search via `{backend}` failed: {cause}")]
    DenseSearchFailed { backend: String, cause: String },

    /// The text-generation service raised or returned an unusable response.
    #[error("text generation failed: {cause}")]
    GenerationFailed { cause: String },

    /// The relevance scorer raised or returned a malformed batch.
    #[error("relevance scoring failed: {cause}")]
    ScoringFailed { cause: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RetrievalErr {
    /// Whether this error terminates a `build_context` call.
    ///
    /// Call failures and config problems are absorbed into degraded modes
    /// by the orchestrator; only pipeline exhaustion reaches the caller.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RetrievalErr::PipelineExhausted { .. })
    }
}
