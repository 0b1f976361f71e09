//! Core data types for the retrieval pipeline.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

/// Free-form metadata attached to documents and results.
///
/// Backend fields we do not interpret (titles, domain tags, provenance)
/// travel through the pipeline unchanged inside this map.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Source tag for lexically retrieved results.
pub const SOURCE_SPARSE: &str = "sparse";

/// Source tag for embedding-based results.
pub const SOURCE_DENSE: &str = "dense";

/// A document as handed to the indexer.
///
/// Immutable once indexed; replacing the corpus requires a full re-index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// Unique document identifier
    pub id: String,
    /// Full document text
    pub text: String,
    /// Preserved backend fields (title, snippet, domain_tags, ...)
    #[serde(default)]
    pub metadata: Metadata,
}

impl DocumentRecord {
    /// Create a record with empty metadata.
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            metadata: Metadata::new(),
        }
    }
}

/// A single source's scored result (one member of a dense or sparse pool).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    /// Document identifier
    pub doc_id: String,
    /// Document content or passage text
    pub content: String,
    /// Source-local relevance score
    pub score: f32,
    /// Preserved backend fields
    #[serde(default)]
    pub metadata: Metadata,
}

impl SearchHit {
    /// Create a hit with empty metadata.
    pub fn new(doc_id: impl Into<String>, content: impl Into<String>, score: f32) -> Self {
        Self {
            doc_id: doc_id.into(),
            content: content.into(),
            score,
            metadata: Metadata::new(),
        }
    }

    /// A hit without a usable identity cannot participate in fusion or
    /// deduplication and is skipped individually.
    pub fn has_identity(&self) -> bool {
        !self.doc_id.trim().is_empty()
    }
}

/// A candidate after rank fusion, with full per-source observability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusedCandidate {
    /// Document identifier
    pub doc_id: String,
    /// Content from the first source that listed the document
    pub content: String,
    /// Reciprocal-rank-fusion score
    pub fused_score: f32,
    /// Names of the sources that contributed this document
    pub sources: Vec<String>,
    /// 1-based rank within each contributing source's own list
    pub rank_per_source: BTreeMap<String, usize>,
    /// Raw score within each contributing source
    pub raw_score_per_source: BTreeMap<String, f32>,
    /// Preserved backend fields (first occurrence wins)
    #[serde(default)]
    pub metadata: Metadata,
}

/// How a result set was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMethod {
    /// Dense and sparse pools fused via reciprocal rank fusion
    Hybrid,
    /// Dense pool only (sparse disabled, unavailable, or empty)
    DenseOnly,
}

/// One item of the orchestrator's result contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedItem {
    /// Document identifier
    pub doc_id: String,
    /// Document content or passage text
    pub content: String,
    /// Final score (fused score for hybrid, dense score otherwise)
    pub score: f32,
    /// Names of the sources that contributed this document
    pub sources: Vec<String>,
    /// Raw dense score, if the dense source contributed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dense_score: Option<f32>,
    /// Raw sparse score, if the sparse source contributed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sparse_score: Option<f32>,
    /// 1-based rank within the dense list, if present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dense_rank: Option<usize>,
    /// 1-based rank within the sparse list, if present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sparse_rank: Option<usize>,
    /// Preserved backend fields
    #[serde(default)]
    pub metadata: Metadata,
    /// How this result set was produced
    pub retrieval_method: RetrievalMethod,
}

impl RetrievedItem {
    /// Build an item from a fused candidate, lifting the dense/sparse
    /// per-source observability fields.
    pub fn from_fused(candidate: FusedCandidate, method: RetrievalMethod) -> Self {
        let FusedCandidate {
            doc_id,
            content,
            fused_score,
            sources,
            rank_per_source,
            raw_score_per_source,
            metadata,
        } = candidate;
        Self {
            doc_id,
            content,
            score: fused_score,
            dense_score: raw_score_per_source.get(SOURCE_DENSE).copied(),
            sparse_score: raw_score_per_source.get(SOURCE_SPARSE).copied(),
            dense_rank: rank_per_source.get(SOURCE_DENSE).copied(),
            sparse_rank: rank_per_source.get(SOURCE_SPARSE).copied(),
            sources,
            metadata,
            retrieval_method: method,
        }
    }

    /// Build a dense-only item from a raw hit at the given 1-based rank.
    pub fn from_dense_hit(hit: SearchHit, rank: usize) -> Self {
        Self {
            doc_id: hit.doc_id,
            content: hit.content,
            score: hit.score,
            sources: vec![SOURCE_DENSE.to_string()],
            dense_score: Some(hit.score),
            sparse_score: None,
            dense_rank: Some(rank),
            sparse_rank: None,
            metadata: hit.metadata,
            retrieval_method: RetrievalMethod::DenseOnly,
        }
    }
}

/// Fetch a string field out of a metadata map.
pub fn metadata_str<'a>(metadata: &'a Metadata, key: &str) -> Option<&'a str> {
    metadata.get(key).and_then(serde_json::Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_fused(doc_id: &str) -> FusedCandidate {
        let mut rank_per_source = BTreeMap::new();
        rank_per_source.insert(SOURCE_DENSE.to_string(), 1);
        rank_per_source.insert(SOURCE_SPARSE.to_string(), 3);
        let mut raw_score_per_source = BTreeMap::new();
        raw_score_per_source.insert(SOURCE_DENSE.to_string(), 0.9);
        raw_score_per_source.insert(SOURCE_SPARSE.to_string(), 4.2);
        FusedCandidate {
            doc_id: doc_id.to_string(),
            content: "body".to_string(),
            fused_score: 0.031,
            sources: vec![SOURCE_DENSE.to_string(), SOURCE_SPARSE.to_string()],
            rank_per_source,
            raw_score_per_source,
            metadata: Metadata::new(),
        }
    }

    #[test]
    fn test_from_fused_lifts_per_source_fields() {
        let item = RetrievedItem::from_fused(make_fused("doc-1"), RetrievalMethod::Hybrid);

        assert_eq!(item.doc_id, "doc-1");
        assert_eq!(item.score, 0.031);
        assert_eq!(item.dense_score, Some(0.9));
        assert_eq!(item.sparse_score, Some(4.2));
        assert_eq!(item.dense_rank, Some(1));
        assert_eq!(item.sparse_rank, Some(3));
        assert_eq!(item.retrieval_method, RetrievalMethod::Hybrid);
    }

    #[test]
    fn test_from_dense_hit_tags_dense_only() {
        let item = RetrievedItem::from_dense_hit(SearchHit::new("d", "text", 0.7), 2);

        assert_eq!(item.sources, vec![SOURCE_DENSE.to_string()]);
        assert_eq!(item.dense_rank, Some(2));
        assert_eq!(item.sparse_score, None);
        assert_eq!(item.retrieval_method, RetrievalMethod::DenseOnly);
    }

    #[test]
    fn test_has_identity_rejects_blank_ids() {
        assert!(SearchHit::new("a", "x", 0.0).has_identity());
        assert!(!SearchHit::new("", "x", 0.0).has_identity());
        assert!(!SearchHit::new("   ", "x", 0.0).has_identity());
    }

    #[test]
    fn test_retrieval_method_serializes_snake_case() {
        let json = serde_json::to_string(&RetrievalMethod::DenseOnly).unwrap();
        assert_eq!(json, "\"dense_only\"");
        let json = serde_json::to_string(&RetrievalMethod::Hybrid).unwrap();
        assert_eq!(json, "\"hybrid\"");
    }

    #[test]
    fn test_document_record_deserializes_without_metadata() {
        let record: DocumentRecord =
            serde_json::from_str(r#"{"id": "a", "text": "cats and dogs"}"#).unwrap();
        assert_eq!(record.id, "a");
        assert!(record.metadata.is_empty());
    }

    #[test]
    fn test_metadata_str_reads_string_fields_only() {
        let mut metadata = Metadata::new();
        metadata.insert("title".to_string(), serde_json::json!("Case Law"));
        metadata.insert("year".to_string(), serde_json::json!(2021));

        assert_eq!(metadata_str(&metadata, "title"), Some("Case Law"));
        assert_eq!(metadata_str(&metadata, "year"), None);
        assert_eq!(metadata_str(&metadata, "missing"), None);
    }
}
