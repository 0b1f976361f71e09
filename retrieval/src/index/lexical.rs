//! In-memory BM25 index over a tokenized corpus snapshot.

use std::collections::HashMap;
use std::collections::HashSet;

use tracing::debug;
use tracing::info;

use crate::cache::BoundedCache;
use crate::config::LexicalConfig;
use crate::index::tokenizer::tokenize;
use crate::types::DocumentRecord;
use crate::types::Metadata;
use crate::types::SearchHit;

/// How per-variant scores combine in multi-query retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    /// Best score across variants
    Max,
    /// Sum of scores across variants
    Sum,
    /// Mean over the variants that matched the document
    Avg,
}

/// Cache key for one retrieval call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct QueryKey {
    query: String,
    top_k: usize,
    min_score_bits: Option<u32>,
}

impl QueryKey {
    fn new(query: &str, top_k: usize, min_score: Option<f32>) -> Self {
        Self {
            query: query.to_string(),
            top_k,
            min_score_bits: min_score.map(f32::to_bits),
        }
    }
}

struct IndexedDocument {
    id: String,
    text: String,
    metadata: Metadata,
    token_count: usize,
}

/// BM25-style lexical scorer over an in-memory corpus.
///
/// Scoring uses
/// `score(D,Q) = Σ_t IDF(t)·f(t,D)·(k1+1) / (f(t,D) + k1·(1−b+b·|D|/avgdl))`
/// with `IDF(t) = ln(1 + (N−df+0.5)/(df+0.5))`.
///
/// The index lives entirely in process memory and is rebuilt wholesale by
/// [`LexicalIndex::index`]; there is no persistence and no incremental
/// update path, so the corpus must fit in memory.
///
/// The query-result cache deliberately survives re-indexing. Invalidation
/// is the caller's explicit step via [`LexicalIndex::clear_query_cache`].
pub struct LexicalIndex {
    k1: f32,
    b: f32,
    min_token_len: usize,
    documents: Vec<IndexedDocument>,
    /// term -> (document position, term frequency), ascending by position
    postings: HashMap<String, Vec<(usize, usize)>>,
    avg_doc_len: f32,
    query_cache: BoundedCache<QueryKey, Vec<SearchHit>>,
}

impl LexicalIndex {
    /// Create an empty index with the given tuning parameters.
    pub fn new(config: &LexicalConfig) -> Self {
        Self {
            k1: config.k1,
            b: config.b,
            min_token_len: config.min_token_len.max(1) as usize,
            documents: Vec::new(),
            postings: HashMap::new(),
            avg_doc_len: 0.0,
            query_cache: BoundedCache::new(config.query_cache_capacity.max(1) as usize),
        }
    }

    /// Replace the corpus wholesale and rebuild all statistics.
    ///
    /// Documents with a blank id, and repeats of an id already indexed in
    /// this call, are skipped individually. Returns the number of documents
    /// indexed.
    pub fn index(&mut self, documents: &[DocumentRecord]) -> usize {
        self.documents.clear();
        self.postings.clear();
        self.avg_doc_len = 0.0;

        let mut seen_ids: HashSet<&str> = HashSet::new();
        let mut total_tokens = 0usize;

        for record in documents {
            if record.id.trim().is_empty() {
                debug!("skipping document with blank id");
                continue;
            }
            if !seen_ids.insert(record.id.as_str()) {
                debug!(doc_id = %record.id, "skipping duplicate document id");
                continue;
            }

            let tokens = tokenize(&record.text, self.min_token_len);
            let position = self.documents.len();
            let mut term_freq: HashMap<&str, usize> = HashMap::new();
            for token in &tokens {
                *term_freq.entry(token.as_str()).or_insert(0) += 1;
            }
            for (term, freq) in term_freq {
                self.postings
                    .entry(term.to_string())
                    .or_default()
                    .push((position, freq));
            }

            total_tokens += tokens.len();
            self.documents.push(IndexedDocument {
                id: record.id.clone(),
                text: record.text.clone(),
                metadata: record.metadata.clone(),
                token_count: tokens.len(),
            });
        }

        if !self.documents.is_empty() {
            self.avg_doc_len = total_tokens as f32 / self.documents.len() as f32;
        }

        info!(
            documents = self.documents.len(),
            terms = self.postings.len(),
            "lexical index built"
        );
        self.documents.len()
    }

    /// Retrieve the `top_k` best-scoring documents for a query.
    ///
    /// A query with zero usable tokens yields an empty result, never an
    /// error; so does an empty index. Ties are broken by corpus insertion
    /// order. Results are cached by `(query, top_k, min_score)`.
    pub fn retrieve(&self, query: &str, top_k: usize, min_score: Option<f32>) -> Vec<SearchHit> {
        if top_k == 0 {
            return Vec::new();
        }
        let tokens = tokenize(query, self.min_token_len);
        if tokens.is_empty() {
            return Vec::new();
        }

        let key = QueryKey::new(query, top_k, min_score);
        if let Some(hits) = self.query_cache.get(&key) {
            debug!(query = %query, "lexical query cache hit");
            return hits;
        }

        let hits = self.collect_hits(self.score_tokens(&tokens), top_k, min_score);
        self.query_cache.insert(key, hits.clone());
        hits
    }

    /// Score each query variant independently and aggregate per document
    /// before taking `top_k`.
    pub fn retrieve_multi_query(
        &self,
        queries: &[String],
        top_k: usize,
        min_score: Option<f32>,
        aggregation: Aggregation,
    ) -> Vec<SearchHit> {
        if top_k == 0 || self.documents.is_empty() {
            return Vec::new();
        }

        let mut combined = vec![0.0f32; self.documents.len()];
        let mut matched = vec![0u32; self.documents.len()];

        for query in queries {
            let tokens = tokenize(query, self.min_token_len);
            if tokens.is_empty() {
                continue;
            }
            for (position, score) in self.score_tokens(&tokens).into_iter().enumerate() {
                if score <= 0.0 {
                    continue;
                }
                matched[position] += 1;
                match aggregation {
                    Aggregation::Max => combined[position] = combined[position].max(score),
                    Aggregation::Sum | Aggregation::Avg => combined[position] += score,
                }
            }
        }

        if aggregation == Aggregation::Avg {
            for (score, count) in combined.iter_mut().zip(&matched) {
                if *count > 0 {
                    *score /= *count as f32;
                }
            }
        }

        self.collect_hits(combined, top_k, min_score)
    }

    /// Drop all cached query results.
    ///
    /// Re-indexing does not call this; staleness after a corpus swap is the
    /// documented behavior until the caller clears explicitly.
    pub fn clear_query_cache(&self) {
        self.query_cache.clear();
    }

    /// Number of indexed documents.
    pub fn doc_count(&self) -> usize {
        self.documents.len()
    }

    /// Number of distinct terms in the index.
    pub fn term_count(&self) -> usize {
        self.postings.len()
    }

    /// Average document length in tokens.
    pub fn avg_doc_len(&self) -> f32 {
        self.avg_doc_len
    }

    /// Whether any document is indexed.
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// BM25 score of every document against the tokenized query.
    fn score_tokens(&self, tokens: &[String]) -> Vec<f32> {
        let mut scores = vec![0.0f32; self.documents.len()];
        if self.documents.is_empty() {
            return scores;
        }
        let corpus_size = self.documents.len() as f32;

        for token in tokens {
            let Some(postings) = self.postings.get(token) else {
                continue;
            };
            let df = postings.len() as f32;
            let idf = (1.0 + (corpus_size - df + 0.5) / (df + 0.5)).ln();
            for &(position, freq) in postings {
                let freq = freq as f32;
                let doc_len = self.documents[position].token_count as f32;
                let norm = self.k1 * (1.0 - self.b + self.b * doc_len / self.avg_doc_len);
                scores[position] += idf * freq * (self.k1 + 1.0) / (freq + norm);
            }
        }
        scores
    }

    /// Turn a per-position score array into sorted, truncated hits.
    fn collect_hits(
        &self,
        scores: Vec<f32>,
        top_k: usize,
        min_score: Option<f32>,
    ) -> Vec<SearchHit> {
        let mut ranked: Vec<(usize, f32)> = scores
            .into_iter()
            .enumerate()
            .filter(|(_, score)| *score > 0.0)
            .filter(|(_, score)| min_score.is_none_or(|floor| *score >= floor))
            .collect();

        // Stable sort over ascending positions keeps insertion order on ties.
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(top_k);

        ranked
            .into_iter()
            .map(|(position, score)| {
                let doc = &self.documents[position];
                SearchHit {
                    doc_id: doc.id.clone(),
                    content: doc.text.clone(),
                    score,
                    metadata: doc.metadata.clone(),
                }
            })
            .collect()
    }
}

impl Default for LexicalIndex {
    fn default() -> Self {
        Self::new(&LexicalConfig::default())
    }
}
