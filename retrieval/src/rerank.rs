//! Precision re-ranking of short candidate lists.
//!
//! A joint (query, passage) scorer re-scores the head of the retrieved
//! list. Re-ranking is strictly best-effort: an absent, unavailable, or
//! failing scorer keeps the incoming order, never surfaces an error.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::debug;
use tracing::warn;

use crate::cache::BoundedCache;
use crate::config::RerankConfig;
use crate::traits::RelevanceScorer;
use crate::types::RetrievedItem;
use crate::types::metadata_str;

/// A candidate with its final position after re-ranking.
#[derive(Debug, Clone)]
pub struct RerankedCandidate {
    pub item: RetrievedItem,
    /// Scorer-assigned relevance when re-ranking applied; the item's own
    /// score otherwise
    pub relevance: f32,
    /// 1-based final position
    pub rank: usize,
}

/// Result of one re-ranking pass.
#[derive(Debug, Clone)]
pub struct RerankOutcome {
    pub candidates: Vec<RerankedCandidate>,
    /// False when the incoming order was kept (no scorer, unavailable
    /// scorer, or scoring failure).
    pub applied: bool,
}

/// Cache key: query plus the sorted candidate-id set, so the same batch
/// arriving in a different order still hits.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RerankKey {
    query: String,
    doc_ids: Vec<String>,
}

impl RerankKey {
    fn new(query: &str, items: &[RetrievedItem]) -> Self {
        let mut doc_ids: Vec<String> = items.iter().map(|item| item.doc_id.clone()).collect();
        doc_ids.sort();
        Self {
            query: query.to_string(),
            doc_ids,
        }
    }
}

/// Shared cache mapping a (query, candidate set) to per-document relevance.
pub type RerankCache = BoundedCache<RerankKey, Vec<(String, f32)>>;

/// Re-scores the head of a retrieved list with an optional scorer.
pub struct PrecisionReranker {
    scorer: Option<Arc<dyn RelevanceScorer>>,
    top_k: usize,
    initial_k: usize,
    content_char_budget: usize,
    score_threshold: Option<f32>,
    call_timeout: Duration,
    cache: Arc<RerankCache>,
}

impl PrecisionReranker {
    pub fn new(scorer: Option<Arc<dyn RelevanceScorer>>, config: &RerankConfig) -> Self {
        let top_k = config.rerank_top_k.max(1) as usize;
        Self {
            scorer,
            top_k,
            initial_k: (config.rerank_initial_k.max(config.rerank_top_k).max(1)) as usize,
            content_char_budget: config.content_char_budget.max(1) as usize,
            score_threshold: config.score_threshold,
            call_timeout: config.timeout(),
            cache: Arc::new(BoundedCache::new(config.cache_capacity.max(1) as usize)),
        }
    }

    /// Share a cache with other reranker instances.
    pub fn with_cache(mut self, cache: Arc<RerankCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Re-score and re-order `items` for the query.
    ///
    /// At most `rerank_initial_k` candidates are scored, in a single
    /// batched call; at most `rerank_top_k` come back. Every failure path
    /// degrades to the incoming order truncated to `rerank_top_k`.
    pub async fn rerank(&self, query: &str, mut items: Vec<RetrievedItem>) -> RerankOutcome {
        if items.is_empty() {
            return RerankOutcome {
                candidates: Vec::new(),
                applied: false,
            };
        }

        let Some(scorer) = &self.scorer else {
            debug!("no relevance scorer wired, keeping incoming order");
            return self.keep_incoming_order(items);
        };

        items.truncate(self.initial_k);

        let key = RerankKey::new(query, &items);
        if let Some(scores) = self.cache.get(&key) {
            debug!(query = %query, "rerank cache hit");
            return self.apply_scores(items, &scores);
        }

        if !scorer.is_available().await {
            warn!("relevance scorer unavailable, keeping incoming order");
            return self.keep_incoming_order(items);
        }

        let spans: Vec<String> = items.iter().map(|item| self.derive_span(item)).collect();
        let scores = match timeout(self.call_timeout, scorer.score_batch(query, &spans)).await {
            Ok(Ok(scores)) => scores,
            Ok(Err(error)) => {
                warn!(error = %error, "relevance scoring failed, keeping incoming order");
                return self.keep_incoming_order(items);
            }
            Err(_) => {
                warn!("relevance scoring timed out, keeping incoming order");
                return self.keep_incoming_order(items);
            }
        };

        if scores.len() != items.len() {
            warn!(
                expected = items.len(),
                got = scores.len(),
                "scorer returned a mismatched score count, keeping incoming order"
            );
            return self.keep_incoming_order(items);
        }

        let pairs: Vec<(String, f32)> = items
            .iter()
            .map(|item| item.doc_id.clone())
            .zip(scores)
            .collect();
        self.cache.insert(key, pairs.clone());
        self.apply_scores(items, &pairs)
    }

    /// Text span the scorer sees for one candidate, by priority: snippet,
    /// truncated content, title, document id. Title prefixes the first two
    /// when present.
    fn derive_span(&self, item: &RetrievedItem) -> String {
        let title = metadata_str(&item.metadata, "title")
            .map(str::trim)
            .filter(|t| !t.is_empty());
        let snippet = metadata_str(&item.metadata, "snippet")
            .map(str::trim)
            .filter(|s| !s.is_empty());

        if let Some(snippet) = snippet {
            return match title {
                Some(title) => format!("{title}: {snippet}"),
                None => snippet.to_string(),
            };
        }

        let content = item.content.trim();
        if !content.is_empty() {
            let truncated = truncate_chars(content, self.content_char_budget);
            return match title {
                Some(title) => format!("{title}: {truncated}"),
                None => truncated.to_string(),
            };
        }

        match title {
            Some(title) => title.to_string(),
            None => item.doc_id.clone(),
        }
    }

    fn apply_scores(&self, items: Vec<RetrievedItem>, scores: &[(String, f32)]) -> RerankOutcome {
        let by_id: HashMap<&str, f32> = scores
            .iter()
            .map(|(doc_id, score)| (doc_id.as_str(), *score))
            .collect();

        let mut scored: Vec<(RetrievedItem, f32)> = items
            .into_iter()
            .map(|item| {
                let relevance = by_id.get(item.doc_id.as_str()).copied().unwrap_or(item.score);
                (item, relevance)
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        if let Some(threshold) = self.score_threshold {
            scored.retain(|(_, relevance)| *relevance >= threshold);
        }
        scored.truncate(self.top_k);

        let candidates = scored
            .into_iter()
            .enumerate()
            .map(|(position, (item, relevance))| RerankedCandidate {
                item,
                relevance,
                rank: position + 1,
            })
            .collect();
        RerankOutcome {
            candidates,
            applied: true,
        }
    }

    fn keep_incoming_order(&self, items: Vec<RetrievedItem>) -> RerankOutcome {
        let candidates = items
            .into_iter()
            .take(self.top_k)
            .enumerate()
            .map(|(position, item)| RerankedCandidate {
                relevance: item.score,
                rank: position + 1,
                item,
            })
            .collect();
        RerankOutcome {
            candidates,
            applied: false,
        }
    }
}

/// Cut at a character count, never inside a code point.
pub(crate) fn truncate_chars(text: &str, budget: usize) -> &str {
    match text.char_indices().nth(budget) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use async_trait::async_trait;

    use super::*;
    use crate::error::Result;
    use crate::error::RetrievalErr;
    use crate::types::SearchHit;

    struct TestScorer {
        available: bool,
        fail: bool,
        scores: Vec<f32>,
        calls: AtomicUsize,
        spans_seen: Mutex<Vec<String>>,
    }

    impl TestScorer {
        fn returning(scores: Vec<f32>) -> Self {
            Self {
                available: true,
                fail: false,
                scores,
                calls: AtomicUsize::new(0),
                spans_seen: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::returning(Vec::new())
            }
        }

        fn offline() -> Self {
            Self {
                available: false,
                ..Self::returning(Vec::new())
            }
        }
    }

    #[async_trait]
    impl RelevanceScorer for TestScorer {
        async fn is_available(&self) -> bool {
            self.available
        }

        async fn score_batch(&self, _query: &str, spans: &[String]) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.spans_seen.lock().unwrap().extend(spans.iter().cloned());
            if self.fail {
                return Err(RetrievalErr::ScoringFailed {
                    cause: "scripted failure".to_string(),
                });
            }
            Ok(self.scores.clone())
        }
    }

    fn make_item(doc_id: &str, score: f32) -> RetrievedItem {
        RetrievedItem::from_dense_hit(SearchHit::new(doc_id, format!("content of {doc_id}"), score), 1)
    }

    fn make_items(ids: &[&str]) -> Vec<RetrievedItem> {
        ids.iter()
            .enumerate()
            .map(|(position, id)| make_item(id, 1.0 - position as f32 * 0.1))
            .collect()
    }

    fn make_reranker(scorer: Option<Arc<dyn RelevanceScorer>>) -> PrecisionReranker {
        PrecisionReranker::new(scorer, &RerankConfig::default())
    }

    #[tokio::test]
    async fn test_absent_scorer_keeps_order() {
        let reranker = make_reranker(None);
        let outcome = reranker.rerank("q", make_items(&["a", "b", "c"])).await;

        assert!(!outcome.applied);
        let ids: Vec<&str> = outcome
            .candidates
            .iter()
            .map(|c| c.item.doc_id.as_str())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(outcome.candidates[0].rank, 1);
        assert_eq!(outcome.candidates[2].rank, 3);
    }

    #[tokio::test]
    async fn test_scorer_reorders_candidates() {
        let scorer: Arc<dyn RelevanceScorer> =
            Arc::new(TestScorer::returning(vec![0.1, 0.9, 0.5]));
        let reranker = make_reranker(Some(scorer));

        let outcome = reranker.rerank("q", make_items(&["a", "b", "c"])).await;

        assert!(outcome.applied);
        let ids: Vec<&str> = outcome
            .candidates
            .iter()
            .map(|c| c.item.doc_id.as_str())
            .collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
        assert_eq!(outcome.candidates[0].relevance, 0.9);
        assert_eq!(outcome.candidates[0].rank, 1);
    }

    #[tokio::test]
    async fn test_unavailable_scorer_keeps_order() {
        let scorer: Arc<dyn RelevanceScorer> = Arc::new(TestScorer::offline());
        let reranker = make_reranker(Some(scorer));

        let outcome = reranker.rerank("q", make_items(&["a", "b"])).await;
        assert!(!outcome.applied);
        assert_eq!(outcome.candidates[0].item.doc_id, "a");
    }

    #[tokio::test]
    async fn test_scoring_failure_keeps_order() {
        let scorer: Arc<dyn RelevanceScorer> = Arc::new(TestScorer::failing());
        let reranker = make_reranker(Some(scorer));

        let outcome = reranker.rerank("q", make_items(&["a", "b"])).await;
        assert!(!outcome.applied);
        assert_eq!(outcome.candidates.len(), 2);
    }

    #[tokio::test]
    async fn test_score_count_mismatch_keeps_order() {
        let scorer: Arc<dyn RelevanceScorer> = Arc::new(TestScorer::returning(vec![0.9]));
        let reranker = make_reranker(Some(scorer));

        let outcome = reranker.rerank("q", make_items(&["a", "b", "c"])).await;
        assert!(!outcome.applied);
        let ids: Vec<&str> = outcome
            .candidates
            .iter()
            .map(|c| c.item.doc_id.as_str())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_threshold_filters_low_scores() {
        let scorer: Arc<dyn RelevanceScorer> =
            Arc::new(TestScorer::returning(vec![0.9, 0.2, 0.8]));
        let config = RerankConfig {
            score_threshold: Some(0.5),
            ..RerankConfig::default()
        };
        let reranker = PrecisionReranker::new(Some(scorer), &config);

        let outcome = reranker.rerank("q", make_items(&["a", "b", "c"])).await;
        let ids: Vec<&str> = outcome
            .candidates
            .iter()
            .map(|c| c.item.doc_id.as_str())
            .collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_initial_k_and_top_k_limits() {
        let scorer = Arc::new(TestScorer::returning(vec![0.1, 0.2, 0.3]));
        let dyn_scorer: Arc<dyn RelevanceScorer> = scorer.clone();
        let config = RerankConfig {
            rerank_top_k: 2,
            rerank_initial_k: 3,
            ..RerankConfig::default()
        };
        let reranker = PrecisionReranker::new(Some(dyn_scorer), &config);

        let outcome = reranker.rerank("q", make_items(&["a", "b", "c", "d"])).await;

        // Only three candidates were scored, two survive.
        assert_eq!(scorer.spans_seen.lock().unwrap().len(), 3);
        assert_eq!(outcome.candidates.len(), 2);
        assert_eq!(outcome.candidates[0].item.doc_id, "c");
    }

    #[tokio::test]
    async fn test_cache_hit_skips_scoring() {
        let scorer = Arc::new(TestScorer::returning(vec![0.4, 0.6]));
        let dyn_scorer: Arc<dyn RelevanceScorer> = scorer.clone();
        let reranker = make_reranker(Some(dyn_scorer));

        let first = reranker.rerank("q", make_items(&["a", "b"])).await;
        // Same candidate set in reversed order still hits the cache.
        let items = vec![make_item("b", 0.5), make_item("a", 0.4)];
        let second = reranker.rerank("q", items).await;

        assert_eq!(scorer.calls.load(Ordering::SeqCst), 1);
        assert!(second.applied);
        assert_eq!(first.candidates[0].item.doc_id, "b");
        assert_eq!(second.candidates[0].item.doc_id, "b");
    }

    #[tokio::test]
    async fn test_span_priority() {
        let scorer = Arc::new(TestScorer::returning(vec![0.5; 4]));
        let dyn_scorer: Arc<dyn RelevanceScorer> = scorer.clone();
        let config = RerankConfig {
            content_char_budget: 12,
            ..RerankConfig::default()
        };
        let reranker = PrecisionReranker::new(Some(dyn_scorer), &config);

        let mut with_snippet = make_item("a", 0.9);
        with_snippet
            .metadata
            .insert("title".to_string(), serde_json::json!("Pets"));
        with_snippet
            .metadata
            .insert("snippet".to_string(), serde_json::json!("cats chase dogs"));

        let mut with_content = make_item("b", 0.8);
        with_content.content = "content of b and much more behind it".to_string();

        let mut title_only = make_item("c", 0.7);
        title_only.content = String::new();
        title_only
            .metadata
            .insert("title".to_string(), serde_json::json!("Only A Title"));

        let mut bare = make_item("d", 0.6);
        bare.content = String::new();

        reranker
            .rerank("q", vec![with_snippet, with_content, title_only, bare])
            .await;

        let spans = scorer.spans_seen.lock().unwrap();
        assert_eq!(spans[0], "Pets: cats chase dogs");
        // Content truncated to twelve characters.
        assert_eq!(spans[1], "content of b");
        assert_eq!(spans[2], "Only A Title");
        assert_eq!(spans[3], "d");
    }

    #[tokio::test]
    async fn test_empty_input() {
        let reranker = make_reranker(None);
        let outcome = reranker.rerank("q", Vec::new()).await;
        assert!(outcome.candidates.is_empty());
        assert!(!outcome.applied);
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("abcdef", 4), "abcd");
        assert_eq!(truncate_chars("abc", 10), "abc");
        // Two-byte code points still count as one character.
        assert_eq!(truncate_chars("§§§§", 2), "§§");
    }
}
