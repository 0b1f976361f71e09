//! Reciprocal Rank Fusion over ranked result lists.
//!
//! Each source contributes `weight / (k + rank)` per document, where rank
//! is the 1-based position in that source's list. Documents appearing in
//! several sources accumulate their contributions; first encounter across
//! sources fixes a candidate's content, metadata, and tie-break position.

use std::collections::BTreeMap;
use std::collections::HashSet;

use indexmap::IndexMap;
use indexmap::map::Entry;
use tracing::debug;

use crate::config::SearchConfig;
use crate::types::FusedCandidate;
use crate::types::SOURCE_DENSE;
use crate::types::SOURCE_SPARSE;
use crate::types::SearchHit;

/// Tuning for one fusion pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RrfConfig {
    /// Rank-smoothing constant in `weight / (k + rank)`.
    pub k: f32,
    /// Maximum candidates returned.
    pub top_k: usize,
    /// Keep only candidates present in at least this many sources.
    pub min_sources: Option<usize>,
}

impl Default for RrfConfig {
    fn default() -> Self {
        Self {
            k: 60.0,
            top_k: 20,
            min_sources: None,
        }
    }
}

impl RrfConfig {
    pub fn from_search_config(config: &SearchConfig) -> Self {
        Self {
            k: config.rrf_k,
            top_k: config.fused_top_k.max(0) as usize,
            min_sources: None,
        }
    }
}

/// One ranked list entering fusion.
pub struct RankedSource<'a> {
    pub name: &'a str,
    pub weight: f32,
    pub hits: &'a [SearchHit],
}

impl<'a> RankedSource<'a> {
    pub fn new(name: &'a str, weight: f32, hits: &'a [SearchHit]) -> Self {
        Self { name, weight, hits }
    }
}

/// Fuse any number of ranked sources into a single candidate list.
///
/// Within a source the first occurrence of a document id wins; repeats and
/// hits without an id are skipped. Ties in fused score keep first-encounter
/// order across sources.
pub fn fuse_sources(sources: &[RankedSource<'_>], config: &RrfConfig) -> Vec<FusedCandidate> {
    let mut accumulator: IndexMap<String, FusedCandidate> = IndexMap::new();

    for source in sources {
        let mut seen: HashSet<&str> = HashSet::new();
        for (position, hit) in source.hits.iter().enumerate() {
            if !hit.has_identity() {
                debug!(source = source.name, "skipping hit without a document id");
                continue;
            }
            if !seen.insert(hit.doc_id.as_str()) {
                debug!(
                    source = source.name,
                    doc_id = %hit.doc_id,
                    "skipping repeated document id within source"
                );
                continue;
            }

            // Rank is the 1-based position in the list as given, so skipped
            // entries leave gaps rather than shifting later ranks up.
            let rank = position + 1;
            let contribution = source.weight / (config.k + rank as f32);

            match accumulator.entry(hit.doc_id.clone()) {
                Entry::Occupied(mut entry) => {
                    let candidate = entry.get_mut();
                    candidate.fused_score += contribution;
                    candidate.sources.push(source.name.to_string());
                    candidate.rank_per_source.insert(source.name.to_string(), rank);
                    candidate
                        .raw_score_per_source
                        .insert(source.name.to_string(), hit.score);
                    if candidate.content.is_empty() && !hit.content.is_empty() {
                        candidate.content = hit.content.clone();
                    }
                }
                Entry::Vacant(entry) => {
                    entry.insert(FusedCandidate {
                        doc_id: hit.doc_id.clone(),
                        content: hit.content.clone(),
                        fused_score: contribution,
                        sources: vec![source.name.to_string()],
                        rank_per_source: BTreeMap::from([(source.name.to_string(), rank)]),
                        raw_score_per_source: BTreeMap::from([(
                            source.name.to_string(),
                            hit.score,
                        )]),
                        metadata: hit.metadata.clone(),
                    });
                }
            }
        }
    }

    let mut candidates: Vec<FusedCandidate> = match config.min_sources {
        Some(min) => accumulator
            .into_values()
            .filter(|candidate| candidate.sources.len() >= min)
            .collect(),
        None => accumulator.into_values().collect(),
    };

    // Stable sort over encounter order resolves exact ties deterministically.
    candidates.sort_by(|a, b| {
        b.fused_score
            .partial_cmp(&a.fused_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    candidates.truncate(config.top_k);
    candidates
}

/// Fuse a dense and a sparse list under the standard source names.
pub fn fuse_pair(
    dense_hits: &[SearchHit],
    sparse_hits: &[SearchHit],
    dense_weight: f32,
    sparse_weight: f32,
    config: &RrfConfig,
) -> Vec<FusedCandidate> {
    fuse_sources(
        &[
            RankedSource::new(SOURCE_DENSE, dense_weight, dense_hits),
            RankedSource::new(SOURCE_SPARSE, sparse_weight, sparse_hits),
        ],
        config,
    )
}
