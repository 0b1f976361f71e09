//! Multi-strategy query reformulation.
//!
//! Each strategy asks the injected [`TextGenerator`] for one alternative
//! phrasing of the query. Strategies run concurrently; a failed or timed out
//! strategy is skipped, so the caller always gets at least the original.

pub mod cleaner;

use std::collections::BTreeSet;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Deserialize;
use serde::Serialize;
use tokio::time::timeout;
use tracing::debug;
use tracing::warn;

use crate::cache::BoundedCache;
use crate::config::ExpansionConfig;
use crate::traits::GenerationParams;
use crate::traits::TextGenerator;

/// Reformulation angle applied to the original query.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ExpansionStrategy {
    /// Swap key terms for synonyms, meaning unchanged
    SynonymSubstitution,
    /// Add implied context the original leaves unstated
    ContextualElaboration,
    /// Restate in domain terminology
    TechnicalPhrasing,
    /// Ask from the opposite party's point of view
    PerspectiveShift,
    /// Reduce to the simplest wording
    Simplification,
}

impl ExpansionStrategy {
    /// Every strategy, in default application order.
    pub const ALL: [ExpansionStrategy; 5] = [
        ExpansionStrategy::SynonymSubstitution,
        ExpansionStrategy::ContextualElaboration,
        ExpansionStrategy::TechnicalPhrasing,
        ExpansionStrategy::PerspectiveShift,
        ExpansionStrategy::Simplification,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::SynonymSubstitution => "synonym_substitution",
            Self::ContextualElaboration => "contextual_elaboration",
            Self::TechnicalPhrasing => "technical_phrasing",
            Self::PerspectiveShift => "perspective_shift",
            Self::Simplification => "simplification",
        }
    }

    /// Weight attached to variants this strategy produces.
    pub fn confidence(&self) -> f32 {
        match self {
            Self::SynonymSubstitution => 0.9,
            Self::TechnicalPhrasing => 0.85,
            Self::ContextualElaboration => 0.8,
            Self::PerspectiveShift => 0.75,
            Self::Simplification => 0.7,
        }
    }

    /// Instruction handed to the generator.
    fn prompt(&self, query: &str) -> String {
        let instruction = match self {
            Self::SynonymSubstitution => {
                "Rewrite this search query using synonyms for its key terms, \
                 keeping the meaning identical."
            }
            Self::ContextualElaboration => {
                "Rewrite this search query adding the context a reader would \
                 assume but the query leaves unstated."
            }
            Self::TechnicalPhrasing => {
                "Rewrite this search query in precise domain terminology."
            }
            Self::PerspectiveShift => {
                "Rewrite this search query as the opposite party in the \
                 situation would ask it."
            }
            Self::Simplification => {
                "Rewrite this search query in the simplest possible wording."
            }
        };
        format!("{instruction} Reply with the rewritten query only.\n\nQuery: {query}")
    }
}

impl fmt::Display for ExpansionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Where a variant came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantOrigin {
    Original,
    Generated,
}

/// One query phrasing entering retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryVariant {
    pub text: String,
    pub strategy: Option<ExpansionStrategy>,
    pub confidence: f32,
    pub origin: VariantOrigin,
}

impl QueryVariant {
    /// The user's query, verbatim. Always the first variant in a result.
    pub fn original(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            strategy: None,
            confidence: 1.0,
            origin: VariantOrigin::Original,
        }
    }

    fn generated(text: String, strategy: ExpansionStrategy) -> Self {
        Self {
            text,
            strategy: Some(strategy),
            confidence: strategy.confidence(),
            origin: VariantOrigin::Generated,
        }
    }
}

/// Cache key: the strategy list is stored as a sorted set, so request
/// order does not fragment entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExpansionKey {
    query: String,
    num_variants: i32,
    strategies: Vec<ExpansionStrategy>,
}

impl ExpansionKey {
    fn new(query: &str, num_variants: i32, strategies: &[ExpansionStrategy]) -> Self {
        let strategies: BTreeSet<ExpansionStrategy> = strategies.iter().copied().collect();
        Self {
            query: query.to_string(),
            num_variants,
            strategies: strategies.into_iter().collect(),
        }
    }
}

/// Shared cache mapping an expansion request to its generated variants.
pub type ExpansionCache = BoundedCache<ExpansionKey, Vec<QueryVariant>>;

/// Turns one query into several phrasings via the injected generator.
pub struct QueryExpander {
    generator: Arc<dyn TextGenerator>,
    params: GenerationParams,
    call_timeout: Duration,
    default_num_variants: i32,
    cache: Arc<ExpansionCache>,
}

impl QueryExpander {
    pub fn new(generator: Arc<dyn TextGenerator>, config: &ExpansionConfig) -> Self {
        Self {
            generator,
            params: GenerationParams::default(),
            call_timeout: config.timeout(),
            default_num_variants: config.num_variants,
            cache: Arc::new(BoundedCache::new(config.cache_capacity.max(1) as usize)),
        }
    }

    /// Expand with the configured variant budget and every strategy.
    pub async fn expand_default(&self, query: &str) -> Vec<QueryVariant> {
        self.expand(query, self.default_num_variants, &ExpansionStrategy::ALL)
            .await
    }

    /// Use these parameters for every generation call.
    pub fn with_generation_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    /// Share a cache with other expander instances.
    pub fn with_cache(mut self, cache: Arc<ExpansionCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Produce up to `num_variants` alternative phrasings plus the original.
    ///
    /// The original is always first, verbatim, with confidence 1.0. Every
    /// distinct requested strategy is invoked and yields at most one
    /// variant; accepted variants are capped at `num_variants` in request
    /// order, so a failed strategy leaves room for a later one. Cleaned
    /// output that is empty or repeats an earlier variant case-insensitively
    /// is dropped. Strategy failures and timeouts are logged and skipped, so
    /// an all-fail round still returns the original-only list.
    pub async fn expand(
        &self,
        query: &str,
        num_variants: i32,
        strategies: &[ExpansionStrategy],
    ) -> Vec<QueryVariant> {
        // The original variant carries the caller's text verbatim. Prompting
        // and caching work on the trimmed form.
        let original = QueryVariant::original(query);
        let trimmed = query.trim();
        if trimmed.is_empty() || num_variants <= 0 || strategies.is_empty() {
            return vec![original];
        }

        let key = ExpansionKey::new(trimmed, num_variants, strategies);
        if let Some(generated) = self.cache.get(&key) {
            debug!(query = %trimmed, "expansion cache hit");
            let mut variants = vec![original];
            variants.extend(generated);
            return variants;
        }

        // Invoke each distinct strategy once; acceptance below caps the
        // generated variants at num_variants.
        let mut selected: Vec<ExpansionStrategy> = Vec::new();
        for &strategy in strategies {
            if !selected.contains(&strategy) {
                selected.push(strategy);
            }
        }

        let calls = selected.into_iter().map(|strategy| {
            let generator = Arc::clone(&self.generator);
            let params = self.params.clone();
            let prompt = strategy.prompt(trimmed);
            let call_timeout = self.call_timeout;
            async move {
                match timeout(call_timeout, generator.generate(&prompt, &params)).await {
                    Ok(Ok(text)) => Some((strategy, text)),
                    Ok(Err(error)) => {
                        warn!(strategy = %strategy, error = %error, "expansion strategy failed");
                        None
                    }
                    Err(_) => {
                        warn!(strategy = %strategy, "expansion strategy timed out");
                        None
                    }
                }
            }
        });
        let outcomes = join_all(calls).await;

        let mut variants = vec![original];
        let mut seen: HashSet<String> = HashSet::from([trimmed.to_lowercase()]);
        for (strategy, raw) in outcomes.into_iter().flatten() {
            let cleaned = cleaner::clean_variant(&raw);
            if cleaned.is_empty() {
                debug!(strategy = %strategy, "cleaned variant is empty, skipping");
                continue;
            }
            if !seen.insert(cleaned.to_lowercase()) {
                debug!(strategy = %strategy, "variant repeats an earlier phrasing, skipping");
                continue;
            }
            variants.push(QueryVariant::generated(cleaned, strategy));
            if variants.len() > num_variants as usize {
                break;
            }
        }

        self.cache.insert(key, variants[1..].to_vec());
        variants
    }
}
