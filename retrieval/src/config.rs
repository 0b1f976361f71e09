//! Configuration for the retrieval pipeline.

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::error::Result;
use crate::error::RetrievalErr;
use crate::traits::GenerationParams;

/// Main retrieval configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievalConfig {
    /// Search and fusion configuration
    #[serde(default)]
    pub search: SearchConfig,

    /// Lexical index configuration
    #[serde(default)]
    pub lexical: LexicalConfig,

    /// Query expansion configuration
    #[serde(default)]
    pub expansion: ExpansionConfig,

    /// Precision re-ranking configuration
    #[serde(default)]
    pub rerank: RerankConfig,

    /// Text generation backend configuration
    #[serde(default)]
    pub generation: GenerationConfig,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            search: SearchConfig::default(),
            lexical: LexicalConfig::default(),
            expansion: ExpansionConfig::default(),
            rerank: RerankConfig::default(),
            generation: GenerationConfig::default(),
        }
    }
}

/// Search and fusion configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchConfig {
    /// Candidates requested from the dense backend per variant
    #[serde(default = "default_dense_top_k")]
    pub dense_top_k: i32,

    /// Candidates requested from the sparse backend per variant
    #[serde(default = "default_sparse_top_k")]
    pub sparse_top_k: i32,

    /// Final number of fused results to return
    #[serde(default = "default_fused_top_k")]
    pub fused_top_k: i32,

    /// RRF rank-damping constant k
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f32,

    /// Dense source weight in fusion (0.0 - 1.0)
    #[serde(default = "default_dense_weight")]
    pub dense_weight: f32,

    /// Sparse source weight in fusion (0.0 - 1.0)
    #[serde(default = "default_sparse_weight")]
    pub sparse_weight: f32,

    /// Enable sparse retrieval alongside dense
    #[serde(default = "default_true")]
    pub enable_sparse: bool,

    /// Enable rank fusion when both pools are populated
    #[serde(default = "default_true")]
    pub enable_fusion: bool,

    /// Enable generation-backed query expansion
    #[serde(default)]
    pub enable_query_expansion: bool,

    /// Per-call deadline for dense and sparse retrieval, in seconds
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: i32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            dense_top_k: default_dense_top_k(),
            sparse_top_k: default_sparse_top_k(),
            fused_top_k: default_fused_top_k(),
            rrf_k: default_rrf_k(),
            dense_weight: default_dense_weight(),
            sparse_weight: default_sparse_weight(),
            enable_sparse: true,
            enable_fusion: true,
            enable_query_expansion: false,
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

impl SearchConfig {
    /// Per-call deadline as a `Duration`.
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs.max(1) as u64)
    }
}

fn default_dense_top_k() -> i32 {
    50
}

fn default_sparse_top_k() -> i32 {
    50
}

fn default_fused_top_k() -> i32 {
    20
}

fn default_rrf_k() -> f32 {
    60.0
}

fn default_dense_weight() -> f32 {
    0.6
}

fn default_sparse_weight() -> f32 {
    0.4
}

fn default_call_timeout_secs() -> i32 {
    10
}

fn default_true() -> bool {
    true
}

/// Lexical index configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LexicalConfig {
    /// Term-frequency saturation parameter
    #[serde(default = "default_k1")]
    pub k1: f32,

    /// Document-length normalization parameter (0.0 - 1.0)
    #[serde(default = "default_b")]
    pub b: f32,

    /// Tokens shorter than this are dropped during tokenization
    #[serde(default = "default_min_token_len")]
    pub min_token_len: i32,

    /// Capacity of the query-result cache
    #[serde(default = "default_query_cache_capacity")]
    pub query_cache_capacity: i32,
}

impl Default for LexicalConfig {
    fn default() -> Self {
        Self {
            k1: default_k1(),
            b: default_b(),
            min_token_len: default_min_token_len(),
            query_cache_capacity: default_query_cache_capacity(),
        }
    }
}

fn default_k1() -> f32 {
    1.5
}

fn default_b() -> f32 {
    0.75
}

fn default_min_token_len() -> i32 {
    2
}

fn default_query_cache_capacity() -> i32 {
    256
}

/// Query expansion configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExpansionConfig {
    /// Generated variants requested per query (the original is extra)
    #[serde(default = "default_num_variants")]
    pub num_variants: i32,

    /// Per-strategy generation deadline, in seconds
    #[serde(default = "default_expansion_timeout_secs")]
    pub timeout_secs: i32,

    /// Capacity of the expansion cache
    #[serde(default = "default_expansion_cache_capacity")]
    pub cache_capacity: i32,
}

impl Default for ExpansionConfig {
    fn default() -> Self {
        Self {
            num_variants: default_num_variants(),
            timeout_secs: default_expansion_timeout_secs(),
            cache_capacity: default_expansion_cache_capacity(),
        }
    }
}

impl ExpansionConfig {
    /// Per-strategy deadline as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1) as u64)
    }
}

fn default_num_variants() -> i32 {
    3
}

fn default_expansion_timeout_secs() -> i32 {
    10
}

fn default_expansion_cache_capacity() -> i32 {
    512
}

/// Precision re-ranking configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RerankConfig {
    /// Enable re-ranking of the fused candidate list
    #[serde(default)]
    pub enable_reranking: bool,

    /// Results kept after re-ranking
    #[serde(default = "default_rerank_top_k")]
    pub rerank_top_k: i32,

    /// Candidates handed to the re-ranker
    #[serde(default = "default_rerank_initial_k")]
    pub rerank_initial_k: i32,

    /// Character budget when a candidate's full content must be truncated
    #[serde(default = "default_content_char_budget")]
    pub content_char_budget: i32,

    /// Drop candidates scoring below this threshold (disabled when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_threshold: Option<f32>,

    /// Batch scoring deadline, in seconds
    #[serde(default = "default_rerank_timeout_secs")]
    pub timeout_secs: i32,

    /// Capacity of the re-ranker cache
    #[serde(default = "default_rerank_cache_capacity")]
    pub cache_capacity: i32,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            enable_reranking: false,
            rerank_top_k: default_rerank_top_k(),
            rerank_initial_k: default_rerank_initial_k(),
            content_char_budget: default_content_char_budget(),
            score_threshold: None,
            timeout_secs: default_rerank_timeout_secs(),
            cache_capacity: default_rerank_cache_capacity(),
        }
    }
}

impl RerankConfig {
    /// Batch scoring deadline as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1) as u64)
    }
}

fn default_rerank_top_k() -> i32 {
    5
}

fn default_rerank_initial_k() -> i32 {
    20
}

fn default_content_char_budget() -> i32 {
    512
}

fn default_rerank_timeout_secs() -> i32 {
    10
}

fn default_rerank_cache_capacity() -> i32 {
    512
}

/// Text generation backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationConfig {
    /// Base URL of an OpenAI-compatible chat-completions endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,

    /// API key, if the endpoint requires one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Model identifier
    #[serde(default = "default_generation_model")]
    pub model: String,

    /// Sampling temperature
    #[serde(default = "default_generation_temperature")]
    pub temperature: f32,

    /// Completion budget in tokens
    #[serde(default = "default_generation_max_tokens")]
    pub max_tokens: i32,

    /// Per-request deadline, in seconds
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: i32,

    /// Retries on transient request failure
    #[serde(default = "default_generation_max_retries")]
    pub max_retries: i32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            api_base: None,
            api_key: None,
            model: default_generation_model(),
            temperature: default_generation_temperature(),
            max_tokens: default_generation_max_tokens(),
            timeout_secs: default_generation_timeout_secs(),
            max_retries: default_generation_max_retries(),
        }
    }
}

impl GenerationConfig {
    /// Per-call generation parameters derived from this config.
    pub fn params(&self) -> GenerationParams {
        GenerationParams {
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            timeout: Duration::from_secs(self.timeout_secs.max(1) as u64),
        }
    }
}

fn default_generation_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_generation_temperature() -> f32 {
    0.3
}

fn default_generation_max_tokens() -> i32 {
    200
}

fn default_generation_timeout_secs() -> i32 {
    10
}

fn default_generation_max_retries() -> i32 {
    2
}

impl RetrievalConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| RetrievalErr::ConfigParseError {
            path: path.to_path_buf(),
            cause: e.to_string(),
        })
    }

    /// Load configuration, checking in priority order:
    ///
    /// 1. `{workdir}/.quarry/retrieval.toml` (project)
    /// 2. `~/.quarry/retrieval.toml` (global)
    /// 3. Defaults
    pub fn load(workdir: &Path) -> Result<Self> {
        Self::load_with_home(workdir, dirs::home_dir())
    }

    fn load_with_home(workdir: &Path, home: Option<PathBuf>) -> Result<Self> {
        let project_config = workdir.join(".quarry/retrieval.toml");
        if project_config.exists() {
            return Self::from_file(&project_config);
        }

        if let Some(home) = home {
            let global_config = home.join(".quarry/retrieval.toml");
            if global_config.exists() {
                return Self::from_file(&global_config);
            }
        }

        Ok(Self::default())
    }

    /// Validate configuration values.
    ///
    /// Returns warnings for potential issues; nothing here is fatal because
    /// every consumer clamps the values it uses.
    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        for (field, value) in [
            ("search.dense_top_k", self.search.dense_top_k),
            ("search.sparse_top_k", self.search.sparse_top_k),
            ("search.fused_top_k", self.search.fused_top_k),
            ("search.call_timeout_secs", self.search.call_timeout_secs),
            ("lexical.min_token_len", self.lexical.min_token_len),
            ("lexical.query_cache_capacity", self.lexical.query_cache_capacity),
            ("expansion.timeout_secs", self.expansion.timeout_secs),
            ("expansion.cache_capacity", self.expansion.cache_capacity),
            ("rerank.rerank_top_k", self.rerank.rerank_top_k),
            ("rerank.rerank_initial_k", self.rerank.rerank_initial_k),
            ("rerank.content_char_budget", self.rerank.content_char_budget),
            ("rerank.timeout_secs", self.rerank.timeout_secs),
            ("rerank.cache_capacity", self.rerank.cache_capacity),
            ("generation.max_tokens", self.generation.max_tokens),
            ("generation.timeout_secs", self.generation.timeout_secs),
        ] {
            if value <= 0 {
                warnings.push(ConfigWarning::InvalidValue {
                    field,
                    reason: format!("must be > 0, got {value}"),
                });
            }
        }

        if self.search.rrf_k <= 0.0 {
            warnings.push(ConfigWarning::InvalidValue {
                field: "search.rrf_k",
                reason: format!("must be > 0, got {}", self.search.rrf_k),
            });
        }

        let total_weight = self.search.dense_weight + self.search.sparse_weight;
        if (total_weight - 1.0).abs() > 0.01 {
            warnings.push(ConfigWarning::WeightSumNotOne {
                actual: total_weight,
            });
        }

        if self.lexical.k1 <= 0.0 {
            warnings.push(ConfigWarning::InvalidValue {
                field: "lexical.k1",
                reason: format!("must be > 0, got {}", self.lexical.k1),
            });
        }
        if !(0.0..=1.0).contains(&self.lexical.b) {
            warnings.push(ConfigWarning::InvalidValue {
                field: "lexical.b",
                reason: format!("must be within [0, 1], got {}", self.lexical.b),
            });
        }

        if self.expansion.num_variants < 0 {
            warnings.push(ConfigWarning::InvalidValue {
                field: "expansion.num_variants",
                reason: format!("must be >= 0, got {}", self.expansion.num_variants),
            });
        }

        if self.rerank.rerank_initial_k < self.rerank.rerank_top_k {
            warnings.push(ConfigWarning::InvalidValue {
                field: "rerank.rerank_initial_k",
                reason: format!(
                    "must be >= rerank_top_k ({}), got {}",
                    self.rerank.rerank_top_k, self.rerank.rerank_initial_k
                ),
            });
        }

        if self.search.enable_query_expansion && self.generation.api_base.is_none() {
            warnings.push(ConfigWarning::MissingDependency {
                feature: "query_expansion",
                required: "generation.api_base",
            });
        }

        warnings
    }
}

/// Non-fatal configuration problems reported by `validate`.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigWarning {
    /// Required dependency missing for a feature
    MissingDependency {
        feature: &'static str,
        required: &'static str,
    },
    /// Weights don't sum to 1.0
    WeightSumNotOne { actual: f32 },
    /// Invalid numeric value
    InvalidValue { field: &'static str, reason: String },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::MissingDependency { feature, required } => {
                write!(
                    f,
                    "Feature '{feature}' requires '{required}' to be configured"
                )
            }
            ConfigWarning::WeightSumNotOne { actual } => {
                write!(f, "Source weights sum to {actual:.2}, expected 1.0")
            }
            ConfigWarning::InvalidValue { field, reason } => {
                write!(f, "Config '{field}' is invalid: {reason}")
            }
        }
    }
}
