use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use engram_engine::{
    BenchmarkConfig, ChunkerOptions, ClusteringConfig, EpisodeConfig, HybridSearchConfig,
    TraversalConfig, WalkConfig,
};
use engram_types::DecayConfig;

use crate::{Error, Result};

/// Resolve the data directory path based on priority:
/// 1. Explicit path (with tilde expansion)
/// 2. ENGRAM_PATH environment variable (with tilde expansion)
/// 3. OS data directory
/// 4. ~/.engram (fallback for systems without one)
pub fn resolve_data_path(explicit_path: Option<&str>) -> Result<PathBuf> {
    if let Some(path) = explicit_path {
        return Ok(expand_tilde(path));
    }

    if let Ok(env_path) = std::env::var("ENGRAM_PATH") {
        return Ok(expand_tilde(&env_path));
    }

    if let Some(data_dir) = dirs::data_dir() {
        return Ok(data_dir.join("engram"));
    }

    if let Some(home) = std::env::var_os("HOME") {
        return Ok(PathBuf::from(home).join(".engram"));
    }

    Err(Error::Config(
        "Could not determine data path: no HOME directory or data directory found".to_string(),
    ))
}

/// Expand tilde (~) in paths to the user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/")
        && let Some(home) = std::env::var_os("HOME")
    {
        return PathBuf::from(home).join(stripped);
    }
    PathBuf::from(path)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TokensSection {
    /// Per-response token budget.
    pub mcp_max_response: usize,
    pub chunk_target: usize,
    pub chunk_min: usize,
}

impl Default for TokensSection {
    fn default() -> Self {
        Self {
            mcp_max_response: 2000,
            chunk_target: 400,
            chunk_min: 120,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct HybridSection {
    pub rrf_k: f64,
    pub vector_weight: f64,
    pub keyword_weight: f64,
    pub vector_search_limit: usize,
    pub keyword_search_limit: usize,
}

impl Default for HybridSection {
    fn default() -> Self {
        Self {
            rrf_k: 60.0,
            vector_weight: 1.0,
            keyword_weight: 1.0,
            vector_search_limit: 20,
            keyword_search_limit: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSection {
    pub mmr_lambda: f64,
    pub mmr_normalize: bool,
    pub seed_count: usize,
}

impl Default for RetrievalSection {
    fn default() -> Self {
        Self {
            mmr_lambda: 0.7,
            mmr_normalize: true,
            seed_count: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterExpansionSection {
    pub max_clusters: usize,
    pub max_siblings: usize,
    pub sibling_attenuation: f64,
}

impl Default for ClusterExpansionSection {
    fn default() -> Self {
        Self {
            max_clusters: 3,
            max_siblings: 5,
            sibling_attenuation: 0.3,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringSection {
    pub threshold: f64,
    pub min_cluster_size: usize,
}

impl Default for ClusteringSection {
    fn default() -> Self {
        Self {
            threshold: 0.35,
            min_cluster_size: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TraversalSection {
    pub max_depth: usize,
    pub min_weight: f64,
}

impl Default for TraversalSection {
    fn default() -> Self {
        Self {
            max_depth: 10,
            min_weight: 0.01,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorsSection {
    /// Fixed embedding dimension of the store instance.
    pub dim: usize,
    /// Optional age pruning; 0 disables.
    pub ttl_days: u32,
}

impl Default for VectorsSection {
    fn default() -> Self {
        Self { dim: 256, ttl_days: 0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Where transcripts are discovered for `engram ingest` without an
    /// explicit path.
    pub transcript_root: Option<PathBuf>,
    pub include_thinking: bool,

    pub tokens: TokensSection,
    pub hybrid_search: HybridSection,
    pub retrieval: RetrievalSection,
    pub cluster_expansion: ClusterExpansionSection,
    pub clustering: ClusteringSection,
    pub traversal: TraversalSection,
    pub vectors: VectorsSection,
    pub decay: DecayConfig,
}

impl Config {
    pub fn load(data_dir: &PathBuf) -> Result<Self> {
        Self::load_from(&data_dir.join("config.toml"))
    }

    pub fn load_from(path: &PathBuf) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn hybrid_search_config(&self) -> HybridSearchConfig {
        HybridSearchConfig {
            vector_search_limit: self.hybrid_search.vector_search_limit,
            keyword_search_limit: self.hybrid_search.keyword_search_limit,
            rrf_k: self.hybrid_search.rrf_k,
            vector_weight: self.hybrid_search.vector_weight,
            keyword_weight: self.hybrid_search.keyword_weight,
            max_clusters: self.cluster_expansion.max_clusters,
            max_siblings: self.cluster_expansion.max_siblings,
            sibling_attenuation: self.cluster_expansion.sibling_attenuation,
            mmr_lambda: self.retrieval.mmr_lambda,
            mmr_normalize: self.retrieval.mmr_normalize,
            seed_count: self.retrieval.seed_count,
            ..HybridSearchConfig::default()
        }
    }

    pub fn episode_config(&self, max_tokens: Option<usize>) -> EpisodeConfig {
        let budget = max_tokens.unwrap_or(self.tokens.mcp_max_response);
        EpisodeConfig {
            search: self.hybrid_search_config(),
            walk: WalkConfig {
                max_depth: self.traversal.max_depth,
                budget_tokens: budget,
            },
            max_tokens: budget,
            ..EpisodeConfig::default()
        }
    }

    pub fn chunker_options(&self) -> ChunkerOptions {
        ChunkerOptions {
            max_tokens: self.tokens.chunk_target,
            min_tokens: self.tokens.chunk_min,
            include_thinking: self.include_thinking,
        }
    }

    pub fn clustering_config(&self) -> ClusteringConfig {
        ClusteringConfig {
            threshold: self.clustering.threshold,
            min_cluster_size: self.clustering.min_cluster_size,
        }
    }

    pub fn traversal_config(&self) -> TraversalConfig {
        TraversalConfig {
            max_depth: self.traversal.max_depth,
            min_weight: self.traversal.min_weight,
        }
    }

    pub fn benchmark_config(&self) -> BenchmarkConfig {
        BenchmarkConfig::default()
    }
}
