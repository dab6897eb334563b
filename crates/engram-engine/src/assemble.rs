use serde::Serialize;
use std::collections::BTreeMap;

use engram_index::Database;
use engram_types::{Direction, MAIN_AGENT, estimate_tokens};

use crate::Result;
use crate::search::{HybridSearchConfig, SearchOutcome, hybrid_search};
use crate::walker::{Chain, WalkConfig, select_chains, walk_all_chains};

/// Closed set of human-readable fallback reasons.
pub const FALLBACK_NO_CHUNKS: &str = "No matching chunks in memory";
pub const FALLBACK_NO_SEEDS: &str = "Search found chunks but none suitable as chain seeds";
pub const FALLBACK_NO_EDGES: &str = "No edges found from seed chunks";
pub const FALLBACK_SHORT_CHAINS: &str = "All chains had only 1 chunk (minimum 2 required)";
pub const FALLBACK_NOT_QUALIFYING: &str = "No chain met the qualifying threshold";

/// Minimum leftover budget worth spending on a truncated final chunk.
const TRUNCATION_FLOOR_TOKENS: usize = 100;

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub chunk_id: String,
    pub project: String,
    pub score: f64,
    pub source: String,
    pub preview: String,
    pub start_ts: String,
    pub token_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub chunks: Vec<SearchHit>,
    pub token_count: usize,
    pub source_breakdown: BTreeMap<String, usize>,
    pub truncated: bool,
    #[serde(skip)]
    pub query_embedding: Vec<f32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    pub search_hits: usize,
    pub seed_count: usize,
    pub chains_attempted: usize,
    pub chain_lengths: Vec<usize>,
    pub reason: String,
}

/// How an episodic response was produced: a walked chain, or the flat search
/// baseline it fell back to.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum EpisodeResult {
    Chain {
        text: String,
        token_count: usize,
        chunks: Vec<SearchHit>,
        chain_length: usize,
    },
    SearchFallback {
        text: String,
        token_count: usize,
        chunks: Vec<SearchHit>,
        diagnostics: Diagnostics,
    },
}

impl EpisodeResult {
    pub fn mode(&self) -> &'static str {
        match self {
            EpisodeResult::Chain { .. } => "chain",
            EpisodeResult::SearchFallback { .. } => "search-fallback",
        }
    }

    pub fn fallback_reason(&self) -> Option<&str> {
        match self {
            EpisodeResult::Chain { .. } => None,
            EpisodeResult::SearchFallback { diagnostics, .. } => {
                Some(diagnostics.reason.as_str())
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct EpisodeConfig {
    pub search: HybridSearchConfig,
    pub walk: WalkConfig,
    pub max_tokens: usize,
    /// Chains whose median similarity falls below this do not qualify.
    pub min_chain_similarity: f64,
}

impl Default for EpisodeConfig {
    fn default() -> Self {
        Self {
            search: HybridSearchConfig::default(),
            walk: WalkConfig::default(),
            max_tokens: 2000,
            min_chain_similarity: 0.0,
        }
    }
}

/// Flat search response under a token budget: chunks are added in result
/// order until the next one would overflow; a generous leftover budget is
/// spent on a paragraph-truncated final chunk.
pub fn assemble_search(
    db: &Database,
    outcome: &SearchOutcome,
    max_tokens: usize,
) -> Result<SearchResponse> {
    let mut chunks = Vec::new();
    let mut token_count = 0usize;
    let mut truncated = false;
    let mut source_breakdown: BTreeMap<String, usize> = BTreeMap::new();

    for hit in &outcome.hits {
        let Some(chunk) = db.get_chunk(&hit.chunk_id)? else {
            continue;
        };

        if token_count + chunk.token_count > max_tokens {
            let leftover = max_tokens - token_count;
            if leftover > TRUNCATION_FLOOR_TOKENS
                && let Some(cut) = truncate_at_paragraph(&chunk.text, leftover)
            {
                let cut_tokens = estimate_tokens(&cut);
                *source_breakdown
                    .entry(hit.source.as_str().to_string())
                    .or_insert(0) += 1;
                chunks.push(SearchHit {
                    chunk_id: chunk.id.clone(),
                    project: chunk.project.clone(),
                    score: hit.score,
                    source: hit.source.as_str().to_string(),
                    preview: chunk.preview(120),
                    start_ts: chunk.start_ts.clone(),
                    token_count: cut_tokens,
                });
                token_count += cut_tokens;
            }
            truncated = true;
            break;
        }

        token_count += chunk.token_count;
        *source_breakdown
            .entry(hit.source.as_str().to_string())
            .or_insert(0) += 1;
        chunks.push(SearchHit {
            chunk_id: chunk.id.clone(),
            project: chunk.project.clone(),
            score: hit.score,
            source: hit.source.as_str().to_string(),
            preview: chunk.preview(120),
            start_ts: chunk.start_ts.clone(),
            token_count: chunk.token_count,
        });
    }

    Ok(SearchResponse {
        chunks,
        token_count,
        source_breakdown,
        truncated,
        query_embedding: outcome.query_embedding.clone(),
    })
}

/// Episodic retrieval: search for seeds, walk a chain in the given
/// direction, fall back to flat search with a diagnosed reason when no chain
/// qualifies. `Direction::Backward` is recall, `Direction::Forward` predict.
pub fn episode(
    db: &Database,
    query_text: &str,
    query_embedding: &[f32],
    project: Option<&str>,
    direction: Direction,
    cfg: &EpisodeConfig,
) -> Result<EpisodeResult> {
    let outcome = hybrid_search(db, query_text, query_embedding, project, &cfg.search)?;

    if outcome.hits.is_empty() {
        return fallback(db, &outcome, cfg, 0, Vec::new(), FALLBACK_NO_CHUNKS);
    }
    if outcome.seeds.is_empty() {
        return fallback(db, &outcome, cfg, 0, Vec::new(), FALLBACK_NO_SEEDS);
    }

    // Seeds with no edge in the walking direction cannot start a chain.
    let mut any_edges = false;
    for seed in &outcome.seeds {
        let has_edge = match direction {
            Direction::Forward => !db.edges_from(seed)?.is_empty(),
            Direction::Backward => !db.edges_to(seed)?.is_empty(),
        };
        if has_edge {
            any_edges = true;
            break;
        }
    }
    if !any_edges {
        return fallback(db, &outcome, cfg, 0, Vec::new(), FALLBACK_NO_EDGES);
    }

    let walked = walk_all_chains(db, &outcome.seeds, direction, query_embedding, &cfg.walk)?;
    let attempted = walked.len();
    let lengths: Vec<usize> = walked.iter().map(|c| c.chunk_ids.len()).collect();

    let qualifying: Vec<Chain> = select_chains(walked)
        .into_iter()
        .filter(|c| c.median_similarity() >= cfg.min_chain_similarity)
        .collect();

    let Some(best) = qualifying.first() else {
        let reason = if lengths.iter().all(|&l| l <= 1) {
            FALLBACK_SHORT_CHAINS
        } else {
            FALLBACK_NOT_QUALIFYING
        };
        return fallback(db, &outcome, cfg, attempted, lengths, reason);
    };

    tracing::debug!(
        chain_length = best.chunk_ids.len(),
        median = best.median_similarity(),
        "selected chain"
    );
    assemble_chain(db, best, cfg.max_tokens)
}

fn fallback(
    db: &Database,
    outcome: &SearchOutcome,
    cfg: &EpisodeConfig,
    chains_attempted: usize,
    chain_lengths: Vec<usize>,
    reason: &str,
) -> Result<EpisodeResult> {
    let search = assemble_search(db, outcome, cfg.max_tokens)?;
    let text = search
        .chunks
        .iter()
        .map(|hit| format!("[{} | {}] {}", hit.project, date_of(&hit.start_ts), hit.preview))
        .collect::<Vec<_>>()
        .join("\n");

    tracing::debug!(reason, "episodic retrieval fell back to search");

    Ok(EpisodeResult::SearchFallback {
        token_count: search.token_count,
        diagnostics: Diagnostics {
            search_hits: search.chunks.len(),
            seed_count: outcome.seeds.len(),
            chains_attempted,
            chain_lengths,
            reason: reason.to_string(),
        },
        chunks: search.chunks,
        text,
    })
}

/// Format the best chain with per-chunk headers, joined by separator lines,
/// under the response token budget.
fn assemble_chain(db: &Database, chain: &Chain, max_tokens: usize) -> Result<EpisodeResult> {
    let total = chain.chunk_ids.len();
    let mut blocks: Vec<String> = Vec::new();
    let mut hits: Vec<SearchHit> = Vec::new();
    let mut token_count = 0usize;

    for (i, chunk_id) in chain.chunk_ids.iter().enumerate() {
        let Some(chunk) = db.get_chunk(chunk_id)? else {
            continue;
        };

        let header = if chunk.agent_id == MAIN_AGENT {
            format!("[{}/{} | {} | {}]", i + 1, total, chunk.project, date_of(&chunk.start_ts))
        } else {
            format!(
                "[{}/{} | {} | {} | {}]",
                i + 1,
                total,
                chunk.project,
                chunk.agent_id,
                date_of(&chunk.start_ts)
            )
        };

        let block = format!("{}\n{}", header, chunk.text);
        let block_tokens = estimate_tokens(&block);
        if token_count + block_tokens > max_tokens && !blocks.is_empty() {
            let leftover = max_tokens.saturating_sub(token_count);
            if leftover > TRUNCATION_FLOOR_TOKENS
                && let Some(cut) = truncate_at_paragraph(&chunk.text, leftover)
            {
                let cut_block = format!("{}\n{}", header, cut);
                token_count += estimate_tokens(&cut_block);
                blocks.push(cut_block);
            }
            break;
        }

        token_count += block_tokens;
        blocks.push(block);
        hits.push(SearchHit {
            chunk_id: chunk.id.clone(),
            project: chunk.project.clone(),
            score: chain.similarities.get(i).copied().unwrap_or(0.0),
            source: "chain".to_string(),
            preview: chunk.preview(120),
            start_ts: chunk.start_ts.clone(),
            token_count: chunk.token_count,
        });
    }

    Ok(EpisodeResult::Chain {
        text: blocks.join("\n---\n"),
        token_count,
        chain_length: total,
        chunks: hits,
    })
}

fn date_of(ts: &str) -> &str {
    if ts.len() >= 10 { &ts[..10] } else { ts }
}

/// Cut text at a paragraph boundary so it fits the token budget, marker
/// included. Returns None when not even the first paragraph fits.
fn truncate_at_paragraph(text: &str, max_tokens: usize) -> Option<String> {
    let budget = max_tokens.saturating_sub(estimate_tokens("\n...(truncated)"));
    let mut kept = String::new();
    for paragraph in text.split("\n\n") {
        let candidate_tokens = estimate_tokens(&kept) + estimate_tokens(paragraph);
        if candidate_tokens > budget {
            break;
        }
        if !kept.is_empty() {
            kept.push_str("\n\n");
        }
        kept.push_str(paragraph);
    }
    if kept.is_empty() {
        None
    } else {
        Some(kept + "\n...(truncated)")
    }
}
