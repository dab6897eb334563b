use std::collections::{HashMap, HashSet};

use engram_index::Database;
use engram_types::{Direction, angular_distance};

use crate::Result;

#[derive(Debug, Clone, Copy)]
pub struct WalkConfig {
    /// Longest chain measured in hops from the seed.
    pub max_depth: usize,
    /// Global token budget shared by every seed walk.
    pub budget_tokens: usize,
}

impl Default for WalkConfig {
    fn default() -> Self {
        Self {
            max_depth: 10,
            budget_tokens: 2000,
        }
    }
}

/// A walked chain: chunk ids in output order with per-node query similarity.
#[derive(Debug, Clone)]
pub struct Chain {
    pub chunk_ids: Vec<String>,
    pub similarities: Vec<f64>,
    pub token_count: usize,
}

impl Chain {
    /// Median per-node similarity; robust to a single outlier node.
    pub fn median_similarity(&self) -> f64 {
        if self.similarities.is_empty() {
            return 0.0;
        }
        let mut sorted = self.similarities.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let mid = sorted.len() / 2;
        if sorted.len() % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[mid]
        }
    }
}

/// Walk greedy chains from each seed and keep only the qualifying ones,
/// ranked best first. See [`walk_all_chains`] for the raw walks.
pub fn walk_chains(
    db: &Database,
    seeds: &[String],
    direction: Direction,
    query_embedding: &[f32],
    cfg: &WalkConfig,
) -> Result<Vec<Chain>> {
    Ok(select_chains(walk_all_chains(
        db,
        seeds,
        direction,
        query_embedding,
        cfg,
    )?))
}

/// Filter and rank walked chains: fewer than two chunks never qualifies;
/// the rest sort by median per-node similarity, best first.
pub fn select_chains(mut chains: Vec<Chain>) -> Vec<Chain> {
    chains.retain(|c| c.chunk_ids.len() >= 2);
    chains.sort_by(|a, b| {
        b.median_similarity()
            .partial_cmp(&a.median_similarity())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    chains
}

/// Walk greedy chains from each seed along directed edges.
///
/// A single visited set is shared across seed walks and the token budget is
/// spent monotonically, so later seeds only explore what earlier walks left
/// behind. Backward walks (recall) are reversed before returning so the
/// output always reads chronologically. Chains are returned unfiltered, in
/// seed order.
pub fn walk_all_chains(
    db: &Database,
    seeds: &[String],
    direction: Direction,
    query_embedding: &[f32],
    cfg: &WalkConfig,
) -> Result<Vec<Chain>> {
    let mut visited: HashSet<String> = HashSet::new();
    let mut budget_left = cfg.budget_tokens;
    let mut chains: Vec<Chain> = Vec::new();

    for seed in seeds {
        if visited.contains(seed) {
            continue;
        }
        let Some(seed_chunk) = db.get_chunk(seed)? else {
            continue;
        };

        visited.insert(seed.clone());
        let mut chain = Chain {
            chunk_ids: vec![seed.clone()],
            similarities: vec![node_similarity(db, seed, query_embedding)?],
            token_count: seed_chunk.token_count,
        };
        budget_left = budget_left.saturating_sub(seed_chunk.token_count);

        let mut current = seed.clone();
        let mut depth = 0usize;
        loop {
            if depth >= cfg.max_depth {
                break;
            }
            // First unvisited neighbour in edge insertion order.
            let neighbour = match direction {
                Direction::Forward => db
                    .edges_from(&current)?
                    .into_iter()
                    .map(|e| e.target)
                    .find(|id| !visited.contains(id)),
                Direction::Backward => db
                    .edges_to(&current)?
                    .into_iter()
                    .map(|e| e.source)
                    .find(|id| !visited.contains(id)),
            };
            let Some(next) = neighbour else {
                break;
            };
            let Some(next_chunk) = db.get_chunk(&next)? else {
                break;
            };
            if next_chunk.token_count > budget_left && chain.chunk_ids.len() >= 2 {
                break;
            }

            visited.insert(next.clone());
            budget_left = budget_left.saturating_sub(next_chunk.token_count);
            chain.token_count += next_chunk.token_count;
            chain
                .similarities
                .push(node_similarity(db, &next, query_embedding)?);
            chain.chunk_ids.push(next.clone());
            current = next;
            depth += 1;
        }

        if direction == Direction::Backward {
            // Reconstructed cause-to-effect: reverse so output reads
            // chronologically.
            chain.chunk_ids.reverse();
            chain.similarities.reverse();
        }
        chains.push(chain);
    }

    Ok(chains)
}

fn node_similarity(db: &Database, chunk_id: &str, query_embedding: &[f32]) -> Result<f64> {
    Ok(db
        .get_embedding(chunk_id)?
        .filter(|v| v.len() == query_embedding.len())
        .map(|v| 1.0 - angular_distance(query_embedding, &v))
        .unwrap_or(0.0))
}

/// Sum-product reachability over the weighted edge graph.
///
/// Path weights multiply along edges; a node reachable over several paths
/// accumulates their sum. Paths are abandoned once their product drops below
/// `min_weight`; with all effective weights below one, cyclic paths
/// attenuate geometrically, and `max_depth` bounds the exploration
/// regardless. The start node is excluded from the output.
#[derive(Debug, Clone, Copy)]
pub struct TraversalConfig {
    pub max_depth: usize,
    pub min_weight: f64,
}

impl Default for TraversalConfig {
    fn default() -> Self {
        Self {
            max_depth: 10,
            min_weight: 0.01,
        }
    }
}

/// Generic core, parameterized over the weighted-neighbour source so the
/// store-backed and in-memory cases share the arithmetic.
pub fn sum_product_traverse<F>(
    neighbours: F,
    start: &str,
    cfg: &TraversalConfig,
) -> Result<Vec<(String, f64)>>
where
    F: Fn(&str) -> Result<Vec<(String, f64)>>,
{
    let mut accumulated: HashMap<String, f64> = HashMap::new();
    // Depth-first over (node, product, depth); no cycle check by design.
    let mut stack: Vec<(String, f64, usize)> = vec![(start.to_string(), 1.0, 0)];

    while let Some((node, product, depth)) = stack.pop() {
        if depth >= cfg.max_depth {
            continue;
        }
        for (next, weight) in neighbours(&node)? {
            let next_product = product * weight;
            if next_product < cfg.min_weight {
                continue;
            }
            if next != start {
                *accumulated.entry(next.clone()).or_insert(0.0) += next_product;
            }
            stack.push((next, next_product, depth + 1));
        }
    }

    let mut result: Vec<(String, f64)> = accumulated.into_iter().collect();
    result.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    Ok(result)
}

/// Store-backed sum-product read: effective edge weights are the stored
/// initial weight times link boost times the direction-appropriate decay
/// against the project reference clock.
pub fn weighted_reach(
    db: &Database,
    start: &str,
    direction: Direction,
    project: &str,
    decay: &engram_types::DecayConfig,
    cfg: &TraversalConfig,
) -> Result<Vec<(String, f64)>> {
    let reference = db.project_reference_clock(project)?;
    let now = chrono::Utc::now();

    sum_product_traverse(
        |node| {
            let edges = match direction {
                Direction::Forward => db.edges_from(node)?,
                Direction::Backward => db.edges_to(node)?,
            };
            Ok(edges
                .into_iter()
                .map(|edge| {
                    let weight =
                        engram_types::effective_weight(&edge, direction, &reference, now, decay);
                    let next = match direction {
                        Direction::Forward => edge.target,
                        Direction::Backward => edge.source,
                    };
                    (next, weight)
                })
                .collect())
        },
        start,
        cfg,
    )
}
