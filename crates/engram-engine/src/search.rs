use std::collections::{HashMap, HashSet};

use engram_index::Database;
use engram_types::{dot, similarity_from_distance};

use crate::Result;

#[derive(Debug, Clone)]
pub struct HybridSearchConfig {
    pub vector_search_limit: usize,
    pub keyword_search_limit: usize,
    pub rrf_k: f64,
    pub vector_weight: f64,
    pub keyword_weight: f64,
    pub max_clusters: usize,
    pub max_siblings: usize,
    pub sibling_attenuation: f64,
    pub mmr_lambda: f64,
    /// Min-max normalize fused scores before mixing with similarity.
    pub mmr_normalize: bool,
    /// How many top fused chunks become chain-walking seeds.
    pub seed_count: usize,
    /// A/B switch: drop the cluster-expansion list entirely.
    pub skip_clusters: bool,
    /// Multiplier applied to chunks whose edges agree with the result set.
    pub graph_boost: f64,
}

impl Default for HybridSearchConfig {
    fn default() -> Self {
        Self {
            vector_search_limit: 20,
            keyword_search_limit: 20,
            rrf_k: 60.0,
            vector_weight: 1.0,
            keyword_weight: 1.0,
            max_clusters: 3,
            max_siblings: 5,
            sibling_attenuation: 0.3,
            mmr_lambda: 0.7,
            mmr_normalize: true,
            seed_count: 3,
            skip_clusters: false,
            graph_boost: 1.1,
        }
    }
}

/// Where a fused chunk was credited from. Ordering is informativeness:
/// graph agreement beats cluster expansion beats keyword beats vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SearchSource {
    Vector,
    Keyword,
    Cluster,
    Graph,
}

impl SearchSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchSource::Vector => "vector",
            SearchSource::Keyword => "keyword",
            SearchSource::Cluster => "cluster",
            SearchSource::Graph => "graph",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FusedHit {
    pub chunk_id: String,
    pub score: f64,
    pub source: SearchSource,
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    /// Final, MMR-diversified ranking.
    pub hits: Vec<FusedHit>,
    /// Top fused chunk ids (pre-diversification), for chain walking.
    pub seeds: Vec<String>,
    pub query_embedding: Vec<f32>,
}

/// Hybrid retrieval: dense + lexical + cluster expansion, fused by weighted
/// reciprocal rank, graph-agreement boosted, MMR-diversified.
///
/// The query embedding is computed once by the caller and reused by every
/// stage so search, expansion and chain scoring all see the same vector.
pub fn hybrid_search(
    db: &Database,
    query_text: &str,
    query_embedding: &[f32],
    project: Option<&str>,
    cfg: &HybridSearchConfig,
) -> Result<SearchOutcome> {
    // 1. Dense list: ascending distance becomes descending similarity.
    let vector_hits: Vec<(String, f64)> = db
        .nearest_embeddings(query_embedding, cfg.vector_search_limit, project)?
        .into_iter()
        .map(|(id, dist)| (id, similarity_from_distance(dist)))
        .collect();

    // 2. Lexical list, already descending.
    let keyword_hits = db.search_lexical(query_text, cfg.keyword_search_limit, project)?;

    // 3. Cluster expansion off the top-ranked base hits.
    let cluster_hits = if cfg.skip_clusters {
        Vec::new()
    } else {
        expand_clusters(db, &vector_hits, &keyword_hits, cfg)?
    };

    tracing::debug!(
        vector = vector_hits.len(),
        keyword = keyword_hits.len(),
        cluster = cluster_hits.len(),
        "hybrid search lists"
    );

    // 4. Weighted reciprocal rank fusion.
    let mut fused: HashMap<String, f64> = HashMap::new();
    for (list, weight) in [
        (&vector_hits, cfg.vector_weight),
        (&keyword_hits, cfg.keyword_weight),
        (&cluster_hits, 1.0),
    ] {
        for (rank, (id, _)) in list.iter().enumerate() {
            *fused.entry(id.clone()).or_insert(0.0) += weight / (cfg.rrf_k + (rank + 1) as f64);
        }
    }

    // 5. Graph agreement: a fused chunk connected by an edge to another
    // fused chunk is corroborated by the causal graph.
    let candidate_ids: HashSet<&str> = fused.keys().map(|s| s.as_str()).collect();
    let mut graph_credited: HashSet<String> = HashSet::new();
    for id in fused.keys() {
        for edge in db.edges_from(id)? {
            if candidate_ids.contains(edge.target.as_str()) {
                graph_credited.insert(id.clone());
                graph_credited.insert(edge.target.clone());
            }
        }
    }
    for id in &graph_credited {
        if let Some(score) = fused.get_mut(id) {
            *score *= cfg.graph_boost;
        }
    }

    // 6. Source credit: most informative list a chunk appears in.
    let keyword_ids: HashSet<&str> = keyword_hits.iter().map(|(id, _)| id.as_str()).collect();
    let cluster_ids: HashSet<&str> = cluster_hits.iter().map(|(id, _)| id.as_str()).collect();
    let source_of = |id: &str| {
        if graph_credited.contains(id) {
            SearchSource::Graph
        } else if cluster_ids.contains(id) {
            SearchSource::Cluster
        } else if keyword_ids.contains(id) {
            SearchSource::Keyword
        } else {
            SearchSource::Vector
        }
    };

    let mut ranked: Vec<FusedHit> = fused
        .into_iter()
        .map(|(chunk_id, score)| FusedHit {
            source: source_of(&chunk_id),
            chunk_id,
            score,
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });

    let seeds: Vec<String> = ranked
        .iter()
        .take(cfg.seed_count)
        .map(|h| h.chunk_id.clone())
        .collect();

    // 7. MMR diversification over the fused ranking.
    let hits = mmr_diversify(db, ranked, query_embedding.len(), cfg)?;

    Ok(SearchOutcome {
        hits,
        seeds,
        query_embedding: query_embedding.to_vec(),
    })
}

/// For top-ranked chunks with a known cluster, pull in close siblings.
/// Sibling scores derive from the parent's score times an attenuation.
fn expand_clusters(
    db: &Database,
    vector_hits: &[(String, f64)],
    keyword_hits: &[(String, f64)],
    cfg: &HybridSearchConfig,
) -> Result<Vec<(String, f64)>> {
    let base_ids: HashSet<&str> = vector_hits
        .iter()
        .chain(keyword_hits)
        .map(|(id, _)| id.as_str())
        .collect();

    let mut visited_clusters: HashSet<String> = HashSet::new();
    let mut siblings: Vec<(String, f64)> = Vec::new();

    for (parent_id, parent_score) in vector_hits.iter().chain(keyword_hits) {
        if visited_clusters.len() >= cfg.max_clusters {
            break;
        }
        let Some(membership) = db.cluster_of_chunk(parent_id)? else {
            continue;
        };
        if !visited_clusters.insert(membership.cluster_id.clone()) {
            continue;
        }

        let mut taken = 0;
        for member in db.cluster_members(&membership.cluster_id)? {
            if taken >= cfg.max_siblings {
                break;
            }
            if base_ids.contains(member.chunk_id.as_str())
                || siblings.iter().any(|(id, _)| id == &member.chunk_id)
            {
                continue;
            }
            siblings.push((member.chunk_id, parent_score * cfg.sibling_attenuation));
            taken += 1;
        }
    }

    siblings.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    Ok(siblings)
}

/// Greedy MMR: keep the top hit, then repeatedly add the candidate
/// maximizing `λ·rel − (1−λ)·maxSim` against the picked set.
fn mmr_diversify(
    db: &Database,
    ranked: Vec<FusedHit>,
    dim: usize,
    cfg: &HybridSearchConfig,
) -> Result<Vec<FusedHit>> {
    if ranked.len() <= 2 {
        return Ok(ranked);
    }

    let mut embeddings: HashMap<String, Vec<f32>> = HashMap::new();
    for hit in &ranked {
        if let Some(vector) = db.get_embedding(&hit.chunk_id)?
            && vector.len() == dim
        {
            embeddings.insert(hit.chunk_id.clone(), vector);
        }
    }

    let (min_score, max_score) = ranked
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), h| {
            (lo.min(h.score), hi.max(h.score))
        });
    let span = (max_score - min_score).max(f64::EPSILON);
    let relevance = |score: f64| {
        if cfg.mmr_normalize {
            (score - min_score) / span
        } else {
            score
        }
    };

    let mut remaining = ranked;
    let mut picked: Vec<FusedHit> = vec![remaining.remove(0)];

    while !remaining.is_empty() {
        let mut best_idx = 0;
        let mut best_value = f64::NEG_INFINITY;
        for (idx, candidate) in remaining.iter().enumerate() {
            // Cosine against the picked set; candidates without an
            // embedding count as maximally novel.
            let max_sim = embeddings
                .get(&candidate.chunk_id)
                .map(|vector| {
                    picked
                        .iter()
                        .filter_map(|p| embeddings.get(&p.chunk_id))
                        .map(|other| dot(vector, other))
                        .fold(f64::NEG_INFINITY, f64::max)
                })
                .filter(|s| s.is_finite())
                .unwrap_or(0.0);

            let value =
                cfg.mmr_lambda * relevance(candidate.score) - (1.0 - cfg.mmr_lambda) * max_sim;
            if value > best_value {
                best_value = value;
                best_idx = idx;
            }
        }
        picked.push(remaining.remove(best_idx));
    }

    Ok(picked)
}
