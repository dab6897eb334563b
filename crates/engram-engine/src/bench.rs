use serde::Serialize;
use std::time::Instant;

use engram_index::Database;

use crate::search::{HybridSearchConfig, hybrid_search};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy)]
pub struct BenchmarkConfig {
    /// How many chunks to sample for self-retrieval and latency.
    pub sample: usize,
    /// Rank cutoff for the hit rate.
    pub k: usize,
    /// Below this corpus size the benchmark refuses to run.
    pub min_chunks: usize,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            sample: 50,
            k: 5,
            min_chunks: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ClusterHealth {
    pub clusters: usize,
    /// Fraction of embedded chunks with a cluster membership.
    pub coverage: f64,
    pub mean_member_distance: f64,
    pub noise_fraction: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrievalQuality {
    pub queries: usize,
    pub hit_rate_at_k: f64,
    pub mean_reciprocal_rank: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LatencyStats {
    pub p50_ms: f64,
    pub p95_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkReport {
    pub chunk_count: usize,
    pub cluster_health: ClusterHealth,
    pub retrieval_quality: RetrievalQuality,
    pub latency: LatencyStats,
    pub advice: Vec<String>,
}

/// Measure the store against itself: cluster health, self-retrieval
/// quality, and search latency percentiles, with closed-rule tuning advice.
///
/// Self-retrieval embeds nothing: each sampled chunk queries the hybrid
/// pipeline with its own stored embedding and text, and we look for the
/// chunk in its own results. A healthy store finds itself near rank one.
pub fn run_benchmark(
    db: &Database,
    project: Option<&str>,
    search_cfg: &HybridSearchConfig,
    cfg: &BenchmarkConfig,
) -> Result<BenchmarkReport> {
    let chunk_count = match project {
        Some(p) => db.chunk_count_for_project(p)?,
        None => db.chunk_count()?,
    };
    if chunk_count < cfg.min_chunks {
        return Err(Error::ThresholdNotMet(format!(
            "benchmark needs at least {} chunks, store has {}",
            cfg.min_chunks, chunk_count
        )));
    }

    let cluster_health = measure_clusters(db, project)?;

    // Evenly spaced sample over the embedding list, deterministic.
    let embeddings = db.all_embeddings(project)?;
    let stride = (embeddings.len() / cfg.sample.max(1)).max(1);
    let sample: Vec<&(String, Vec<f32>)> = embeddings.iter().step_by(stride).take(cfg.sample).collect();

    let mut hits = 0usize;
    let mut reciprocal_ranks = 0.0f64;
    let mut latencies_ms: Vec<f64> = Vec::with_capacity(sample.len());

    for (chunk_id, embedding) in sample.iter().copied() {
        let text = db
            .get_chunk(chunk_id)?
            .map(|c| c.text)
            .unwrap_or_default();

        let started = Instant::now();
        let outcome = hybrid_search(db, &text, embedding, project, search_cfg)?;
        latencies_ms.push(started.elapsed().as_secs_f64() * 1000.0);

        if let Some(rank) = outcome
            .hits
            .iter()
            .position(|h| h.chunk_id == *chunk_id)
        {
            reciprocal_ranks += 1.0 / (rank + 1) as f64;
            if rank < cfg.k {
                hits += 1;
            }
        }
    }

    let queries = sample.len().max(1);
    let retrieval_quality = RetrievalQuality {
        queries: sample.len(),
        hit_rate_at_k: hits as f64 / queries as f64,
        mean_reciprocal_rank: reciprocal_ranks / queries as f64,
    };

    latencies_ms.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let latency = LatencyStats {
        p50_ms: percentile(&latencies_ms, 0.50),
        p95_ms: percentile(&latencies_ms, 0.95),
    };

    let advice = advise(&cluster_health, &retrieval_quality, &latency);

    Ok(BenchmarkReport {
        chunk_count,
        cluster_health,
        retrieval_quality,
        latency,
        advice,
    })
}

fn measure_clusters(db: &Database, project: Option<&str>) -> Result<ClusterHealth> {
    let embedded = db.all_embeddings(project)?.len();
    let clusters = db.list_cluster_ids()?;

    let mut member_total = 0usize;
    let mut distance_total = 0.0f64;
    for cluster_id in &clusters {
        for member in db.cluster_members(cluster_id)? {
            member_total += 1;
            distance_total += member.distance;
        }
    }

    let coverage = if embedded == 0 {
        0.0
    } else {
        member_total as f64 / embedded as f64
    };
    Ok(ClusterHealth {
        clusters: clusters.len(),
        coverage,
        mean_member_distance: if member_total == 0 {
            0.0
        } else {
            distance_total / member_total as f64
        },
        noise_fraction: 1.0 - coverage,
    })
}

fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() as f64 - 1.0) * q).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn advise(
    clusters: &ClusterHealth,
    quality: &RetrievalQuality,
    latency: &LatencyStats,
) -> Vec<String> {
    let mut advice = Vec::new();
    if clusters.clusters == 0 {
        advice.push("no clusters yet; run a recluster pass".to_string());
    } else if clusters.coverage < 0.5 {
        advice.push(
            "cluster coverage below 50%; raise clustering.threshold or lower clustering.min_cluster_size"
                .to_string(),
        );
    }
    if clusters.mean_member_distance > 0.3 && clusters.clusters > 0 {
        advice.push(
            "clusters are loose; lower clustering.threshold for tighter groups".to_string(),
        );
    }
    if quality.hit_rate_at_k < 0.9 {
        advice.push(
            "self-retrieval misses; check that the embedder matches the one used at ingest"
                .to_string(),
        );
    }
    if latency.p95_ms > 500.0 {
        advice.push(
            "p95 latency over 500ms; reduce hybrid_search limits or prune with vectors.ttl_days"
                .to_string(),
        );
    }
    if advice.is_empty() {
        advice.push("store is healthy; no tuning needed".to_string());
    }
    advice
}
