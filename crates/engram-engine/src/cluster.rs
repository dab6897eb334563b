use chrono::{DateTime, Utc};
use serde::Serialize;

use engram_index::Database;
use engram_types::{Cluster, ClusterMember, angular_distance};

use crate::Result;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ClusteringConfig {
    /// Angular-distance cut for neighbourhood membership.
    pub threshold: f64,
    /// Minimum points for a dense region to become a cluster.
    pub min_cluster_size: usize,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            threshold: 0.35,
            min_cluster_size: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReclusterSummary {
    pub clusters: usize,
    pub clustered: usize,
    pub noise: usize,
}

const EXEMPLAR_COUNT: usize = 3;

/// Density-based reclustering over all embeddings (optionally one project).
///
/// A point with at least `min_cluster_size` neighbours inside the threshold
/// is dense; dense regions grow by neighbourhood expansion, and points
/// reachable from a dense point join its cluster. Everything else is noise.
/// The resulting membership replaces the previous one atomically.
pub fn recluster(
    db: &Database,
    project: Option<&str>,
    cfg: &ClusteringConfig,
    now: DateTime<Utc>,
) -> Result<ReclusterSummary> {
    let points = db.all_embeddings(project)?;
    let n = points.len();

    // Pairwise distances once; the corpus fits comfortably in memory at the
    // scales a per-user store sees.
    let mut dist = vec![0.0f64; n * n];
    for i in 0..n {
        for j in (i + 1)..n {
            let d = angular_distance(&points[i].1, &points[j].1);
            dist[i * n + j] = d;
            dist[j * n + i] = d;
        }
    }
    let neighbours = |i: usize| -> Vec<usize> {
        (0..n)
            .filter(|&j| j != i && dist[i * n + j] <= cfg.threshold)
            .collect()
    };

    // DBSCAN-style expansion from dense points.
    const UNASSIGNED: usize = usize::MAX;
    let mut assignment = vec![UNASSIGNED; n];
    let mut cluster_count = 0usize;

    for i in 0..n {
        if assignment[i] != UNASSIGNED {
            continue;
        }
        let seeds = neighbours(i);
        if seeds.len() + 1 < cfg.min_cluster_size {
            continue; // not dense; may still join a cluster as a border point
        }

        let cluster_idx = cluster_count;
        cluster_count += 1;
        assignment[i] = cluster_idx;

        let mut queue: Vec<usize> = seeds;
        while let Some(j) = queue.pop() {
            if assignment[j] != UNASSIGNED {
                continue;
            }
            assignment[j] = cluster_idx;
            let j_neighbours = neighbours(j);
            if j_neighbours.len() + 1 >= cfg.min_cluster_size {
                queue.extend(
                    j_neighbours
                        .into_iter()
                        .filter(|&k| assignment[k] == UNASSIGNED),
                );
            }
        }
    }

    // Medoid, exemplars and member distances per cluster.
    let mut clusters: Vec<Cluster> = Vec::new();
    let mut members: Vec<ClusterMember> = Vec::new();

    for cluster_idx in 0..cluster_count {
        let indices: Vec<usize> = (0..n).filter(|&i| assignment[i] == cluster_idx).collect();

        let medoid = indices
            .iter()
            .copied()
            .min_by(|&a, &b| {
                let sum_a: f64 = indices.iter().map(|&j| dist[a * n + j]).sum();
                let sum_b: f64 = indices.iter().map(|&j| dist[b * n + j]).sum();
                sum_a
                    .partial_cmp(&sum_b)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| points[a].0.cmp(&points[b].0))
            })
            .expect("cluster has members");

        let mut by_distance: Vec<(usize, f64)> = indices
            .iter()
            .map(|&i| (i, dist[medoid * n + i]))
            .collect();
        by_distance.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| points[a.0].0.cmp(&points[b.0].0))
        });

        let cluster_id = format!("cl-{}", points[medoid].0);
        clusters.push(Cluster {
            id: cluster_id.clone(),
            name: None,
            description: None,
            created_at: now.to_rfc3339(),
            refreshed_at: None,
            member_count: indices.len(),
            exemplars: by_distance
                .iter()
                .take(EXEMPLAR_COUNT)
                .map(|(i, _)| points[*i].0.clone())
                .collect(),
        });
        for (i, d) in by_distance {
            members.push(ClusterMember {
                chunk_id: points[i].0.clone(),
                cluster_id: cluster_id.clone(),
                distance: d,
            });
        }
    }

    db.replace_clusters(&clusters, &members)?;

    let clustered = members.len();
    tracing::info!(
        clusters = clusters.len(),
        clustered,
        noise = n - clustered,
        "reclustering pass complete"
    );
    Ok(ReclusterSummary {
        clusters: clusters.len(),
        clustered,
        noise: n - clustered,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_types::{Chunk, VectorClock, normalize};

    fn insert_chunk(db: &Database, id: &str, embedding: &[f32]) {
        let chunk = Chunk {
            id: id.to_string(),
            text: format!("text {}", id),
            token_count: 10,
            project: "p".to_string(),
            session_id: "s".to_string(),
            agent_id: "main".to_string(),
            spawn_depth: 0,
            start_ts: "2025-01-01T00:00:00Z".to_string(),
            end_ts: "2025-01-01T00:00:00Z".to_string(),
            code_block_count: 0,
            tool_use_count: 0,
            has_thinking: false,
            turn_indices: vec![0],
            clock: VectorClock::new(),
        };
        db.insert_chunk(&chunk).unwrap();
        let mut v = embedding.to_vec();
        normalize(&mut v);
        db.insert_embedding(id, &v).unwrap();
    }

    fn seed_two_groups(db: &Database) {
        // Tight group around the x axis, tight group around the y axis,
        // one straggler between them.
        insert_chunk(db, "x1", &[1.0, 0.02, 0.0]);
        insert_chunk(db, "x2", &[1.0, 0.04, 0.0]);
        insert_chunk(db, "x3", &[1.0, 0.06, 0.0]);
        insert_chunk(db, "y1", &[0.02, 1.0, 0.0]);
        insert_chunk(db, "y2", &[0.04, 1.0, 0.0]);
        insert_chunk(db, "y3", &[0.06, 1.0, 0.0]);
        insert_chunk(db, "stray", &[0.7, 0.7, 0.2]);
    }

    #[test]
    fn test_two_groups_two_clusters() {
        let db = Database::open_in_memory().unwrap();
        seed_two_groups(&db);

        let summary = recluster(
            &db,
            Some("p"),
            &ClusteringConfig {
                threshold: 0.2,
                min_cluster_size: 3,
            },
            Utc::now(),
        )
        .unwrap();

        assert_eq!(summary.clusters, 2);
        assert_eq!(summary.clustered, 6);
        assert_eq!(summary.noise, 1);

        let x_cluster = db.cluster_of_chunk("x1").unwrap().unwrap();
        assert_eq!(
            db.cluster_of_chunk("x2").unwrap().unwrap().cluster_id,
            x_cluster.cluster_id
        );
        assert_ne!(
            db.cluster_of_chunk("y1").unwrap().unwrap().cluster_id,
            x_cluster.cluster_id
        );
        assert!(db.cluster_of_chunk("stray").unwrap().is_none());
    }

    #[test]
    fn test_min_cluster_size_filters_pairs() {
        let db = Database::open_in_memory().unwrap();
        insert_chunk(&db, "a", &[1.0, 0.0, 0.0]);
        insert_chunk(&db, "b", &[1.0, 0.01, 0.0]);

        let summary = recluster(
            &db,
            Some("p"),
            &ClusteringConfig {
                threshold: 0.2,
                min_cluster_size: 3,
            },
            Utc::now(),
        )
        .unwrap();
        assert_eq!(summary.clusters, 0);
        assert_eq!(summary.noise, 2);
    }

    #[test]
    fn test_recluster_replaces_previous_membership() {
        let db = Database::open_in_memory().unwrap();
        seed_two_groups(&db);
        let cfg = ClusteringConfig {
            threshold: 0.2,
            min_cluster_size: 3,
        };
        recluster(&db, Some("p"), &cfg, Utc::now()).unwrap();
        let first = db.cluster_count().unwrap();

        // Second pass over the same data: same number of clusters, not
        // accumulation.
        recluster(&db, Some("p"), &cfg, Utc::now()).unwrap();
        assert_eq!(db.cluster_count().unwrap(), first);
    }

    #[test]
    fn test_exemplars_start_at_medoid() {
        let db = Database::open_in_memory().unwrap();
        seed_two_groups(&db);
        recluster(
            &db,
            Some("p"),
            &ClusteringConfig {
                threshold: 0.2,
                min_cluster_size: 3,
            },
            Utc::now(),
        )
        .unwrap();

        let membership = db.cluster_of_chunk("x2").unwrap().unwrap();
        let cluster = db.get_cluster(&membership.cluster_id).unwrap().unwrap();
        assert!(!cluster.exemplars.is_empty());
        // The medoid names the cluster and leads the exemplar list.
        assert_eq!(format!("cl-{}", cluster.exemplars[0]), cluster.id);
    }

    #[test]
    fn test_empty_store_reclusters_to_nothing() {
        let db = Database::open_in_memory().unwrap();
        let summary =
            recluster(&db, None, &ClusteringConfig::default(), Utc::now()).unwrap();
        assert_eq!(summary.clusters, 0);
        assert_eq!(summary.noise, 0);
    }
}
