use serde::{Deserialize, Serialize};

/// A dense region of embeddings produced by the density clustering pass.
///
/// Clusters are not owned by chunks: a cluster survives the deletion of some
/// members and is destroyed only by a reclustering pass or explicit drop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub id: String,
    /// Human name/description, refreshed asynchronously by an external
    /// summarizer; nullable until then.
    pub name: Option<String>,
    pub description: Option<String>,
    pub created_at: String,
    pub refreshed_at: Option<String>,
    pub member_count: usize,
    /// Chunk ids closest to the cluster medoid, capped small.
    pub exemplars: Vec<String>,
}

/// Membership row linking a chunk to its (single) cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterMember {
    pub chunk_id: String,
    pub cluster_id: String,
    /// Angular distance from the chunk to the cluster medoid.
    pub distance: f64,
}
