use chrono::{Duration, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use engram_engine::{
    BenchmarkReport, EpisodeResult, ReclusterSummary, ReconstructRequest, ReconstructResponse,
    SearchResponse, assemble_search, episode, hybrid_search, recluster, run_benchmark,
};
use engram_index::{Database, ProjectStat, SessionStat};
use engram_types::{Direction, similarity_from_distance};

use crate::config::{Config, resolve_data_path};
use crate::embed::{Embedder, acquire};
use crate::ingest::{IngestOptions, IngestReport, batch_ingest, ingest_root};
use crate::{Error, Result};

#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub project: Option<String>,
    pub max_tokens: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct ForgetRequest {
    pub project: String,
    pub before: Option<String>,
    pub after: Option<String>,
    pub session_id: Option<String>,
    /// Semantic filter: forget chunks at least this similar to the query.
    pub query: Option<String>,
    pub threshold: Option<f64>,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ForgetSummary {
    pub matched: usize,
    pub deleted: usize,
    pub dry_run: bool,
    pub chunk_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub chunks: usize,
    pub edges: usize,
    pub clusters: usize,
    pub edge_kinds: Vec<(String, usize)>,
    pub projects: Vec<ProjectStat>,
}

/// The memory store facade: owns the database handle, the embedder and the
/// configuration, and exposes the retrieval and ingestion API consumed by
/// the CLI and the tool registry.
pub struct MemoryStore {
    db: Database,
    embedder: Arc<dyn Embedder>,
    config: Config,
}

impl MemoryStore {
    /// Open (or create) the store under a data directory.
    pub fn open(data_dir: Option<&str>) -> Result<Self> {
        let dir = resolve_data_path(data_dir)?;
        let config = Config::load(&dir)?;
        let db = Database::open(&dir.join("engram.db"))?;
        let embedder = acquire(config.vectors.dim)?;
        Ok(Self {
            db,
            embedder,
            config,
        })
    }

    /// Fresh in-memory store with an explicit embedder; the test entry
    /// point and the seam for model-backed embedders.
    pub fn open_in_memory(embedder: Arc<dyn Embedder>, config: Config) -> Result<Self> {
        Ok(Self {
            db: Database::open_in_memory()?,
            embedder,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        if query.trim().is_empty() {
            return Err(Error::InvalidInput("empty query".to_string()));
        }
        self.embedder.embed(query)
    }

    /// Flat semantic search.
    pub fn search(&self, query: &str, opts: &QueryOptions) -> Result<SearchResponse> {
        let embedding = self.embed_query(query)?;
        let outcome = hybrid_search(
            &self.db,
            query,
            &embedding,
            opts.project.as_deref(),
            &self.config.hybrid_search_config(),
        )?;
        let budget = opts.max_tokens.unwrap_or(self.config.tokens.mcp_max_response);
        Ok(assemble_search(&self.db, &outcome, budget)?)
    }

    /// Episodic recall: what led to the queried moment.
    pub fn recall(&self, query: &str, opts: &QueryOptions) -> Result<EpisodeResult> {
        let embedding = self.embed_query(query)?;
        Ok(episode(
            &self.db,
            query,
            &embedding,
            opts.project.as_deref(),
            Direction::Backward,
            &self.config.episode_config(opts.max_tokens),
        )?)
    }

    /// Episodic prediction: what tends to follow the given context.
    pub fn predict(&self, context: &str, opts: &QueryOptions) -> Result<EpisodeResult> {
        let embedding = self.embed_query(context)?;
        Ok(episode(
            &self.db,
            context,
            &embedding,
            opts.project.as_deref(),
            Direction::Forward,
            &self.config.episode_config(opts.max_tokens),
        )?)
    }

    /// Chronological, non-semantic session reconstruction.
    pub fn reconstruct(&self, req: &ReconstructRequest) -> Result<ReconstructResponse> {
        Ok(engram_engine::reconstruct(&self.db, req, Utc::now())?)
    }

    pub fn list_projects(&self) -> Result<Vec<ProjectStat>> {
        Ok(self.db.list_projects()?)
    }

    pub fn list_sessions(
        &self,
        project: &str,
        from: Option<&str>,
        to: Option<&str>,
    ) -> Result<Vec<SessionStat>> {
        Ok(self.db.list_sessions(project, from, to)?)
    }

    /// Delete chunks matching the composed filters. Everything owned by a
    /// chunk cascades; the reference clock is never rolled back.
    pub fn forget(&self, req: &ForgetRequest) -> Result<ForgetSummary> {
        if req.project.trim().is_empty() {
            return Err(Error::InvalidInput("forget requires a project".to_string()));
        }
        if req.query.is_some() != req.threshold.is_some() {
            return Err(Error::InvalidInput(
                "semantic forget requires both query and threshold".to_string(),
            ));
        }

        let mut ids = self.db.chunk_ids_matching(
            &req.project,
            req.before.as_deref(),
            req.after.as_deref(),
            req.session_id.as_deref(),
        )?;

        if let (Some(query), Some(threshold)) = (&req.query, req.threshold) {
            let embedding = self.embed_query(query)?;
            let similar: std::collections::HashSet<String> = self
                .db
                .nearest_embeddings(&embedding, self.db.chunk_count()?, Some(&req.project))?
                .into_iter()
                .filter(|(_, dist)| similarity_from_distance(*dist) >= threshold)
                .map(|(id, _)| id)
                .collect();
            ids.retain(|id| similar.contains(id));
        }

        let matched = ids.len();
        let deleted = if req.dry_run {
            0
        } else {
            self.db.delete_chunks(&ids)?
        };

        tracing::info!(project = %req.project, matched, deleted, dry_run = req.dry_run, "forget");
        Ok(ForgetSummary {
            matched,
            deleted,
            dry_run: req.dry_run,
            chunk_ids: ids,
        })
    }

    /// Age pruning driven by `vectors.ttl_days`. A no-op when disabled.
    pub fn prune_expired(&self, project: &str) -> Result<ForgetSummary> {
        let ttl = self.config.vectors.ttl_days;
        if ttl == 0 {
            return Ok(ForgetSummary {
                matched: 0,
                deleted: 0,
                dry_run: false,
                chunk_ids: Vec::new(),
            });
        }
        let cutoff = (Utc::now() - Duration::days(ttl as i64)).to_rfc3339();
        self.forget(&ForgetRequest {
            project: project.to_string(),
            before: Some(cutoff),
            ..ForgetRequest::default()
        })
    }

    pub fn stats(&self) -> Result<StoreStats> {
        Ok(StoreStats {
            chunks: self.db.chunk_count()?,
            edges: self.db.edge_count()?,
            clusters: self.db.cluster_count()?,
            edge_kinds: self.db.edge_counts_by_kind()?,
            projects: self.db.list_projects()?,
        })
    }

    pub fn recluster(&self, project: Option<&str>) -> Result<ReclusterSummary> {
        Ok(recluster(
            &self.db,
            project,
            &self.config.clustering_config(),
            Utc::now(),
        )?)
    }

    pub fn benchmark(&self, project: Option<&str>) -> Result<BenchmarkReport> {
        Ok(run_benchmark(
            &self.db,
            project,
            &self.config.hybrid_search_config(),
            &self.config.benchmark_config(),
        )?)
    }

    pub fn ingest_root(&self, log_root: &Path, opts: &IngestOptions) -> Result<IngestReport> {
        ingest_root(&self.db, self.embedder.as_ref(), log_root, &self.config, opts)
    }

    pub fn batch_ingest(
        &self,
        sessions: &[engram_providers::SessionFiles],
        opts: &IngestOptions,
    ) -> Result<IngestReport> {
        batch_ingest(&self.db, self.embedder.as_ref(), sessions, &self.config, opts)
    }

    pub fn data_file_path(data_dir: Option<&str>) -> Result<PathBuf> {
        Ok(resolve_data_path(data_dir)?.join("engram.db"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::HashEmbedder;
    use engram_types::{Chunk, VectorClock};

    fn store() -> MemoryStore {
        MemoryStore::open_in_memory(Arc::new(HashEmbedder::new(64)), Config::default()).unwrap()
    }

    fn seed_chunk(store: &MemoryStore, id: &str, session: &str, ts: &str, text: &str) {
        let chunk = Chunk {
            id: id.to_string(),
            text: text.to_string(),
            token_count: 30,
            project: "proj".to_string(),
            session_id: session.to_string(),
            agent_id: "main".to_string(),
            spawn_depth: 0,
            start_ts: ts.to_string(),
            end_ts: ts.to_string(),
            code_block_count: 0,
            tool_use_count: 0,
            has_thinking: false,
            turn_indices: vec![0],
            clock: VectorClock::new(),
        };
        store.db.insert_chunk(&chunk).unwrap();
        let vector = store.embedder.embed(text).unwrap();
        store.db.insert_embedding(id, &vector).unwrap();
        store.db.index_chunk_text(id, "proj", text).unwrap();
    }

    #[test]
    fn test_empty_query_is_invalid() {
        let store = store();
        let result = store.search("   ", &QueryOptions::default());
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_search_empty_store_is_empty() {
        let store = store();
        let response = store.search("anything", &QueryOptions::default()).unwrap();
        assert!(response.chunks.is_empty());
        assert_eq!(response.token_count, 0);
    }

    #[test]
    fn test_search_finds_seeded_chunk() {
        let store = store();
        seed_chunk(
            &store,
            "s#0000",
            "s",
            "2025-01-01T00:00:00Z",
            "fixed the database pool timeout",
        );

        let response = store
            .search("database timeout", &QueryOptions::default())
            .unwrap();
        assert_eq!(response.chunks.len(), 1);
        assert_eq!(response.chunks[0].chunk_id, "s#0000");
    }

    #[test]
    fn test_forget_semantic_threshold_and_dry_run() {
        let store = store();
        seed_chunk(
            &store,
            "s#0000",
            "s",
            "2025-01-01T00:00:00Z",
            "database pool timeout investigation",
        );
        seed_chunk(
            &store,
            "s#0001",
            "s",
            "2025-01-01T00:05:00Z",
            "svg chart rendering for the dashboard",
        );

        let dry = store
            .forget(&ForgetRequest {
                project: "proj".to_string(),
                query: Some("database pool timeout investigation".to_string()),
                threshold: Some(0.95),
                dry_run: true,
                ..ForgetRequest::default()
            })
            .unwrap();
        assert_eq!(dry.matched, 1);
        assert_eq!(dry.deleted, 0);
        assert_eq!(store.stats().unwrap().chunks, 2);

        let wet = store
            .forget(&ForgetRequest {
                project: "proj".to_string(),
                query: Some("database pool timeout investigation".to_string()),
                threshold: Some(0.95),
                dry_run: false,
                ..ForgetRequest::default()
            })
            .unwrap();
        assert_eq!(wet.deleted, 1);
        assert_eq!(store.stats().unwrap().chunks, 1);
    }

    #[test]
    fn test_forget_requires_project_and_paired_semantics() {
        let store = store();
        assert!(store.forget(&ForgetRequest::default()).is_err());
        assert!(
            store
                .forget(&ForgetRequest {
                    project: "proj".to_string(),
                    query: Some("q".to_string()),
                    threshold: None,
                    ..ForgetRequest::default()
                })
                .is_err()
        );
    }

    #[test]
    fn test_forget_by_session() {
        let store = store();
        seed_chunk(&store, "a#0000", "a", "2025-01-01T00:00:00Z", "one");
        seed_chunk(&store, "b#0000", "b", "2025-01-02T00:00:00Z", "two");

        let summary = store
            .forget(&ForgetRequest {
                project: "proj".to_string(),
                session_id: Some("a".to_string()),
                ..ForgetRequest::default()
            })
            .unwrap();
        assert_eq!(summary.deleted, 1);
        assert_eq!(summary.chunk_ids, vec!["a#0000"]);
    }

    #[test]
    fn test_stats_counts() {
        let store = store();
        seed_chunk(&store, "a#0000", "a", "2025-01-01T00:00:00Z", "one");
        seed_chunk(&store, "a#0001", "a", "2025-01-01T00:01:00Z", "two");

        let stats = store.stats().unwrap();
        assert_eq!(stats.chunks, 2);
        assert_eq!(stats.edges, 0);
        assert_eq!(stats.projects.len(), 1);
        assert_eq!(stats.projects[0].chunk_count, 2);
    }

    #[test]
    fn test_prune_disabled_is_noop() {
        let store = store();
        seed_chunk(&store, "a#0000", "a", "2020-01-01T00:00:00Z", "ancient");
        let summary = store.prune_expired("proj").unwrap();
        assert_eq!(summary.deleted, 0);
        assert_eq!(store.stats().unwrap().chunks, 1);
    }

    #[test]
    fn test_prune_respects_ttl() {
        let mut config = Config::default();
        config.vectors.ttl_days = 30;
        let store =
            MemoryStore::open_in_memory(Arc::new(HashEmbedder::new(64)), config).unwrap();
        seed_chunk(&store, "a#0000", "a", "2020-01-01T00:00:00Z", "ancient");

        let summary = store.prune_expired("proj").unwrap();
        assert_eq!(summary.deleted, 1);
    }
}
