use chrono::Utc;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use engram_engine::{ChunkStream, chunk_turns, create_spawn_edges, create_within_chain_edges, link_cross_sessions};
use engram_index::Database;
use engram_providers::{
    SessionFiles, TurnOptions, assemble_turns, detect_topology, discover_sessions, extract_header,
    read_records,
};
use engram_types::{Chunk, MAIN_AGENT, project_slug_from_root};

use crate::config::Config;
use crate::embed::Embedder;
use crate::{Error, Result};

#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    /// Use this project tag instead of deriving one from the project root.
    pub project_override: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionError {
    pub session_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub sessions_ingested: usize,
    pub sessions_skipped: usize,
    pub chunks: usize,
    pub edges: usize,
    pub cross_session_edges: usize,
    pub errors: Vec<SessionError>,
}

/// Discover sessions under a log root and ingest them.
pub fn ingest_root(
    db: &Database,
    embedder: &dyn Embedder,
    log_root: &Path,
    config: &Config,
    opts: &IngestOptions,
) -> Result<IngestReport> {
    let sessions = discover_sessions(log_root)?;
    batch_ingest(db, embedder, &sessions, config, opts)
}

/// Ingest sessions in the given (mtime) order: parse, chunk, embed, insert,
/// wire within-chain and spawn edges; then run cross-session linking once
/// per project. Per-session failures are recorded and the batch continues.
pub fn batch_ingest(
    db: &Database,
    embedder: &dyn Embedder,
    sessions: &[SessionFiles],
    config: &Config,
    opts: &IngestOptions,
) -> Result<IngestReport> {
    let mut report = IngestReport::default();
    let mut projects: BTreeSet<String> = BTreeSet::new();

    for session in sessions {
        let project = opts.project_override.clone().unwrap_or_else(|| {
            session
                .project_root
                .as_deref()
                .map(project_slug_from_root)
                .unwrap_or_else(|| "default".to_string())
        });
        projects.insert(project.clone());

        match ingest_session(db, embedder, session, &project, config) {
            Ok(SessionOutcome::Ingested { chunks, edges }) => {
                report.sessions_ingested += 1;
                report.chunks += chunks;
                report.edges += edges;
            }
            Ok(SessionOutcome::Skipped) => report.sessions_skipped += 1,
            Err(err) => {
                tracing::warn!(session = %session.session_id, error = %err, "session ingest failed");
                report.errors.push(SessionError {
                    session_id: session.session_id.clone(),
                    error: err.to_string(),
                });
            }
        }
    }

    for project in &projects {
        report.cross_session_edges += link_cross_sessions(db, project, Utc::now())?;
    }

    tracing::info!(
        ingested = report.sessions_ingested,
        skipped = report.sessions_skipped,
        chunks = report.chunks,
        edges = report.edges,
        cross = report.cross_session_edges,
        failed = report.errors.len(),
        "batch ingest complete"
    );
    Ok(report)
}

enum SessionOutcome {
    Ingested { chunks: usize, edges: usize },
    Skipped,
}

fn ingest_session(
    db: &Database,
    embedder: &dyn Embedder,
    session: &SessionFiles,
    project: &str,
    config: &Config,
) -> Result<SessionOutcome> {
    let records = read_records(&session.main_file)?;
    let assembly = assemble_turns(records.clone(), TurnOptions::default());

    if assembly.unmatched_tool_uses > 0 {
        return Err(Error::Provider(engram_providers::Error::Structure(format!(
            "{} tool use(s) without a matchable result in session {}",
            assembly.unmatched_tool_uses, session.session_id
        ))));
    }

    let chunker_opts = config.chunker_options();
    let start_clock = db.project_reference_clock(project)?;
    let main_chunks = chunk_turns(
        &assembly.turns,
        &ChunkStream {
            session_id: session.session_id.clone(),
            project: project.to_string(),
            agent_id: MAIN_AGENT.to_string(),
            spawn_depth: 0,
            start_clock,
        },
        chunker_opts,
    );

    // Already fully present: a session whose deterministic chunk ids all
    // exist with the same count is skipped. Anything partial is redone from
    // the beginning (inserts are idempotent).
    let existing = db.session_chunk_count(&session.session_id)?;
    if existing == main_chunks.len() && !main_chunks.is_empty() {
        let all_present = main_chunks
            .iter()
            .try_fold(true, |acc, c| -> Result<bool> {
                Ok(acc && db.get_chunk(&c.id)?.is_some())
            })?;
        if all_present {
            tracing::debug!(session = %session.session_id, "session already ingested, skipping");
            return Ok(SessionOutcome::Skipped);
        }
    }
    if existing > main_chunks.len() {
        // The transcript shrank (rewritten file); drop the stale tail.
        let stale: Vec<String> = db
            .session_chunks(&session.session_id)?
            .into_iter()
            .skip(main_chunks.len())
            .map(|c| c.id)
            .collect();
        db.delete_chunks(&stale)?;
    }

    let topology = detect_topology(&records);

    // Sub-agent streams: chunked under a derived session id so ordinals
    // never collide with the parent stream.
    let mut agent_chunks: BTreeMap<String, Vec<Chunk>> = BTreeMap::new();
    for file in &session.sidechain_files {
        let sub_records = read_records(file)?;
        let header = extract_header(file)?;
        let agent_id = header
            .agent_id
            .or_else(|| {
                file.file_stem()
                    .and_then(|s| s.to_str())
                    .map(|s| s.to_string())
            })
            .unwrap_or_else(|| "subagent".to_string());

        let sub_assembly = assemble_turns(
            sub_records,
            TurnOptions {
                include_sidechain: true,
            },
        );
        if sub_assembly.turns.is_empty() {
            continue;
        }

        let start_clock = db.project_reference_clock(project)?;
        let chunks = chunk_turns(
            &sub_assembly.turns,
            &ChunkStream {
                session_id: format!("{}:{}", session.session_id, agent_id),
                project: project.to_string(),
                agent_id: agent_id.clone(),
                spawn_depth: 1,
                start_clock,
            },
            chunker_opts,
        );
        agent_chunks.insert(agent_id, chunks);
    }

    // Persist: chunk row, embedding, lexical entry, reference clock. The
    // chunk row lands first so the dependent writes have their foreign key.
    let mut inserted = 0usize;
    let mut insert_all = |chunks: &[Chunk]| -> Result<()> {
        for chunk in chunks {
            db.insert_chunk(chunk)?;
            let vector = embedder.embed(&chunk.text)?;
            db.insert_embedding(&chunk.id, &vector)?;
            db.index_chunk_text(&chunk.id, &chunk.project, &chunk.text)?;
            db.merge_reference_clock(&chunk.project, &chunk.clock)?;
            inserted += 1;
        }
        Ok(())
    };
    insert_all(&main_chunks)?;
    for chunks in agent_chunks.values() {
        insert_all(chunks)?;
    }
    drop(insert_all);

    // Edge writes batch per session.
    let now = Utc::now();
    let mut edges = 0usize;
    edges += create_within_chain_edges(db, &main_chunks, now)?;
    for chunks in agent_chunks.values() {
        edges += create_within_chain_edges(db, chunks, now)?;
    }
    edges += create_spawn_edges(db, &main_chunks, &agent_chunks, &topology, now)?;

    Ok(SessionOutcome::Ingested {
        chunks: inserted,
        edges,
    })
}
