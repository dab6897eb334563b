use rusqlite::Connection;

use crate::Result;

// Schema version (increment when changing table definitions)
pub const SCHEMA_VERSION: i32 = 1;

// NOTE: Storage Design Rationale
//
// Why one SQLite file for everything?
// - The store is single-node, single-writer; a serialized connection is the
//   simplest correct implementation of the reader-writer discipline
// - Foreign keys with ON DELETE CASCADE give the ownership rules for free:
//   edges, embeddings, lexical entries and memberships die with their chunk
// - Clusters deliberately do NOT cascade from chunks; they are owned by the
//   reclustering pass and survive member deletion
//
// Why JSON columns for vector clocks and turn indices?
// - Clock maps are tiny and read whole; a satellite table would buy nothing
// - The persisted form doubles as the wire form, so round-trip identity is a
//   one-line test
//
// Why a meta table instead of PRAGMA for the embedding dimension?
// - The dimension is data, fixed per store instance; rejecting a mismatched
//   embedder needs a readable header, not a compile-time constant

pub fn init_schema(conn: &Connection) -> Result<()> {
    let current_version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    if current_version != 0 && current_version != SCHEMA_VERSION {
        drop_all_tables(conn)?;
    }

    conn.execute_batch(
        r#"
        PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            text TEXT NOT NULL,
            token_count INTEGER NOT NULL,
            project TEXT NOT NULL,
            session_id TEXT NOT NULL,
            agent_id TEXT NOT NULL DEFAULT 'main',
            spawn_depth INTEGER NOT NULL DEFAULT 0,
            start_ts TEXT NOT NULL,
            end_ts TEXT NOT NULL,
            code_block_count INTEGER NOT NULL DEFAULT 0,
            tool_use_count INTEGER NOT NULL DEFAULT 0,
            has_thinking INTEGER NOT NULL DEFAULT 0,
            turn_indices TEXT NOT NULL,
            clock TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS edges (
            source TEXT NOT NULL REFERENCES chunks(id) ON DELETE CASCADE,
            target TEXT NOT NULL REFERENCES chunks(id) ON DELETE CASCADE,
            kind TEXT NOT NULL,
            initial_weight REAL NOT NULL,
            link_count INTEGER NOT NULL DEFAULT 1,
            clock TEXT,
            created_at TEXT NOT NULL,
            reference_type TEXT,
            PRIMARY KEY (source, target, kind)
        );

        CREATE TABLE IF NOT EXISTS clocks (
            id TEXT PRIMARY KEY,
            clock TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS vectors (
            chunk_id TEXT PRIMARY KEY REFERENCES chunks(id) ON DELETE CASCADE,
            embedding BLOB NOT NULL
        );

        CREATE TABLE IF NOT EXISTS lexical_docs (
            chunk_id TEXT PRIMARY KEY REFERENCES chunks(id) ON DELETE CASCADE,
            project TEXT NOT NULL,
            length INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS lexical_postings (
            term TEXT NOT NULL,
            chunk_id TEXT NOT NULL REFERENCES chunks(id) ON DELETE CASCADE,
            tf INTEGER NOT NULL,
            PRIMARY KEY (term, chunk_id)
        );

        CREATE TABLE IF NOT EXISTS clusters (
            id TEXT PRIMARY KEY,
            name TEXT,
            description TEXT,
            created_at TEXT NOT NULL,
            refreshed_at TEXT
        );

        CREATE TABLE IF NOT EXISTS cluster_members (
            chunk_id TEXT PRIMARY KEY REFERENCES chunks(id) ON DELETE CASCADE,
            cluster_id TEXT NOT NULL REFERENCES clusters(id) ON DELETE CASCADE,
            distance REAL NOT NULL
        );

        CREATE TABLE IF NOT EXISTS cluster_exemplars (
            cluster_id TEXT NOT NULL REFERENCES clusters(id) ON DELETE CASCADE,
            chunk_id TEXT NOT NULL,
            rank INTEGER NOT NULL,
            PRIMARY KEY (cluster_id, chunk_id)
        );

        CREATE INDEX IF NOT EXISTS idx_chunks_project ON chunks(project, start_ts);
        CREATE INDEX IF NOT EXISTS idx_chunks_session ON chunks(session_id, id);
        CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(target);
        CREATE INDEX IF NOT EXISTS idx_postings_chunk ON lexical_postings(chunk_id);
        CREATE INDEX IF NOT EXISTS idx_members_cluster ON cluster_members(cluster_id);
        "#,
    )?;

    conn.execute(&format!("PRAGMA user_version = {}", SCHEMA_VERSION), [])?;

    Ok(())
}

fn drop_all_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        DROP TABLE IF EXISTS cluster_exemplars;
        DROP TABLE IF EXISTS cluster_members;
        DROP TABLE IF EXISTS clusters;
        DROP TABLE IF EXISTS lexical_postings;
        DROP TABLE IF EXISTS lexical_docs;
        DROP TABLE IF EXISTS vectors;
        DROP TABLE IF EXISTS clocks;
        DROP TABLE IF EXISTS edges;
        DROP TABLE IF EXISTS chunks;
        DROP TABLE IF EXISTS meta;
        "#,
    )?;
    Ok(())
}
