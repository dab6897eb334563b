use rusqlite::{OptionalExtension, Row, params};
use serde::Serialize;

use engram_types::{Chunk, VectorClock};

use crate::db::Database;
use crate::{Error, Result};

/// Per-project aggregate for `list_projects`.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectStat {
    pub project: String,
    pub chunk_count: usize,
    pub first_seen: String,
    pub last_seen: String,
}

/// Per-session aggregate for `list_sessions`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStat {
    pub session_id: String,
    pub first_chunk_time: String,
    pub last_chunk_time: String,
    pub chunk_count: usize,
    pub total_tokens: usize,
}

fn row_to_chunk(row: &Row) -> rusqlite::Result<Chunk> {
    let turn_indices: String = row.get(12)?;
    let clock: String = row.get(13)?;
    Ok(Chunk {
        id: row.get(0)?,
        text: row.get(1)?,
        token_count: row.get::<_, i64>(2)? as usize,
        project: row.get(3)?,
        session_id: row.get(4)?,
        agent_id: row.get(5)?,
        spawn_depth: row.get::<_, i64>(6)? as u32,
        start_ts: row.get(7)?,
        end_ts: row.get(8)?,
        code_block_count: row.get::<_, i64>(9)? as usize,
        tool_use_count: row.get::<_, i64>(10)? as usize,
        has_thinking: row.get(11)?,
        turn_indices: serde_json::from_str(&turn_indices).unwrap_or_default(),
        clock: VectorClock::from_json(&clock).unwrap_or_default(),
    })
}

const CHUNK_COLUMNS: &str = "id, text, token_count, project, session_id, agent_id, spawn_depth, \
     start_ts, end_ts, code_block_count, tool_use_count, has_thinking, turn_indices, clock";

impl Database {
    pub fn insert_chunk(&self, chunk: &Chunk) -> Result<()> {
        let turn_indices = serde_json::to_string(&chunk.turn_indices)
            .map_err(|e| Error::Query(format!("turn indices not serializable: {}", e)))?;
        self.conn.execute(
            r#"
            INSERT INTO chunks (id, text, token_count, project, session_id, agent_id,
                                spawn_depth, start_ts, end_ts, code_block_count,
                                tool_use_count, has_thinking, turn_indices, clock)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            ON CONFLICT(id) DO UPDATE SET
                text = ?2, token_count = ?3, project = ?4, session_id = ?5,
                agent_id = ?6, spawn_depth = ?7, start_ts = ?8, end_ts = ?9,
                code_block_count = ?10, tool_use_count = ?11, has_thinking = ?12,
                turn_indices = ?13, clock = ?14
            "#,
            params![
                &chunk.id,
                &chunk.text,
                chunk.token_count as i64,
                &chunk.project,
                &chunk.session_id,
                &chunk.agent_id,
                chunk.spawn_depth as i64,
                &chunk.start_ts,
                &chunk.end_ts,
                chunk.code_block_count as i64,
                chunk.tool_use_count as i64,
                chunk.has_thinking,
                turn_indices,
                chunk.clock.to_json(),
            ],
        )?;
        Ok(())
    }

    pub fn get_chunk(&self, id: &str) -> Result<Option<Chunk>> {
        let chunk = self
            .conn
            .query_row(
                &format!("SELECT {} FROM chunks WHERE id = ?1", CHUNK_COLUMNS),
                [id],
                row_to_chunk,
            )
            .optional()?;
        Ok(chunk)
    }

    /// Fetch several chunks, preserving the order of the requested ids.
    /// Missing ids are skipped.
    pub fn get_chunks(&self, ids: &[String]) -> Result<Vec<Chunk>> {
        let mut chunks = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(chunk) = self.get_chunk(id)? {
                chunks.push(chunk);
            }
        }
        Ok(chunks)
    }

    /// Delete chunks by id. Edges, embeddings, lexical entries and cluster
    /// memberships cascade; cluster records survive.
    pub fn delete_chunks(&self, ids: &[String]) -> Result<usize> {
        let mut deleted = 0;
        for id in ids {
            deleted += self.conn.execute("DELETE FROM chunks WHERE id = ?1", [id])?;
        }
        Ok(deleted)
    }

    pub fn chunk_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn chunk_count_for_project(&self, project: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM chunks WHERE project = ?1",
            [project],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// All chunks of a session, in chunk-ordinal order.
    pub fn session_chunks(&self, session_id: &str) -> Result<Vec<Chunk>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM chunks WHERE session_id = ?1 ORDER BY id",
            CHUNK_COLUMNS
        ))?;
        let chunks = stmt
            .query_map([session_id], row_to_chunk)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(chunks)
    }

    pub fn session_chunk_count(&self, session_id: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM chunks WHERE session_id = ?1",
            [session_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Chunks of a project inside a time window, chronological.
    pub fn chunks_in_window(
        &self,
        project: &str,
        from: Option<&str>,
        to: Option<&str>,
    ) -> Result<Vec<Chunk>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM chunks
             WHERE project = ?1
               AND (?2 IS NULL OR start_ts >= ?2)
               AND (?3 IS NULL OR start_ts <= ?3)
             ORDER BY start_ts, id",
            CHUNK_COLUMNS
        ))?;
        let chunks = stmt
            .query_map(params![project, from, to], row_to_chunk)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(chunks)
    }

    pub fn list_projects(&self) -> Result<Vec<ProjectStat>> {
        let mut stmt = self.conn.prepare(
            "SELECT project, COUNT(*), MIN(start_ts), MAX(end_ts)
             FROM chunks GROUP BY project ORDER BY MAX(end_ts) DESC",
        )?;
        let projects = stmt
            .query_map([], |row| {
                Ok(ProjectStat {
                    project: row.get(0)?,
                    chunk_count: row.get::<_, i64>(1)? as usize,
                    first_seen: row.get(2)?,
                    last_seen: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(projects)
    }

    pub fn list_sessions(
        &self,
        project: &str,
        from: Option<&str>,
        to: Option<&str>,
    ) -> Result<Vec<SessionStat>> {
        // Sub-agent streams (spawn_depth > 0) are internal to their parent
        // session and stay out of session listings.
        let mut stmt = self.conn.prepare(
            "SELECT session_id, MIN(start_ts), MAX(end_ts), COUNT(*), SUM(token_count)
             FROM chunks
             WHERE project = ?1 AND spawn_depth = 0
               AND (?2 IS NULL OR start_ts >= ?2)
               AND (?3 IS NULL OR start_ts <= ?3)
             GROUP BY session_id ORDER BY MIN(start_ts)",
        )?;
        let sessions = stmt
            .query_map(params![project, from, to], |row| {
                Ok(SessionStat {
                    session_id: row.get(0)?,
                    first_chunk_time: row.get(1)?,
                    last_chunk_time: row.get(2)?,
                    chunk_count: row.get::<_, i64>(3)? as usize,
                    total_tokens: row.get::<_, i64>(4)? as usize,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(sessions)
    }

    /// Chunk ids matching the forget filters, conjunctively.
    pub fn chunk_ids_matching(
        &self,
        project: &str,
        before: Option<&str>,
        after: Option<&str>,
        session_id: Option<&str>,
    ) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT id FROM chunks
             WHERE project = ?1
               AND (?2 IS NULL OR end_ts < ?2)
               AND (?3 IS NULL OR start_ts > ?3)
               AND (?4 IS NULL OR session_id = ?4)
             ORDER BY id",
        )?;
        let ids = stmt
            .query_map(params![project, before, after, session_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }
}
