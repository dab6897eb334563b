use rusqlite::{OptionalExtension, Row, params};

use engram_types::{Edge, EdgeKind, VectorClock};

use crate::db::Database;
use crate::{Error, Result};

fn row_to_edge(row: &Row) -> rusqlite::Result<Edge> {
    let kind: String = row.get(2)?;
    let clock: Option<String> = row.get(5)?;
    Ok(Edge {
        source: row.get(0)?,
        target: row.get(1)?,
        // Unknown kinds cannot appear through this crate's writers; a stray
        // row degrades to within_chain rather than aborting the read.
        kind: EdgeKind::parse(&kind).unwrap_or(EdgeKind::WithinChain),
        initial_weight: row.get(3)?,
        link_count: row.get::<_, i64>(4)? as u32,
        clock: clock.as_deref().and_then(VectorClock::from_json),
        created_at: row.get(6)?,
        reference_type: row.get(7)?,
    })
}

const EDGE_COLUMNS: &str =
    "source, target, kind, initial_weight, link_count, clock, created_at, reference_type";

impl Database {
    /// Insert a forward edge, or bump the link count when the same logical
    /// edge (source, target, kind) is re-detected.
    pub fn upsert_edge(&self, edge: &Edge) -> Result<()> {
        if edge.source == edge.target {
            return Err(Error::Query(format!(
                "self-loop edge rejected: {}",
                edge.source
            )));
        }
        self.conn.execute(
            r#"
            INSERT INTO edges (source, target, kind, initial_weight, link_count,
                               clock, created_at, reference_type)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(source, target, kind) DO UPDATE SET
                link_count = link_count + 1
            "#,
            params![
                &edge.source,
                &edge.target,
                edge.kind.as_str(),
                edge.initial_weight,
                edge.link_count as i64,
                edge.clock.as_ref().map(|c| c.to_json()),
                &edge.created_at,
                &edge.reference_type,
            ],
        )?;
        Ok(())
    }

    pub fn get_edge(&self, source: &str, target: &str, kind: EdgeKind) -> Result<Option<Edge>> {
        let edge = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM edges WHERE source = ?1 AND target = ?2 AND kind = ?3",
                    EDGE_COLUMNS
                ),
                params![source, target, kind.as_str()],
                row_to_edge,
            )
            .optional()?;
        Ok(edge)
    }

    /// Forward view: edges leaving a chunk, in insertion order.
    pub fn edges_from(&self, source: &str) -> Result<Vec<Edge>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM edges WHERE source = ?1 ORDER BY rowid",
            EDGE_COLUMNS
        ))?;
        let edges = stmt
            .query_map([source], row_to_edge)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(edges)
    }

    /// Backward view: edges arriving at a chunk, in insertion order.
    pub fn edges_to(&self, target: &str) -> Result<Vec<Edge>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM edges WHERE target = ?1 ORDER BY rowid",
            EDGE_COLUMNS
        ))?;
        let edges = stmt
            .query_map([target], row_to_edge)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(edges)
    }

    pub fn edge_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM edges", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn edge_counts_by_kind(&self) -> Result<Vec<(String, usize)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT kind, COUNT(*) FROM edges GROUP BY kind ORDER BY kind")?;
        let counts = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get::<_, i64>(1)? as usize)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(counts)
    }
}
