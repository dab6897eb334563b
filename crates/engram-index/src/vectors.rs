use rusqlite::{OptionalExtension, params};

use engram_types::angular_distance;

use crate::db::Database;
use crate::{Error, Result};

const DIM_KEY: &str = "embedding_dim";

fn vec_to_blob(v: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(v.len() * 4);
    for x in v {
        blob.extend_from_slice(&x.to_le_bytes());
    }
    blob
}

fn blob_to_vec(blob: &[u8]) -> Result<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return Err(Database::corruption("embedding blob length not divisible by 4"));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

impl Database {
    /// The fixed embedding dimension of this store instance, recorded in the
    /// header on first insert.
    pub fn embedding_dim(&self) -> Result<Option<usize>> {
        Ok(self
            .get_meta(DIM_KEY)?
            .and_then(|v| v.parse::<usize>().ok()))
    }

    /// Insert or replace a chunk's embedding. The vector is assumed
    /// unit-normalized; a dimension mismatch against the store header is an
    /// error rather than silent garbage in the distance arithmetic.
    pub fn insert_embedding(&self, chunk_id: &str, vector: &[f32]) -> Result<()> {
        match self.embedding_dim()? {
            None => self.set_meta(DIM_KEY, &vector.len().to_string())?,
            Some(dim) if dim != vector.len() => {
                return Err(Error::Query(format!(
                    "embedding dimension {} does not match store dimension {}",
                    vector.len(),
                    dim
                )));
            }
            Some(_) => {}
        }
        self.conn.execute(
            "INSERT INTO vectors (chunk_id, embedding) VALUES (?1, ?2)
             ON CONFLICT(chunk_id) DO UPDATE SET embedding = ?2",
            params![chunk_id, vec_to_blob(vector)],
        )?;
        Ok(())
    }

    pub fn get_embedding(&self, chunk_id: &str) -> Result<Option<Vec<f32>>> {
        let blob: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT embedding FROM vectors WHERE chunk_id = ?1",
                [chunk_id],
                |row| row.get(0),
            )
            .optional()?;
        blob.map(|b| blob_to_vec(&b)).transpose()
    }

    /// k-nearest-neighbours by angular distance, ascending, with an optional
    /// project filter. Deterministic: ties break on chunk id.
    pub fn nearest_embeddings(
        &self,
        query: &[f32],
        limit: usize,
        project: Option<&str>,
    ) -> Result<Vec<(String, f64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT v.chunk_id, v.embedding
             FROM vectors v JOIN chunks c ON c.id = v.chunk_id
             WHERE ?1 IS NULL OR c.project = ?1",
        )?;
        let rows = stmt.query_map(params![project], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?;

        let mut scored: Vec<(String, f64)> = Vec::new();
        for row in rows {
            let (chunk_id, blob) = row?;
            let vector = blob_to_vec(&blob)?;
            if vector.len() != query.len() {
                return Err(Database::corruption(format!(
                    "embedding for {} has stray dimension {}",
                    chunk_id,
                    vector.len()
                )));
            }
            scored.push((chunk_id, angular_distance(query, &vector)));
        }

        scored.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(limit);
        Ok(scored)
    }

    /// Every (chunk id, embedding) pair, optionally scoped to a project.
    /// Input of the reclustering pass.
    pub fn all_embeddings(&self, project: Option<&str>) -> Result<Vec<(String, Vec<f32>)>> {
        let mut stmt = self.conn.prepare(
            "SELECT v.chunk_id, v.embedding
             FROM vectors v JOIN chunks c ON c.id = v.chunk_id
             WHERE ?1 IS NULL OR c.project = ?1
             ORDER BY v.chunk_id",
        )?;
        let rows = stmt.query_map(params![project], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (chunk_id, blob) = row?;
            out.push((chunk_id, blob_to_vec(&blob)?));
        }
        Ok(out)
    }

    pub fn embedding_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM vectors", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_types::{Chunk, VectorClock, normalize};

    fn insert_chunk(db: &Database, id: &str, project: &str) {
        let chunk = Chunk {
            id: id.to_string(),
            text: "body".to_string(),
            token_count: 10,
            project: project.to_string(),
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
    }

    fn unit(v: &[f32]) -> Vec<f32> {
        let mut v = v.to_vec();
        normalize(&mut v);
        v
    }

    #[test]
    fn test_roundtrip_embedding() {
        let db = Database::open_in_memory().unwrap();
        insert_chunk(&db, "a", "p");
        let v = unit(&[0.2, 0.5, 0.8, 0.1]);
        db.insert_embedding("a", &v).unwrap();

        let back = db.get_embedding("a").unwrap().unwrap();
        assert_eq!(back, v);
        assert_eq!(db.embedding_dim().unwrap(), Some(4));
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let db = Database::open_in_memory().unwrap();
        insert_chunk(&db, "a", "p");
        insert_chunk(&db, "b", "p");
        db.insert_embedding("a", &unit(&[1.0, 0.0])).unwrap();
        assert!(db.insert_embedding("b", &unit(&[1.0, 0.0, 0.0])).is_err());
    }

    #[test]
    fn test_nearest_orders_by_distance() {
        let db = Database::open_in_memory().unwrap();
        for id in ["a", "b", "c"] {
            insert_chunk(&db, id, "p");
        }
        db.insert_embedding("a", &unit(&[1.0, 0.0])).unwrap();
        db.insert_embedding("b", &unit(&[0.8, 0.6])).unwrap();
        db.insert_embedding("c", &unit(&[0.0, 1.0])).unwrap();

        let hits = db
            .nearest_embeddings(&unit(&[1.0, 0.0]), 10, Some("p"))
            .unwrap();
        let ids: Vec<&str> = hits.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(hits[0].1 < 1e-6);
        assert!((hits[2].1 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_project_filter_scopes_results() {
        let db = Database::open_in_memory().unwrap();
        insert_chunk(&db, "a", "p1");
        insert_chunk(&db, "b", "p2");
        db.insert_embedding("a", &unit(&[1.0, 0.0])).unwrap();
        db.insert_embedding("b", &unit(&[1.0, 0.0])).unwrap();

        let hits = db
            .nearest_embeddings(&unit(&[1.0, 0.0]), 10, Some("p1"))
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "a");
    }

    #[test]
    fn test_chunk_delete_cascades_embedding() {
        let db = Database::open_in_memory().unwrap();
        insert_chunk(&db, "a", "p");
        db.insert_embedding("a", &unit(&[1.0, 0.0])).unwrap();
        db.delete_chunks(&["a".to_string()]).unwrap();
        assert!(db.get_embedding("a").unwrap().is_none());
        assert_eq!(db.embedding_count().unwrap(), 0);
    }
}
