use rusqlite::params;
use std::collections::HashMap;

use crate::db::Database;
use crate::Result;

const BM25_K1: f64 = 1.2;
const BM25_B: f64 = 0.75;

/// Bag-of-words tokenizer shared by indexing and search: lowercase,
/// alphanumeric runs, single characters dropped.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2)
        .map(|t| t.to_string())
        .collect()
}

impl Database {
    /// (Re)index a chunk's text for lexical search. Replaces any previous
    /// postings for the chunk in one transaction.
    pub fn index_chunk_text(&self, chunk_id: &str, project: &str, text: &str) -> Result<()> {
        let tokens = tokenize(text);
        let mut freqs: HashMap<&str, i64> = HashMap::new();
        for token in &tokens {
            *freqs.entry(token.as_str()).or_insert(0) += 1;
        }

        self.with_tx(|conn| {
            conn.execute(
                "DELETE FROM lexical_postings WHERE chunk_id = ?1",
                [chunk_id],
            )?;
            conn.execute(
                "INSERT INTO lexical_docs (chunk_id, project, length) VALUES (?1, ?2, ?3)
                 ON CONFLICT(chunk_id) DO UPDATE SET project = ?2, length = ?3",
                params![chunk_id, project, tokens.len() as i64],
            )?;
            let mut stmt = conn.prepare(
                "INSERT INTO lexical_postings (term, chunk_id, tf) VALUES (?1, ?2, ?3)",
            )?;
            for (term, tf) in freqs {
                stmt.execute(params![term, chunk_id, tf])?;
            }
            Ok(())
        })
    }

    /// BM25 search over the lexical index, descending score, optional project
    /// filter. Ties break on chunk id for determinism.
    pub fn search_lexical(
        &self,
        query: &str,
        limit: usize,
        project: Option<&str>,
    ) -> Result<Vec<(String, f64)>> {
        let mut terms = tokenize(query);
        terms.sort();
        terms.dedup();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let (doc_count, total_len): (i64, i64) = self.conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(length), 0) FROM lexical_docs
             WHERE ?1 IS NULL OR project = ?1",
            params![project],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        if doc_count == 0 {
            return Ok(Vec::new());
        }
        let avg_len = (total_len as f64 / doc_count as f64).max(1.0);

        let mut stmt = self.conn.prepare(
            "SELECT p.chunk_id, p.tf, d.length
             FROM lexical_postings p JOIN lexical_docs d ON d.chunk_id = p.chunk_id
             WHERE p.term = ?1 AND (?2 IS NULL OR d.project = ?2)",
        )?;

        let mut scores: HashMap<String, f64> = HashMap::new();
        for term in &terms {
            let postings = stmt
                .query_map(params![term, project], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let df = postings.len() as f64;
            if df == 0.0 {
                continue;
            }
            let n = doc_count as f64;
            let idf = (1.0 + (n - df + 0.5) / (df + 0.5)).ln();

            for (chunk_id, tf, len) in postings {
                let tf = tf as f64;
                let norm = 1.0 - BM25_B + BM25_B * len as f64 / avg_len;
                let contribution = idf * tf * (BM25_K1 + 1.0) / (tf + BM25_K1 * norm);
                *scores.entry(chunk_id).or_insert(0.0) += contribution;
            }
        }

        let mut hits: Vec<(String, f64)> = scores.into_iter().collect();
        hits.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    pub fn lexical_doc_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM lexical_docs", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_types::{Chunk, VectorClock};

    fn insert_chunk(db: &Database, id: &str, project: &str, text: &str) {
        let chunk = Chunk {
            id: id.to_string(),
            text: text.to_string(),
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
        db.index_chunk_text(id, project, text).unwrap();
    }

    #[test]
    fn test_tokenize_lowercases_and_splits() {
        let tokens = tokenize("Fix the login-bug in auth.rs!");
        assert_eq!(tokens, vec!["fix", "the", "login", "bug", "in", "auth", "rs"]);
    }

    #[test]
    fn test_matching_doc_ranks_first() {
        let db = Database::open_in_memory().unwrap();
        insert_chunk(&db, "a", "p", "fixed the database connection pool timeout");
        insert_chunk(&db, "b", "p", "wrote documentation for the http server");
        insert_chunk(&db, "c", "p", "database migration for the users table");

        let hits = db.search_lexical("database timeout", 10, Some("p")).unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].0, "a");
        assert!(hits[0].1 > 0.0);
        // descending order
        for pair in hits.windows(2) {
            assert!(pair[0].1 >= pair[1].1);
        }
    }

    #[test]
    fn test_project_filter() {
        let db = Database::open_in_memory().unwrap();
        insert_chunk(&db, "a", "p1", "refactor the parser");
        insert_chunk(&db, "b", "p2", "refactor the parser");

        let hits = db.search_lexical("parser", 10, Some("p1")).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "a");
    }

    #[test]
    fn test_no_hits_is_empty() {
        let db = Database::open_in_memory().unwrap();
        insert_chunk(&db, "a", "p", "some text");
        assert!(db.search_lexical("zzzqqq", 10, Some("p")).unwrap().is_empty());
        assert!(db.search_lexical("", 10, Some("p")).unwrap().is_empty());
    }

    #[test]
    fn test_reindex_replaces_postings() {
        let db = Database::open_in_memory().unwrap();
        insert_chunk(&db, "a", "p", "original words here");
        db.index_chunk_text("a", "p", "replacement content").unwrap();

        assert!(db.search_lexical("original", 10, Some("p")).unwrap().is_empty());
        assert!(!db.search_lexical("replacement", 10, Some("p")).unwrap().is_empty());
    }

    #[test]
    fn test_chunk_delete_cascades_lexical() {
        let db = Database::open_in_memory().unwrap();
        insert_chunk(&db, "a", "p", "ephemeral content");
        db.delete_chunks(&["a".to_string()]).unwrap();
        assert_eq!(db.lexical_doc_count().unwrap(), 0);
        assert!(db.search_lexical("ephemeral", 10, Some("p")).unwrap().is_empty());
    }
}
