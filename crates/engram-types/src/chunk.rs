use serde::{Deserialize, Serialize};

use crate::clock::VectorClock;

/// A contiguous, embeddable slice of a transcript.
///
/// Created by the chunker, never edited in place, destroyed only by explicit
/// forget/delete. The id is deterministic given (session id, ordinal) so
/// re-ingesting the same transcript reconstructs identical records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    pub token_count: usize,

    /// Primary retrieval filter and clock namespace.
    pub project: String,
    pub session_id: String,

    /// Agent that produced the underlying turns ("main" for the root transcript).
    pub agent_id: String,
    /// 0 = main transcript, 1 = direct sub-agent, and so on.
    pub spawn_depth: u32,

    /// RFC-3339 timestamps of the first and last underlying record.
    pub start_ts: String,
    pub end_ts: String,

    pub code_block_count: usize,
    pub tool_use_count: usize,
    pub has_thinking: bool,

    /// Indices of the source turns this chunk covers.
    pub turn_indices: Vec<usize>,

    /// Clock snapshot captured at the moment the chunk was emitted.
    pub clock: VectorClock,
}

impl Chunk {
    /// Deterministic chunk id: `<session-id>#<ordinal>`.
    pub fn make_id(session_id: &str, ordinal: usize) -> String {
        format!("{}#{:04}", session_id, ordinal)
    }

    /// First line of the chunk body, for list previews.
    pub fn preview(&self, max_chars: usize) -> String {
        let first_line = self
            .text
            .lines()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("");
        crate::util::truncate(first_line, max_chars)
    }
}
