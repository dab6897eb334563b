use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use engram_index::Database;
use engram_types::Chunk;

use crate::{Error, Result};

/// Time scope of a reconstruction request. Exactly one way of pointing at
/// history; no vector or graph machinery is involved.
#[derive(Debug, Clone)]
pub enum ReconstructScope {
    Session(String),
    Window {
        from: Option<String>,
        to: Option<String>,
    },
    DaysBack(f64),
    /// The session before the most recent one.
    PreviousSession,
}

#[derive(Debug, Clone)]
pub struct ReconstructRequest {
    pub project: String,
    pub scope: ReconstructScope,
    pub max_tokens: usize,
    /// Spend the budget from the newest chunk backward (true) or the oldest
    /// forward (false).
    pub keep_newest: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionBlock {
    pub session_id: String,
    pub header: String,
    pub chunk_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconstructResponse {
    pub text: String,
    pub sessions: Vec<SessionBlock>,
    pub chunk_ids: Vec<String>,
    pub total_tokens: usize,
    pub truncated: bool,
    pub time_range: Option<(String, String)>,
}

/// Chronological, non-semantic retrieval: the selected chunks grouped into
/// session blocks with header lines, under the response token budget.
pub fn reconstruct(
    db: &Database,
    req: &ReconstructRequest,
    now: DateTime<Utc>,
) -> Result<ReconstructResponse> {
    let chunks = match &req.scope {
        ReconstructScope::Session(session_id) => {
            let chunks = db.session_chunks(session_id)?;
            if chunks.is_empty() {
                return Err(Error::NotFound(format!("session {}", session_id)));
            }
            if chunks[0].project != req.project {
                return Err(Error::NotFound(format!(
                    "session {} in project {}",
                    session_id, req.project
                )));
            }
            chunks
        }
        ReconstructScope::Window { from, to } => {
            db.chunks_in_window(&req.project, from.as_deref(), to.as_deref())?
        }
        ReconstructScope::DaysBack(days) => {
            if !days.is_finite() || *days < 0.0 {
                return Err(Error::InvalidInput(format!("days_back {}", days)));
            }
            let from = (now - Duration::seconds((days * 86_400.0) as i64)).to_rfc3339();
            db.chunks_in_window(&req.project, Some(&from), None)?
        }
        ReconstructScope::PreviousSession => {
            let sessions = db.list_sessions(&req.project, None, None)?;
            if sessions.len() < 2 {
                return Err(Error::NotFound(format!(
                    "no previous session in project {}",
                    req.project
                )));
            }
            db.session_chunks(&sessions[sessions.len() - 2].session_id)?
        }
    };

    Ok(assemble(chunks, req.max_tokens, req.keep_newest))
}

fn assemble(chunks: Vec<Chunk>, max_tokens: usize, keep_newest: bool) -> ReconstructResponse {
    // Budget pass over the chronological list, from whichever end the
    // caller wants to keep.
    let mut kept: Vec<Chunk> = Vec::new();
    let mut total_tokens = 0usize;
    let mut truncated = false;

    let order: Vec<Chunk> = if keep_newest {
        chunks.into_iter().rev().collect()
    } else {
        chunks
    };
    for chunk in order {
        if total_tokens + chunk.token_count > max_tokens {
            truncated = true;
            break;
        }
        total_tokens += chunk.token_count;
        kept.push(chunk);
    }
    if keep_newest {
        kept.reverse();
    }

    let time_range = match (kept.first(), kept.last()) {
        (Some(first), Some(last)) => Some((first.start_ts.clone(), last.end_ts.clone())),
        _ => None,
    };

    // Group into session blocks, preserving chronological order.
    let mut sessions: Vec<SessionBlock> = Vec::new();
    let mut text_parts: Vec<String> = Vec::new();
    let mut chunk_ids = Vec::new();

    for chunk in &kept {
        let start_new_block = sessions
            .last()
            .is_none_or(|b| b.session_id != chunk.session_id);
        if start_new_block {
            let header = format!(
                "=== session {} | {} | {} ===",
                chunk.session_id,
                chunk.project,
                &chunk.start_ts[..chunk.start_ts.len().min(10)]
            );
            text_parts.push(header.clone());
            sessions.push(SessionBlock {
                session_id: chunk.session_id.clone(),
                header,
                chunk_ids: Vec::new(),
            });
        }
        let block = sessions.last_mut().expect("block exists");
        block.chunk_ids.push(chunk.id.clone());
        chunk_ids.push(chunk.id.clone());
        text_parts.push(chunk.text.clone());
    }

    ReconstructResponse {
        text: text_parts.join("\n\n"),
        sessions,
        chunk_ids,
        total_tokens,
        truncated,
        time_range,
    }
}
