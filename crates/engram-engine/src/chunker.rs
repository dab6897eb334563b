use engram_providers::Turn;
use engram_types::{Chunk, HUMAN_AGENT, VectorClock, estimate_tokens};

use crate::render::{RenderOptions, RenderedTurn, is_section_boundary, render_turn};

#[derive(Debug, Clone, Copy)]
pub struct ChunkerOptions {
    /// Target upper bound on chunk size in tokens.
    pub max_tokens: usize,
    /// Turns below this size are merged into a neighbour.
    pub min_tokens: usize,
    pub include_thinking: bool,
}

impl Default for ChunkerOptions {
    fn default() -> Self {
        Self {
            max_tokens: 400,
            min_tokens: 120,
            include_thinking: false,
        }
    }
}

/// Identity of the stream being chunked.
#[derive(Debug, Clone)]
pub struct ChunkStream {
    pub session_id: String,
    pub project: String,
    pub agent_id: String,
    pub spawn_depth: u32,
    /// Clock to resume from (empty for a fresh session).
    pub start_clock: VectorClock,
}

struct Buffer {
    rendered: Vec<RenderedTurn>,
    tokens: usize,
    clock: VectorClock,
}

impl Buffer {
    fn new() -> Self {
        Self {
            rendered: Vec::new(),
            tokens: 0,
            clock: VectorClock::new(),
        }
    }

    fn push(&mut self, turn: RenderedTurn, clock: &VectorClock) {
        self.tokens += turn.tokens;
        self.rendered.push(turn);
        self.clock = clock.clone();
    }

    fn is_empty(&self) -> bool {
        self.rendered.is_empty()
    }
}

/// Slice a session's turns into chunks.
///
/// Packing walks turns left to right with a merge buffer: small turns merge
/// into it, normal turns join while the combined size stays under the cap,
/// and oversized turns are flushed on their own and split at section-marker
/// boundaries (paragraph boundaries as fallback).
///
/// Clock advancement is deterministic per turn: the human entry ticks once
/// when the user typed, then the agent entry ticks. Every emitted chunk
/// snapshots the clock as of its last merged turn.
pub fn chunk_turns(turns: &[Turn], stream: &ChunkStream, opts: ChunkerOptions) -> Vec<Chunk> {
    let render_opts = RenderOptions {
        include_thinking: opts.include_thinking,
    };

    let mut clock = stream.start_clock.clone();
    let mut chunks: Vec<Chunk> = Vec::new();
    let mut buffer = Buffer::new();
    let mut ordinal = 0usize;

    let flush = |buffer: &mut Buffer, chunks: &mut Vec<Chunk>, ordinal: &mut usize| {
        if buffer.is_empty() {
            return;
        }
        let full = std::mem::replace(buffer, Buffer::new());
        chunks.push(emit(full, stream, ordinal));
    };

    for turn in turns {
        let rendered = render_turn(turn, render_opts);

        if rendered.user_typed {
            clock.tick(HUMAN_AGENT);
        }
        clock.tick(&stream.agent_id);

        if rendered.tokens > opts.max_tokens {
            // Oversized turn: flush whatever is buffered, then split it.
            flush(&mut buffer, &mut chunks, &mut ordinal);
            for piece in split_rendered(&rendered, opts.max_tokens, opts.min_tokens) {
                let mut single = Buffer::new();
                single.push(piece, &clock);
                chunks.push(emit(single, stream, &mut ordinal));
            }
            continue;
        }

        // Tiny and normal turns alike join the buffer while the combined
        // size stays within the cap.
        if buffer.tokens + rendered.tokens > opts.max_tokens {
            flush(&mut buffer, &mut chunks, &mut ordinal);
        }
        buffer.push(rendered, &clock);
    }
    flush(&mut buffer, &mut chunks, &mut ordinal);

    chunks
}

fn emit(buffer: Buffer, stream: &ChunkStream, ordinal: &mut usize) -> Chunk {
    let text = buffer
        .rendered
        .iter()
        .map(|t| t.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    let first = &buffer.rendered[0];
    let last = &buffer.rendered[buffer.rendered.len() - 1];

    let mut turn_indices: Vec<usize> = buffer.rendered.iter().map(|t| t.turn_index).collect();
    turn_indices.dedup();

    let chunk = Chunk {
        id: Chunk::make_id(&stream.session_id, *ordinal),
        token_count: estimate_tokens(&text),
        text,
        project: stream.project.clone(),
        session_id: stream.session_id.clone(),
        agent_id: stream.agent_id.clone(),
        spawn_depth: stream.spawn_depth,
        start_ts: first.start_ts.clone(),
        end_ts: last.end_ts.clone(),
        code_block_count: buffer.rendered.iter().map(|t| t.code_block_count).sum(),
        tool_use_count: buffer.rendered.iter().map(|t| t.tool_use_count).sum(),
        has_thinking: buffer.rendered.iter().any(|t| t.has_thinking),
        turn_indices,
        clock: buffer.clock,
    };
    *ordinal += 1;
    chunk
}

/// Split an oversized rendered turn into pieces under the cap. Preferred
/// boundaries are section markers; paragraphs (blank lines) are the
/// fallback when a single section still overflows. A trailing piece below
/// the minimum folds into its predecessor when the combined size allows.
fn split_rendered(
    rendered: &RenderedTurn,
    max_tokens: usize,
    min_tokens: usize,
) -> Vec<RenderedTurn> {
    let mut segments = split_segments(&rendered.text, max_tokens);

    if segments.len() >= 2 {
        let tail = &segments[segments.len() - 1];
        let prev = &segments[segments.len() - 2];
        if estimate_tokens(tail) < min_tokens
            && estimate_tokens(prev) + estimate_tokens(tail) <= max_tokens
        {
            let tail = segments.pop().expect("checked len");
            let prev = segments.last_mut().expect("checked len");
            prev.push('\n');
            prev.push_str(&tail);
        }
    }

    segments
        .into_iter()
        .map(|text| RenderedTurn {
            turn_index: rendered.turn_index,
            tokens: estimate_tokens(&text),
            start_ts: rendered.start_ts.clone(),
            end_ts: rendered.end_ts.clone(),
            // Counters are recomputed per piece so chunk sums stay honest.
            code_block_count: text.matches("```").count() / 2,
            tool_use_count: text
                .lines()
                .filter(|l| l.starts_with(crate::render::TOOL_MARKER))
                .count(),
            has_thinking: text.contains(crate::render::THINKING_MARKER),
            user_typed: rendered.user_typed,
            text,
        })
        .collect()
}

fn split_segments(text: &str, max_tokens: usize) -> Vec<String> {
    // Group lines into sections at marker boundaries.
    let mut sections: Vec<String> = Vec::new();
    for line in text.lines() {
        if is_section_boundary(line) || sections.is_empty() {
            sections.push(line.to_string());
        } else {
            let last = sections.last_mut().expect("non-empty sections");
            last.push('\n');
            last.push_str(line);
        }
    }

    // Pack sections greedily; sections that alone exceed the cap fall back
    // to paragraph splitting.
    let mut pieces: Vec<String> = Vec::new();
    let mut current = String::new();
    for section in sections {
        if estimate_tokens(&section) > max_tokens {
            if !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
            }
            pieces.extend(split_paragraphs(&section, max_tokens));
            continue;
        }
        let candidate_tokens = estimate_tokens(&current) + estimate_tokens(&section);
        if !current.is_empty() && candidate_tokens > max_tokens {
            pieces.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(&section);
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

fn split_paragraphs(text: &str, max_tokens: usize) -> Vec<String> {
    let mut pieces: Vec<String> = Vec::new();
    let mut current = String::new();
    for paragraph in text.split("\n\n") {
        let candidate_tokens = estimate_tokens(&current) + estimate_tokens(paragraph);
        if !current.is_empty() && candidate_tokens > max_tokens {
            pieces.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(paragraph);
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    // A single paragraph larger than the cap stays whole; the budget in the
    // assembler handles pathological cases.
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_providers::AssistantBlock;
    use engram_types::MAIN_AGENT;

    fn turn(index: usize, user: &str, assistant: &str) -> Turn {
        Turn {
            index,
            start_ts: format!("2025-01-01T00:{:02}:00Z", index),
            end_ts: format!("2025-01-01T00:{:02}:30Z", index),
            user_text: user.to_string(),
            blocks: vec![AssistantBlock::Text(assistant.to_string())],
            exchanges: Vec::new(),
            has_thinking: false,
            record_count: 2,
        }
    }

    fn stream() -> ChunkStream {
        ChunkStream {
            session_id: "sess".to_string(),
            project: "proj".to_string(),
            agent_id: MAIN_AGENT.to_string(),
            spawn_depth: 0,
            start_clock: VectorClock::new(),
        }
    }

    #[test]
    fn test_tiny_turns_merge() {
        let turns = vec![
            turn(0, "hi", "hello"),
            turn(1, "ok", "sure"),
            turn(2, "thanks", "welcome"),
        ];
        let chunks = chunk_turns(&turns, &stream(), ChunkerOptions::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].id, "sess#0000");
        assert_eq!(chunks[0].turn_indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_oversized_turn_splits_at_sections() {
        let long_a = "a".repeat(1200); // ~300 tokens per section
        let long_b = "b".repeat(1200);
        let big = Turn {
            index: 0,
            start_ts: "2025-01-01T00:00:00Z".to_string(),
            end_ts: "2025-01-01T00:01:00Z".to_string(),
            user_text: long_a,
            blocks: vec![AssistantBlock::Text(long_b)],
            exchanges: Vec::new(),
            has_thinking: false,
            record_count: 2,
        };
        let chunks = chunk_turns(&[big], &stream(), ChunkerOptions::default());
        assert!(chunks.len() >= 2);
        assert!(chunks[0].text.starts_with("[user]"));
        assert!(chunks[1].text.starts_with("[assistant]"));
        // Split pieces of one turn share the turn index and clock.
        assert_eq!(chunks[0].turn_indices, chunks[1].turn_indices);
        assert_eq!(chunks[0].clock, chunks[1].clock);
    }

    #[test]
    fn test_clock_advances_human_then_agent() {
        let turns = vec![turn(0, "question", "answer")];
        let chunks = chunk_turns(&turns, &stream(), ChunkerOptions::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].clock.get(HUMAN_AGENT), 1);
        assert_eq!(chunks[0].clock.get(MAIN_AGENT), 1);
    }

    #[test]
    fn test_clock_snapshots_are_totally_ordered() {
        let body = "w".repeat(1000);
        let turns: Vec<Turn> = (0..4).map(|i| turn(i, "go on", &body)).collect();
        let chunks = chunk_turns(&turns, &stream(), ChunkerOptions::default());
        assert!(chunks.len() >= 2);
        for pair in chunks.windows(2) {
            assert!(pair[1].clock.dominates(&pair[0].clock));
            assert_ne!(pair[0].clock, pair[1].clock);
        }
    }

    #[test]
    fn test_ids_are_deterministic_across_runs() {
        let turns = vec![turn(0, "hi", "hello"), turn(1, "more", &"x".repeat(900))];
        let a = chunk_turns(&turns, &stream(), ChunkerOptions::default());
        let b = chunk_turns(&turns, &stream(), ChunkerOptions::default());
        let ids_a: Vec<&str> = a.iter().map(|c| c.id.as_str()).collect();
        let ids_b: Vec<&str> = b.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids_a, ids_b);
    }

    #[test]
    fn test_turn_without_assistant_content_still_chunks() {
        let mut t = turn(0, "a question with no reply", "");
        t.blocks.clear();
        let chunks = chunk_turns(&[t], &stream(), ChunkerOptions::default());
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.contains("a question with no reply"));
    }

    #[test]
    fn test_empty_input_yields_no_chunks() {
        let chunks = chunk_turns(&[], &stream(), ChunkerOptions::default());
        assert!(chunks.is_empty());
    }
}
