use serde_json::Value;
use std::collections::HashMap;

use crate::schema::{AssistantContent, TranscriptRecord, UserContent};

/// Ordered assistant output within a turn.
#[derive(Debug, Clone)]
pub enum AssistantBlock {
    Text(String),
    Thinking(String),
    ToolUse { id: String, name: String },
}

#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub content: String,
    pub is_error: bool,
}

/// A tool invocation paired with its result, when one arrived.
#[derive(Debug, Clone)]
pub struct ToolExchange {
    pub tool_use_id: String,
    pub name: String,
    pub input: Value,
    pub result: Option<ToolOutcome>,
}

/// One user prompt plus everything the assistant did in response.
#[derive(Debug, Clone)]
pub struct Turn {
    pub index: usize,
    pub start_ts: String,
    pub end_ts: String,
    pub user_text: String,
    pub blocks: Vec<AssistantBlock>,
    pub exchanges: Vec<ToolExchange>,
    pub has_thinking: bool,
    pub record_count: usize,
}

#[derive(Debug, Clone, Default)]
pub struct TurnOptions {
    /// Keep sidechain records instead of skipping them (used when parsing a
    /// sub-agent file on its own).
    pub include_sidechain: bool,
}

/// True if this user record opens a new turn: typed content that is neither
/// solely tool results nor an interruption notice.
pub(crate) fn starts_turn(user: &crate::schema::UserRecord) -> bool {
    if user.is_meta {
        return false;
    }
    user.message.content.iter().any(|c| match c {
        UserContent::Text { text } => {
            let text = text.trim();
            !text.is_empty() && !text.starts_with("[Request interrupted")
        }
        _ => false,
    })
}

fn user_text(user: &crate::schema::UserRecord) -> String {
    user.message
        .content
        .iter()
        .filter_map(|c| match c {
            UserContent::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

struct PartialTurn {
    turn: Turn,
    pending: HashMap<String, usize>,
}

impl PartialTurn {
    fn new(index: usize, start_ts: String, user_text: String) -> Self {
        Self {
            turn: Turn {
                index,
                end_ts: start_ts.clone(),
                start_ts,
                user_text,
                blocks: Vec::new(),
                exchanges: Vec::new(),
                has_thinking: false,
                record_count: 1,
            },
            pending: HashMap::new(),
        }
    }
}

/// Streaming turn assembler: pulls transcript records and yields turns.
///
/// Only one turn is buffered at a time, so arbitrarily large transcripts
/// stream through in constant memory.
pub struct TurnStream<I: Iterator<Item = TranscriptRecord>> {
    records: I,
    opts: TurnOptions,
    current: Option<PartialTurn>,
    next_index: usize,
}

impl<I: Iterator<Item = TranscriptRecord>> TurnStream<I> {
    pub fn new(records: I, opts: TurnOptions) -> Self {
        Self {
            records,
            opts,
            current: None,
            next_index: 0,
        }
    }

    fn absorb_assistant(&mut self, asst: &crate::schema::AssistantRecord) {
        let Some(partial) = self.current.as_mut() else {
            return; // assistant output before any user prompt: dropped
        };
        partial.turn.record_count += 1;
        partial.turn.end_ts = asst.timestamp.clone();

        for content in &asst.message.content {
            match content {
                AssistantContent::Text { text } => {
                    partial.turn.blocks.push(AssistantBlock::Text(text.clone()));
                }
                AssistantContent::Thinking { thinking } => {
                    partial.turn.has_thinking = true;
                    partial
                        .turn
                        .blocks
                        .push(AssistantBlock::Thinking(thinking.clone()));
                }
                AssistantContent::ToolUse { id, name, input } => {
                    partial.turn.blocks.push(AssistantBlock::ToolUse {
                        id: id.clone(),
                        name: name.clone(),
                    });
                    let idx = partial.turn.exchanges.len();
                    partial.turn.exchanges.push(ToolExchange {
                        tool_use_id: id.clone(),
                        name: name.clone(),
                        input: input.clone(),
                        result: None,
                    });
                    partial.pending.insert(id.clone(), idx);
                }
                AssistantContent::Unknown => {}
            }
        }
    }

    fn absorb_tool_results(&mut self, user: &crate::schema::UserRecord) {
        let Some(partial) = self.current.as_mut() else {
            return;
        };
        partial.turn.record_count += 1;
        partial.turn.end_ts = user.timestamp.clone();

        for content in &user.message.content {
            if let UserContent::ToolResult {
                tool_use_id,
                content,
                is_error,
                ..
            } = content
                && let Some(&idx) = partial.pending.get(tool_use_id)
            {
                let text = match content {
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => String::new(),
                };
                if let Some(exchange) = partial.turn.exchanges.get_mut(idx) {
                    exchange.result = Some(ToolOutcome {
                        content: text,
                        is_error: *is_error,
                    });
                }
                partial.pending.remove(tool_use_id);
            }
        }
    }
}

impl<I: Iterator<Item = TranscriptRecord>> Iterator for TurnStream<I> {
    type Item = Turn;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let Some(record) = self.records.next() else {
                // End of records: flush the last buffered turn.
                return self.current.take().map(|p| p.turn);
            };

            if record.is_sidechain() && !self.opts.include_sidechain {
                continue;
            }

            match record {
                TranscriptRecord::User(user) => {
                    if starts_turn(&user) {
                        let finished = self.current.take().map(|p| p.turn);
                        let index = self.next_index;
                        self.next_index += 1;
                        self.current = Some(PartialTurn::new(
                            index,
                            user.timestamp.clone(),
                            user_text(&user),
                        ));
                        if let Some(turn) = finished {
                            return Some(turn);
                        }
                    } else {
                        self.absorb_tool_results(&user);
                    }
                }
                TranscriptRecord::Assistant(asst) => {
                    self.absorb_assistant(&asst);
                }
                // Noise and non-conversational record types are dropped.
                TranscriptRecord::Progress(_)
                | TranscriptRecord::Snapshot(_)
                | TranscriptRecord::System(_)
                | TranscriptRecord::Summary(_)
                | TranscriptRecord::Unknown => {}
            }
        }
    }
}

#[derive(Debug)]
pub struct TurnAssembly {
    pub turns: Vec<Turn>,
    /// Tool uses that never received a result anywhere in the session.
    pub unmatched_tool_uses: usize,
}

/// Assemble all turns of a session and report structural leftovers.
pub fn assemble_turns(
    records: impl IntoIterator<Item = TranscriptRecord>,
    opts: TurnOptions,
) -> TurnAssembly {
    let turns: Vec<Turn> = TurnStream::new(records.into_iter(), opts).collect();
    let unmatched_tool_uses = turns
        .iter()
        .flat_map(|t| t.exchanges.iter())
        .filter(|e| e.result.is_none())
        .count();
    TurnAssembly {
        turns,
        unmatched_tool_uses,
    }
}
