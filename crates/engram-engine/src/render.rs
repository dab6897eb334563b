use engram_providers::{AssistantBlock, ToolExchange, Turn};
use engram_types::{estimate_tokens, truncate};

/// Section markers used by the renderer. The chunk splitter keys on these
/// same prefixes, so they live in one place.
pub const USER_MARKER: &str = "[user]";
pub const THINKING_MARKER: &str = "[thinking]";
pub const ASSISTANT_MARKER: &str = "[assistant]";
pub const TOOL_MARKER: &str = "[tool:";
pub const RESULT_MARKER: &str = "[result]";

/// Character cap applied to tool results before they enter a chunk.
const TOOL_RESULT_CAP: usize = 400;

/// Character cap for the fallback JSON rendering of a tool input.
const TOOL_INPUT_CAP: usize = 120;

/// Input fields considered salient enough to stand for the whole tool call,
/// probed in order.
const SALIENT_FIELDS: &[&str] = &["command", "pattern", "file_path", "query", "url", "prompt"];

#[derive(Debug, Clone, Copy, Default)]
pub struct RenderOptions {
    pub include_thinking: bool,
}

fn summarize_tool_input(exchange: &ToolExchange) -> String {
    for field in SALIENT_FIELDS {
        if let Some(value) = exchange.input.get(field).and_then(|v| v.as_str())
            && !value.is_empty()
        {
            return truncate(value, TOOL_INPUT_CAP);
        }
    }
    truncate(&exchange.input.to_string(), TOOL_INPUT_CAP)
}

/// A turn rendered to plain text plus the counters the chunk record needs.
#[derive(Debug, Clone)]
pub struct RenderedTurn {
    pub turn_index: usize,
    pub text: String,
    pub tokens: usize,
    pub start_ts: String,
    pub end_ts: String,
    pub code_block_count: usize,
    pub tool_use_count: usize,
    pub has_thinking: bool,
    pub user_typed: bool,
}

/// Render one turn as a block of marked sections: the user line, thinking
/// (when included), assistant text, and each tool invocation with its
/// truncated result.
pub fn render_turn(turn: &Turn, opts: RenderOptions) -> RenderedTurn {
    let mut lines: Vec<String> = Vec::new();
    let user_typed = !turn.user_text.trim().is_empty();
    if user_typed {
        lines.push(format!("{} {}", USER_MARKER, turn.user_text.trim()));
    }

    for block in &turn.blocks {
        match block {
            AssistantBlock::Thinking(text) => {
                if opts.include_thinking {
                    lines.push(format!("{} {}", THINKING_MARKER, text.trim()));
                }
            }
            AssistantBlock::Text(text) => {
                lines.push(format!("{} {}", ASSISTANT_MARKER, text.trim()));
            }
            AssistantBlock::ToolUse { id, name } => {
                let Some(exchange) = turn.exchanges.iter().find(|e| &e.tool_use_id == id) else {
                    continue;
                };
                lines.push(format!(
                    "[tool: {}] {}",
                    name,
                    summarize_tool_input(exchange)
                ));
                if let Some(result) = &exchange.result {
                    let flag = if result.is_error { " (error)" } else { "" };
                    lines.push(format!(
                        "{}{} {}",
                        RESULT_MARKER,
                        flag,
                        truncate(result.content.trim(), TOOL_RESULT_CAP)
                    ));
                }
            }
        }
    }

    let text = lines.join("\n");
    let code_block_count = text.matches("```").count() / 2;

    RenderedTurn {
        turn_index: turn.index,
        tokens: estimate_tokens(&text),
        start_ts: turn.start_ts.clone(),
        end_ts: turn.end_ts.clone(),
        code_block_count,
        tool_use_count: turn.exchanges.len(),
        has_thinking: turn.has_thinking,
        user_typed,
        text,
    }
}

/// True if the line opens a rendered section (preferred split boundary).
pub fn is_section_boundary(line: &str) -> bool {
    line.starts_with(USER_MARKER)
        || line.starts_with(THINKING_MARKER)
        || line.starts_with(ASSISTANT_MARKER)
        || line.starts_with(TOOL_MARKER)
        || line.starts_with(RESULT_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_providers::ToolOutcome;

    fn sample_turn() -> Turn {
        Turn {
            index: 0,
            start_ts: "2025-01-01T00:00:00Z".to_string(),
            end_ts: "2025-01-01T00:01:00Z".to_string(),
            user_text: "run the tests".to_string(),
            blocks: vec![
                AssistantBlock::Thinking("let me check".to_string()),
                AssistantBlock::ToolUse {
                    id: "t1".to_string(),
                    name: "Bash".to_string(),
                },
                AssistantBlock::Text("All green.".to_string()),
            ],
            exchanges: vec![ToolExchange {
                tool_use_id: "t1".to_string(),
                name: "Bash".to_string(),
                input: serde_json::json!({"command": "cargo test"}),
                result: Some(ToolOutcome {
                    content: "ok. 42 passed".to_string(),
                    is_error: false,
                }),
            }],
            has_thinking: true,
            record_count: 4,
        }
    }

    #[test]
    fn test_render_includes_sections_in_order() {
        let rendered = render_turn(&sample_turn(), RenderOptions::default());
        let lines: Vec<&str> = rendered.text.lines().collect();
        assert_eq!(lines[0], "[user] run the tests");
        assert_eq!(lines[1], "[tool: Bash] cargo test");
        assert_eq!(lines[2], "[result] ok. 42 passed");
        assert_eq!(lines[3], "[assistant] All green.");
        assert!(rendered.user_typed);
        assert_eq!(rendered.tool_use_count, 1);
    }

    #[test]
    fn test_thinking_excluded_by_default() {
        let rendered = render_turn(&sample_turn(), RenderOptions::default());
        assert!(!rendered.text.contains("[thinking]"));
        assert!(rendered.has_thinking);

        let with = render_turn(
            &sample_turn(),
            RenderOptions {
                include_thinking: true,
            },
        );
        assert!(with.text.contains("[thinking] let me check"));
    }

    #[test]
    fn test_long_tool_result_truncated() {
        let mut turn = sample_turn();
        turn.exchanges[0].result = Some(ToolOutcome {
            content: "x".repeat(2000),
            is_error: false,
        });
        let rendered = render_turn(&turn, RenderOptions::default());
        assert!(rendered.text.contains("...(truncated)"));
    }

    #[test]
    fn test_tool_without_salient_field_renders_json() {
        let mut turn = sample_turn();
        turn.exchanges[0].input = serde_json::json!({"verbosity": 3});
        let rendered = render_turn(&turn, RenderOptions::default());
        assert!(rendered.text.contains(r#"{"verbosity":3}"#));
    }

    #[test]
    fn test_section_boundaries() {
        assert!(is_section_boundary("[user] hi"));
        assert!(is_section_boundary("[tool: Bash] ls"));
        assert!(is_section_boundary("[result] ok"));
        assert!(!is_section_boundary("plain continuation line"));
    }
}
