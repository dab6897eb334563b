use std::collections::BTreeMap;

use crate::schema::{AssistantContent, TranscriptRecord, UserContent};
use crate::turns::starts_turn;

/// Tool names that spawn a sub-agent.
pub const SPAWN_TOOLS: &[&str] = &["Task", "Agent", "SubAgent"];

/// Tool names that organize agents into a team.
pub const TEAM_CREATE_TOOLS: &[&str] = &["TeamCreate", "team_create"];

/// Tool names that exchange peer messages within a team.
pub const SEND_MESSAGE_TOOLS: &[&str] = &["SendMessage", "send_message"];

/// A fork point: the parent spawned a sub-agent at this turn.
#[derive(Debug, Clone)]
pub struct SpawnPoint {
    /// Turn whose chunk becomes the brief-edge source.
    pub turn_index: usize,
    pub tool_use_id: String,
    /// Real sub-agent id, matched through a progress record or tool result.
    pub agent_id: String,
    pub agent_name: Option<String>,
    pub spawn_ts: String,
    /// Turn whose chunk becomes the debrief-edge target.
    pub return_turn_index: usize,
}

/// Mapping of a team session: agent id to human-readable teammate name.
#[derive(Debug, Clone, Default)]
pub struct TeamTopology {
    pub team_name: Option<String>,
    pub members: BTreeMap<String, String>,
}

/// A peer message sent from the main stream to a named teammate.
#[derive(Debug, Clone)]
pub struct PeerMessageEvent {
    pub turn_index: usize,
    pub to: String,
}

#[derive(Debug, Clone, Default)]
pub struct SessionTopology {
    pub spawns: Vec<SpawnPoint>,
    pub team: Option<TeamTopology>,
    pub peer_messages: Vec<PeerMessageEvent>,
}

impl SessionTopology {
    pub fn is_team_session(&self) -> bool {
        self.team.is_some()
    }
}

struct SpawnCandidate {
    turn_index: usize,
    tool_use_id: String,
    explicit_name: Option<String>,
    spawn_ts: String,
    agent_id: Option<String>,
    result_name: Option<String>,
    /// Turn containing a tool result that references the sub-agent.
    reference_turn: Option<usize>,
}

fn input_str(input: &serde_json::Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| {
        input
            .get(k)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
    })
}

/// Discover sub-agent spawn/return points and team structure from the main
/// record stream of a session.
///
/// Name resolution order per teammate: the spawn input's explicit name, then
/// an id carried in the tool result, then the progress record that links the
/// tool-use id to the agent id. Name collisions are disambiguated with a
/// short agent-id prefix.
pub fn detect_topology(records: &[TranscriptRecord]) -> SessionTopology {
    let mut candidates: Vec<SpawnCandidate> = Vec::new();
    let mut by_tool_use: BTreeMap<String, usize> = BTreeMap::new();
    let mut peer_messages: Vec<PeerMessageEvent> = Vec::new();
    let mut team_name: Option<String> = None;
    let mut saw_team_tool = false;
    let mut current_turn: Option<usize> = None;
    let mut turn_count = 0usize;

    for record in records {
        if record.is_sidechain() {
            continue;
        }
        match record {
            TranscriptRecord::User(user) => {
                if starts_turn(user) {
                    current_turn = Some(turn_count);
                    turn_count += 1;
                }
                // Tool results can resolve a pending spawn: an agentId on the
                // result block, or the record-level tool_use_result.
                for content in &user.message.content {
                    if let UserContent::ToolResult {
                        tool_use_id,
                        agent_id,
                        ..
                    } = content
                        && let Some(&idx) = by_tool_use.get(tool_use_id)
                    {
                        let candidate = &mut candidates[idx];
                        let resolved = agent_id
                            .clone()
                            .or_else(|| {
                                user.tool_use_result
                                    .as_ref()
                                    .and_then(|r| r.agent_id.clone())
                            });
                        if candidate.agent_id.is_none() {
                            candidate.agent_id = resolved;
                        }
                        if candidate.result_name.is_none() {
                            candidate.result_name = user
                                .tool_use_result
                                .as_ref()
                                .and_then(|r| r.agent_name.clone());
                        }
                        candidate.reference_turn = current_turn;
                    }
                }
            }
            TranscriptRecord::Assistant(asst) => {
                for content in &asst.message.content {
                    if let AssistantContent::ToolUse { id, name, input } = content {
                        if SPAWN_TOOLS.contains(&name.as_str()) {
                            if team_name.is_none() {
                                team_name = input_str(input, &["team_name"]);
                            }
                            by_tool_use.insert(id.clone(), candidates.len());
                            candidates.push(SpawnCandidate {
                                turn_index: current_turn.unwrap_or(0),
                                tool_use_id: id.clone(),
                                explicit_name: input_str(
                                    input,
                                    &["name", "agent_name", "teammate_name"],
                                ),
                                spawn_ts: asst.timestamp.clone(),
                                agent_id: None,
                                result_name: None,
                                reference_turn: None,
                            });
                        } else if TEAM_CREATE_TOOLS.contains(&name.as_str()) {
                            saw_team_tool = true;
                            if team_name.is_none() {
                                team_name = input_str(input, &["name", "team_name"]);
                            }
                        } else if SEND_MESSAGE_TOOLS.contains(&name.as_str()) {
                            saw_team_tool = true;
                            if let Some(to) = input_str(input, &["to", "recipient"]) {
                                peer_messages.push(PeerMessageEvent {
                                    turn_index: current_turn.unwrap_or(0),
                                    to,
                                });
                            }
                        }
                    }
                }
            }
            TranscriptRecord::Progress(progress) => {
                // Progress records link a spawn tool-use id to the real
                // sub-agent id before any result exists.
                if let (Some(tool_use_id), Some(agent_id)) =
                    (&progress.tool_use_id, &progress.agent_id)
                    && let Some(&idx) = by_tool_use.get(tool_use_id)
                {
                    let candidate = &mut candidates[idx];
                    if candidate.agent_id.is_none() {
                        candidate.agent_id = Some(agent_id.clone());
                    }
                    if candidate.result_name.is_none() {
                        candidate.result_name = progress.agent_name.clone();
                    }
                }
            }
            _ => {}
        }
    }

    let mut spawns = Vec::new();
    let mut taken_names: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();
    let mut members = BTreeMap::new();

    for candidate in candidates {
        // Only candidates matched to a real sub-agent id become spawn points.
        let Some(agent_id) = candidate.agent_id else {
            continue;
        };

        let base_name = candidate
            .explicit_name
            .or(candidate.result_name)
            .unwrap_or_else(|| agent_id.clone());
        let name = if taken_names.insert(base_name.clone()) {
            base_name
        } else {
            let prefix: String = agent_id.chars().take(4).collect();
            format!("{} ({})", base_name, prefix)
        };

        // Return point: the turn that references the sub-agent's output if it
        // lies past the spawn turn, otherwise the turn right after the spawn.
        let return_turn_index = match candidate.reference_turn {
            Some(t) if t > candidate.turn_index => t,
            _ => candidate.turn_index + 1,
        };

        members.insert(agent_id.clone(), name.clone());
        spawns.push(SpawnPoint {
            turn_index: candidate.turn_index,
            tool_use_id: candidate.tool_use_id,
            agent_id,
            agent_name: Some(name),
            spawn_ts: candidate.spawn_ts,
            return_turn_index,
        });
    }

    let team = if saw_team_tool || team_name.is_some() {
        Some(TeamTopology { team_name, members })
    } else {
        None
    };

    SessionTopology {
        spawns,
        team,
        peer_messages,
    }
}
