use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

use engram_index::Database;
use engram_providers::SessionTopology;
use engram_types::{Chunk, Edge, EdgeKind, VectorClock};

use crate::Result;

/// Opening text that marks a session as the continuation of an earlier one.
fn continuation_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\A(?:\[user\] )?This session is being continued from a previous")
            .expect("static regex")
    })
}

fn edge_clock(source: &Chunk, target: &Chunk) -> VectorClock {
    let mut clock = source.clock.clone();
    clock.merge(&target.clock);
    clock
}

fn make_edge(
    source: &Chunk,
    target: &Chunk,
    kind: EdgeKind,
    now: DateTime<Utc>,
    reference_type: Option<&str>,
) -> Edge {
    Edge {
        source: source.id.clone(),
        target: target.id.clone(),
        kind,
        initial_weight: kind.initial_weight(),
        link_count: 1,
        clock: Some(edge_clock(source, target)),
        created_at: now.to_rfc3339(),
        reference_type: reference_type.map(|s| s.to_string()),
    }
}

/// Materialize the within-chain edges of one session: consecutive chunks in
/// turn order. Returns the number of edges written.
pub fn create_within_chain_edges(
    db: &Database,
    chunks: &[Chunk],
    now: DateTime<Utc>,
) -> Result<usize> {
    let mut written = 0;
    for pair in chunks.windows(2) {
        db.upsert_edge(&make_edge(
            &pair[0],
            &pair[1],
            EdgeKind::WithinChain,
            now,
            None,
        ))?;
        written += 1;
    }
    Ok(written)
}

/// Post-batch pass: wire the last chunk of each session to the first chunk
/// of the chronologically next session when that session opens with a
/// continuation preamble.
pub fn link_cross_sessions(db: &Database, project: &str, now: DateTime<Utc>) -> Result<usize> {
    let sessions = db.list_sessions(project, None, None)?;
    let mut written = 0;

    for pair in sessions.windows(2) {
        let next_chunks = db.session_chunks(&pair[1].session_id)?;
        let Some(first_of_next) = next_chunks.first() else {
            continue;
        };
        if !continuation_pattern().is_match(&first_of_next.text) {
            continue;
        }
        let prev_chunks = db.session_chunks(&pair[0].session_id)?;
        let Some(last_of_prev) = prev_chunks.last() else {
            continue;
        };

        db.upsert_edge(&make_edge(
            last_of_prev,
            first_of_next,
            EdgeKind::CrossSession,
            now,
            Some("continuation"),
        ))?;
        written += 1;
        tracing::debug!(
            from = %pair[0].session_id,
            to = %pair[1].session_id,
            "linked continuation sessions"
        );
    }
    Ok(written)
}

/// The chunk of `chunks` covering a turn index: the last chunk whose first
/// covered turn is not past it. Falls back to the nearest end.
fn chunk_for_turn(chunks: &[Chunk], turn_index: usize) -> Option<&Chunk> {
    if chunks.is_empty() {
        return None;
    }
    let mut covering = &chunks[0];
    for chunk in chunks {
        if chunk.turn_indices.iter().any(|&t| t == turn_index) {
            return Some(chunk);
        }
        if chunk.turn_indices.first().is_some_and(|&t| t <= turn_index) {
            covering = chunk;
        }
    }
    Some(covering)
}

/// Wire the fork/join edges of a session: brief at each spawn point, debrief
/// at each return. Team sessions use the team edge kinds, and peer messages
/// get their own edges.
pub fn create_spawn_edges(
    db: &Database,
    parent_chunks: &[Chunk],
    agent_chunks: &BTreeMap<String, Vec<Chunk>>,
    topology: &SessionTopology,
    now: DateTime<Utc>,
) -> Result<usize> {
    let is_team = topology.is_team_session();
    let (spawn_kind, return_kind) = if is_team {
        (EdgeKind::TeamSpawn, EdgeKind::TeamReport)
    } else {
        (EdgeKind::Brief, EdgeKind::Debrief)
    };

    let mut written = 0;
    for spawn in &topology.spawns {
        let Some(sub_chunks) = agent_chunks.get(&spawn.agent_id) else {
            continue;
        };
        let (Some(sub_first), Some(sub_last)) = (sub_chunks.first(), sub_chunks.last()) else {
            continue;
        };

        if let Some(parent) = chunk_for_turn(parent_chunks, spawn.turn_index) {
            db.upsert_edge(&make_edge(parent, sub_first, spawn_kind, now, Some("spawn")))?;
            written += 1;
        }
        if let Some(return_chunk) = chunk_for_turn(parent_chunks, spawn.return_turn_index) {
            db.upsert_edge(&make_edge(
                sub_last,
                return_chunk,
                return_kind,
                now,
                Some("return"),
            ))?;
            written += 1;
        }
    }

    // Peer messages resolve through teammate names to the receiving agent's
    // first chunk.
    if let Some(team) = &topology.team {
        let by_name: BTreeMap<&str, &str> = team
            .members
            .iter()
            .map(|(id, name)| (name.as_str(), id.as_str()))
            .collect();

        for message in &topology.peer_messages {
            let Some(agent_id) = by_name.get(message.to.as_str()) else {
                continue;
            };
            let Some(receiver_first) = agent_chunks.get(*agent_id).and_then(|c| c.first()) else {
                continue;
            };
            let Some(sender) = chunk_for_turn(parent_chunks, message.turn_index) else {
                continue;
            };
            if sender.id == receiver_first.id {
                continue;
            }
            db.upsert_edge(&make_edge(
                sender,
                receiver_first,
                EdgeKind::PeerMessage,
                now,
                Some("peer_message"),
            ))?;
            written += 1;
        }
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_providers::{SpawnPoint, TeamTopology};
    use engram_types::MAIN_AGENT;

    fn chunk(id: &str, session: &str, turns: &[usize], agent: &str) -> Chunk {
        let mut clock = VectorClock::new();
        clock.tick(agent);
        Chunk {
            id: id.to_string(),
            text: format!("[user] body of {}", id),
            token_count: 40,
            project: "proj".to_string(),
            session_id: session.to_string(),
            agent_id: agent.to_string(),
            spawn_depth: if agent == MAIN_AGENT { 0 } else { 1 },
            start_ts: "2025-01-01T00:00:00Z".to_string(),
            end_ts: "2025-01-01T00:01:00Z".to_string(),
            code_block_count: 0,
            tool_use_count: 0,
            has_thinking: false,
            turn_indices: turns.to_vec(),
            clock,
        }
    }

    fn insert_all(db: &Database, chunks: &[Chunk]) {
        for c in chunks {
            db.insert_chunk(c).unwrap();
        }
    }

    #[test]
    fn test_within_chain_edges_connect_consecutive_chunks() {
        let db = Database::open_in_memory().unwrap();
        let chunks: Vec<Chunk> = (0..5)
            .map(|i| chunk(&Chunk::make_id("s", i), "s", &[i], MAIN_AGENT))
            .collect();
        insert_all(&db, &chunks);

        let written = create_within_chain_edges(&db, &chunks, Utc::now()).unwrap();
        assert_eq!(written, 4);
        assert_eq!(db.edge_count().unwrap(), 4);

        let from_first = db.edges_from("s#0000").unwrap();
        assert_eq!(from_first.len(), 1);
        assert_eq!(from_first[0].target, "s#0001");
        assert_eq!(from_first[0].kind, EdgeKind::WithinChain);
        assert_eq!(from_first[0].initial_weight, 1.0);
    }

    #[test]
    fn test_reingest_does_not_grow_edges() {
        let db = Database::open_in_memory().unwrap();
        let chunks: Vec<Chunk> = (0..3)
            .map(|i| chunk(&Chunk::make_id("s", i), "s", &[i], MAIN_AGENT))
            .collect();
        insert_all(&db, &chunks);

        create_within_chain_edges(&db, &chunks, Utc::now()).unwrap();
        create_within_chain_edges(&db, &chunks, Utc::now()).unwrap();
        assert_eq!(db.edge_count().unwrap(), 2);

        let edge = db
            .get_edge("s#0000", "s#0001", EdgeKind::WithinChain)
            .unwrap()
            .unwrap();
        assert_eq!(edge.link_count, 2);
    }

    #[test]
    fn test_cross_session_link_on_continuation() {
        let db = Database::open_in_memory().unwrap();
        let mut a: Vec<Chunk> = (0..3)
            .map(|i| chunk(&Chunk::make_id("a", i), "a", &[i], MAIN_AGENT))
            .collect();
        for (i, c) in a.iter_mut().enumerate() {
            c.start_ts = format!("2025-01-01T00:0{}:00Z", i);
            c.end_ts = c.start_ts.clone();
        }

        let mut b: Vec<Chunk> = (0..2)
            .map(|i| chunk(&Chunk::make_id("b", i), "b", &[i], MAIN_AGENT))
            .collect();
        b[0].text =
            "[user] This session is being continued from a previous conversation".to_string();
        for (i, c) in b.iter_mut().enumerate() {
            c.start_ts = format!("2025-01-02T00:0{}:00Z", i);
            c.end_ts = c.start_ts.clone();
        }

        insert_all(&db, &a);
        insert_all(&db, &b);

        let written = link_cross_sessions(&db, "proj", Utc::now()).unwrap();
        assert_eq!(written, 1);

        let edge = db
            .get_edge("a#0002", "b#0000", EdgeKind::CrossSession)
            .unwrap()
            .unwrap();
        assert_eq!(edge.reference_type.as_deref(), Some("continuation"));
    }

    #[test]
    fn test_no_cross_session_link_without_continuation() {
        let db = Database::open_in_memory().unwrap();
        let a = vec![chunk("a#0000", "a", &[0], MAIN_AGENT)];
        let mut b = vec![chunk("b#0000", "b", &[0], MAIN_AGENT)];
        b[0].start_ts = "2025-01-02T00:00:00Z".to_string();
        insert_all(&db, &a);
        insert_all(&db, &b);

        assert_eq!(link_cross_sessions(&db, "proj", Utc::now()).unwrap(), 0);
    }

    #[test]
    fn test_brief_and_debrief_edges() {
        let db = Database::open_in_memory().unwrap();
        let parent: Vec<Chunk> = (0..4)
            .map(|i| chunk(&Chunk::make_id("s", i), "s", &[i], MAIN_AGENT))
            .collect();
        let sub: Vec<Chunk> = (0..2)
            .map(|i| chunk(&Chunk::make_id("x", i), "x", &[i], "7f2abd2d"))
            .collect();
        insert_all(&db, &parent);
        insert_all(&db, &sub);

        let mut agent_chunks = BTreeMap::new();
        agent_chunks.insert("7f2abd2d".to_string(), sub.clone());

        let topology = SessionTopology {
            spawns: vec![SpawnPoint {
                turn_index: 2,
                tool_use_id: "t1".to_string(),
                agent_id: "7f2abd2d".to_string(),
                agent_name: None,
                spawn_ts: "2025-01-01T00:02:00Z".to_string(),
                return_turn_index: 3,
            }],
            team: None,
            peer_messages: Vec::new(),
        };

        let written =
            create_spawn_edges(&db, &parent, &agent_chunks, &topology, Utc::now()).unwrap();
        assert_eq!(written, 2);

        assert!(
            db.get_edge("s#0002", "x#0000", EdgeKind::Brief)
                .unwrap()
                .is_some()
        );
        assert!(
            db.get_edge("x#0001", "s#0003", EdgeKind::Debrief)
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn test_team_session_uses_team_kinds() {
        let db = Database::open_in_memory().unwrap();
        let parent: Vec<Chunk> = (0..2)
            .map(|i| chunk(&Chunk::make_id("s", i), "s", &[i], MAIN_AGENT))
            .collect();
        let sub = vec![chunk("x#0000", "x", &[0], "aaaa1111")];
        insert_all(&db, &parent);
        insert_all(&db, &sub);

        let mut agent_chunks = BTreeMap::new();
        agent_chunks.insert("aaaa1111".to_string(), sub);

        let mut members = BTreeMap::new();
        members.insert("aaaa1111".to_string(), "alice".to_string());

        let topology = SessionTopology {
            spawns: vec![SpawnPoint {
                turn_index: 0,
                tool_use_id: "t1".to_string(),
                agent_id: "aaaa1111".to_string(),
                agent_name: Some("alice".to_string()),
                spawn_ts: "2025-01-01T00:00:00Z".to_string(),
                return_turn_index: 1,
            }],
            team: Some(TeamTopology {
                team_name: Some("reviewers".to_string()),
                members,
            }),
            peer_messages: Vec::new(),
        };

        create_spawn_edges(&db, &parent, &agent_chunks, &topology, Utc::now()).unwrap();

        let spawn_edge = db
            .get_edge("s#0000", "x#0000", EdgeKind::TeamSpawn)
            .unwrap()
            .unwrap();
        assert_eq!(spawn_edge.initial_weight, 0.9);
        assert!(
            db.get_edge("x#0000", "s#0001", EdgeKind::TeamReport)
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn test_edge_clock_merges_endpoints() {
        let a = chunk("a#0000", "a", &[0], MAIN_AGENT);
        let b = chunk("b#0000", "b", &[0], "sub1");
        let merged = edge_clock(&a, &b);
        assert_eq!(merged.get(MAIN_AGENT), 1);
        assert_eq!(merged.get("sub1"), 1);
    }
}
