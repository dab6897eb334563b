use serde::{Deserialize, Serialize};

use crate::clock::VectorClock;

/// Kind of a directed causal edge between two chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Consecutive chunks of the same session, in turn order.
    WithinChain,
    /// Last chunk of a prior session to the first chunk of its continuation.
    CrossSession,
    /// Parent chunk to the first chunk of a spawned sub-agent.
    Brief,
    /// Last chunk of a sub-agent back to the parent chunk at return.
    Debrief,
    TeamSpawn,
    TeamReport,
    PeerMessage,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::WithinChain => "within_chain",
            EdgeKind::CrossSession => "cross_session",
            EdgeKind::Brief => "brief",
            EdgeKind::Debrief => "debrief",
            EdgeKind::TeamSpawn => "team_spawn",
            EdgeKind::TeamReport => "team_report",
            EdgeKind::PeerMessage => "peer_message",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "within_chain" => Some(EdgeKind::WithinChain),
            "cross_session" => Some(EdgeKind::CrossSession),
            "brief" => Some(EdgeKind::Brief),
            "debrief" => Some(EdgeKind::Debrief),
            "team_spawn" => Some(EdgeKind::TeamSpawn),
            "team_report" => Some(EdgeKind::TeamReport),
            "peer_message" => Some(EdgeKind::PeerMessage),
            _ => None,
        }
    }

    /// Weight a freshly detected edge of this kind starts with.
    pub fn initial_weight(&self) -> f64 {
        match self {
            EdgeKind::WithinChain | EdgeKind::CrossSession | EdgeKind::Brief | EdgeKind::Debrief => {
                1.0
            }
            EdgeKind::TeamSpawn | EdgeKind::TeamReport => 0.9,
            EdgeKind::PeerMessage => 0.85,
        }
    }
}

/// Direction of travel over the stored (forward) edges.
///
/// Storage materializes forward edges only; the backward view is obtained by
/// querying on the target endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Forward,
    Backward,
}

/// A stored causal edge. Identity is (source, target, kind).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
    pub kind: EdgeKind,
    pub initial_weight: f64,
    /// Incremented when the same logical edge is re-detected.
    pub link_count: u32,
    /// Clock at edge creation; edges without one fall back to time decay.
    pub clock: Option<VectorClock>,
    /// RFC-3339 wall-clock creation time.
    pub created_at: String,
    /// Mechanism that produced the edge (file-path reference, topic
    /// continuation, ...), when known.
    pub reference_type: Option<String>,
}
