use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reserved agent id for the main transcript.
pub const MAIN_AGENT: &str = "main";

/// Reserved agent id under which user keystrokes are counted.
pub const HUMAN_AGENT: &str = "human";

/// Per-agent logical clock.
///
/// Maps an agent id to a non-negative tick counter. Clocks compose by
/// per-agent maximum and advance by per-agent increment; both operations are
/// pure and never fail. A `BTreeMap` keeps the JSON encoding stable so the
/// persisted form round-trips byte-identically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorClock(BTreeMap<String, u64>);

impl VectorClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Current counter for an agent (0 if the agent has never ticked).
    pub fn get(&self, agent: &str) -> u64 {
        self.0.get(agent).copied().unwrap_or(0)
    }

    /// Increment one agent's counter by one, leaving all others untouched.
    pub fn tick(&mut self, agent: &str) {
        *self.0.entry(agent.to_string()).or_insert(0) += 1;
    }

    /// Compose with another clock by per-agent maximum.
    pub fn merge(&mut self, other: &VectorClock) {
        for (agent, &count) in &other.0 {
            let entry = self.0.entry(agent.clone()).or_insert(0);
            if count > *entry {
                *entry = count;
            }
        }
    }

    /// True if `self[a] >= other[a]` for every agent `a`.
    pub fn dominates(&self, other: &VectorClock) -> bool {
        other.0.iter().all(|(agent, &count)| self.get(agent) >= count)
    }

    /// Ticks across all agents that happened between this clock and a later
    /// reference clock: `Σ_a max(0, reference[a] − self[a])`.
    pub fn hops_to(&self, reference: &VectorClock) -> u64 {
        reference
            .0
            .iter()
            .map(|(agent, &count)| count.saturating_sub(self.get(agent)))
            .sum()
    }

    pub fn agents(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(|s| s.as_str())
    }

    pub fn to_json(&self) -> String {
        // Serialization of a string->u64 map cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn from_json(json: &str) -> Option<Self> {
        serde_json::from_str(json).ok()
    }
}
