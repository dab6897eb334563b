use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::VectorClock;
use crate::edge::{Direction, Edge};

/// Backward hop-decay: linear from 1.0 at h=0 down to 0 at `dies_at_hops`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct BackwardDecay {
    pub dies_at_hops: u32,
}

impl Default for BackwardDecay {
    fn default() -> Self {
        Self { dies_at_hops: 10 }
    }
}

/// Forward hop-decay: full weight while h <= `hold_hops`, then linear to 0
/// at `dies_at_hops`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwardDecay {
    pub hold_hops: u32,
    pub dies_at_hops: u32,
}

impl Default for ForwardDecay {
    fn default() -> Self {
        Self {
            hold_hops: 1,
            dies_at_hops: 20,
        }
    }
}

/// Wall-clock fallback for edges without a vector clock.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeDecay {
    /// Full weight for this many days.
    pub hold_days: f64,
    /// Then linear to zero over this many more days.
    pub linear_days: f64,
    /// Half-life of the exponential form used for forward reads.
    pub half_life_days: f64,
}

impl Default for TimeDecay {
    fn default() -> Self {
        Self {
            hold_days: 7.0,
            linear_days: 30.0,
            half_life_days: 14.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DecayConfig {
    pub backward: BackwardDecay,
    pub forward: ForwardDecay,
    pub time: TimeDecay,
}

/// Multiplier for a backward read at hop count `h`.
pub fn backward_hop_decay(h: u64, cfg: &BackwardDecay) -> f64 {
    let dies_at = cfg.dies_at_hops as f64;
    if dies_at <= 0.0 {
        return 0.0;
    }
    (1.0 - h as f64 / dies_at).max(0.0)
}

/// Multiplier for a forward read at hop count `h`.
pub fn forward_hop_decay(h: u64, cfg: &ForwardDecay) -> f64 {
    let hold = cfg.hold_hops as f64;
    let dies_at = cfg.dies_at_hops as f64;
    let h = h as f64;
    if h <= hold {
        return 1.0;
    }
    if dies_at <= hold {
        return 0.0;
    }
    (1.0 - (h - hold) / (dies_at - hold)).max(0.0)
}

/// Delayed-linear time decay: hold, then linear to zero.
pub fn delayed_linear_time_decay(age_days: f64, cfg: &TimeDecay) -> f64 {
    if age_days <= cfg.hold_days {
        return 1.0;
    }
    if cfg.linear_days <= 0.0 {
        return 0.0;
    }
    (1.0 - (age_days - cfg.hold_days) / cfg.linear_days).max(0.0)
}

/// Exponential time decay with a half-life, used for some forward cases.
pub fn exponential_time_decay(age_days: f64, half_life_days: f64) -> f64 {
    if half_life_days <= 0.0 {
        return 0.0;
    }
    0.5_f64.powf(age_days.max(0.0) / half_life_days)
}

/// Saturating boost for re-detected edges: `min(1 + 0.1·ln(n), 1.5)`.
pub fn link_boost(link_count: u32) -> f64 {
    let n = link_count.max(1) as f64;
    (1.0 + 0.1 * n.ln()).min(1.5)
}

/// Effective weight of an edge for a read in the given direction:
/// `initial_weight · link_boost(link_count) · decay(h)`, where `h` is the
/// hop count from the edge clock to the project reference clock. Edges
/// without a clock fall back to time decay from their creation wall-clock.
pub fn effective_weight(
    edge: &Edge,
    direction: Direction,
    reference: &VectorClock,
    now: DateTime<Utc>,
    cfg: &DecayConfig,
) -> f64 {
    let boost = link_boost(edge.link_count);
    let decay = match &edge.clock {
        Some(clock) => {
            let h = clock.hops_to(reference);
            match direction {
                Direction::Backward => backward_hop_decay(h, &cfg.backward),
                Direction::Forward => forward_hop_decay(h, &cfg.forward),
            }
        }
        None => {
            let age_days = DateTime::parse_from_rfc3339(&edge.created_at)
                .map(|created| (now - created.with_timezone(&Utc)).num_seconds() as f64 / 86_400.0)
                .unwrap_or(0.0);
            match direction {
                Direction::Backward => delayed_linear_time_decay(age_days, &cfg.time),
                Direction::Forward => exponential_time_decay(age_days, cfg.time.half_life_days),
            }
        }
    };
    edge.initial_weight * boost * decay
}
