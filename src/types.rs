// src/types.rs
//
// Shared vocabulary for the greenwave harness: approaches, movements,
// signal phases, and the stored experience sample.

use serde::{Deserialize, Serialize};

/// Number of incoming lane groups at the junction
/// (4 approaches x {through+right, left-turn}).
pub const LANE_GROUPS: usize = 8;

/// Number of selectable green phases (the agent's action space upper bound).
pub const NUM_PHASES: usize = 4;

/// Compass approach a vehicle arrives from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Approach {
    North,
    East,
    South,
    West,
}

impl Approach {
    pub const ALL: [Approach; 4] = [
        Approach::North,
        Approach::East,
        Approach::South,
        Approach::West,
    ];

    pub fn index(self) -> usize {
        match self {
            Approach::North => 0,
            Approach::East => 1,
            Approach::South => 2,
            Approach::West => 3,
        }
    }

    /// Stable lowercase name (used in logs/telemetry).
    pub fn as_str(self) -> &'static str {
        match self {
            Approach::North => "north",
            Approach::East => "east",
            Approach::South => "south",
            Approach::West => "west",
        }
    }
}

/// Movement a vehicle performs at the junction. Right turns share the
/// through lane group and are not signalled separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Movement {
    Through,
    Left,
}

impl Movement {
    pub fn index(self) -> usize {
        match self {
            Movement::Through => 0,
            Movement::Left => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Movement::Through => "through",
            Movement::Left => "left",
        }
    }
}

/// Flat lane-group index for an (approach, movement) pair.
pub fn lane_group(approach: Approach, movement: Movement) -> usize {
    approach.index() * 2 + movement.index()
}

/// Signal indication currently displayed at the junction.
///
/// The payload is the phase index in `0..NUM_PHASES`:
/// 0 = north/south through, 1 = north/south left,
/// 2 = east/west through, 3 = east/west left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalIndication {
    Green(usize),
    Yellow(usize),
}

/// Whether green `phase` gives right of way to lane group `group`.
pub fn phase_serves(phase: usize, group: usize) -> bool {
    let approach = group / 2;
    let movement = group % 2;
    // North = 0, South = 2 share phases; East = 1, West = 3 share phases.
    let north_south = approach % 2 == 0;
    match phase {
        0 => north_south && movement == 0,
        1 => north_south && movement == 1,
        2 => !north_south && movement == 0,
        3 => !north_south && movement == 1,
        _ => false,
    }
}

/// One stored experience: the agent saw `state`, took `action`, observed
/// `reward` and `next_state`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub state: Vec<f64>,
    pub action: usize,
    pub reward: f64,
    pub next_state: Vec<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lane_group_indices_are_distinct_and_dense() {
        let mut seen = vec![false; LANE_GROUPS];
        for approach in Approach::ALL {
            for movement in [Movement::Through, Movement::Left] {
                let g = lane_group(approach, movement);
                assert!(g < LANE_GROUPS);
                assert!(!seen[g], "duplicate lane group index {g}");
                seen[g] = true;
            }
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn each_phase_serves_exactly_two_groups() {
        for phase in 0..NUM_PHASES {
            let served = (0..LANE_GROUPS).filter(|&g| phase_serves(phase, g)).count();
            assert_eq!(served, 2, "phase {phase} serves {served} groups");
        }
    }

    #[test]
    fn opposing_approaches_share_a_phase() {
        let n = lane_group(Approach::North, Movement::Through);
        let s = lane_group(Approach::South, Movement::Through);
        assert!(phase_serves(0, n) && phase_serves(0, s));

        let e = lane_group(Approach::East, Movement::Left);
        let w = lane_group(Approach::West, Movement::Left);
        assert!(phase_serves(3, e) && phase_serves(3, w));
    }
}
