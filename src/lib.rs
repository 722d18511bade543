//! Greenwave core library.
//!
//! This crate trains a deep-Q-learning traffic-signal controller against a
//! deterministic in-process junction micro-simulator. The binary
//! (`src/main.rs`) is just a thin, argument-free entrypoint around these
//! components; every knob flows through one INI settings file.
//!
//! # Architecture
//!
//! The codebase follows a clean separation between the episode loop and
//! the collaborators it sequences:
//!
//! - **Config** (`config`): typed settings loaded once from
//!   `configs/training_settings.ini`, plus the uniquely named run
//!   directory that receives every artifact.
//!
//! - **Generator** (`generator`): deterministic per-episode vehicle
//!   arrival schedules (the episode index is the seed).
//!
//! - **Junction** (`junction`): the `TrafficControl` seam the driver steps
//!   the simulator through, and the built-in queue-based junction model.
//!   A process-backed controller would implement the same trait.
//!
//! - **Model / Memory** (`model`, `memory`): the MLP Q-network pair
//!   (online + target) and the bounded FIFO replay store.
//!
//! - **Simulation** (`simulation`): the episode driver:
//!   `run(episode, epsilon)` steps the simulator, records transitions,
//!   replay-trains, and appends one entry per episode to each metric
//!   series.
//!
//! - **Harness** (`harness`): the session lifecycle: epsilon schedule,
//!   strictly sequential episode loop, and the fixed finalization order
//!   (model save, settings snapshot, metric plots).

pub mod config;
pub mod generator;
pub mod harness;
pub mod junction;
pub mod memory;
pub mod model;
pub mod simulation;
pub mod telemetry;
pub mod types;
pub mod visualization;

// --- Re-exports for ergonomic external use ---------------------------------

pub use config::{RunPaths, TrainingSettings};
pub use generator::{ArrivalSchedule, PlannedVehicle, TrafficGenerator};
pub use harness::{exploration_rate, EpisodeOutcome, RunReport, TrainingHarness, MIN_EPSILON};
pub use junction::{Junction, JunctionSnapshot, SimulatorCmd, SimulatorError, TrafficControl};
pub use memory::Memory;
pub use model::QNetwork;
pub use simulation::{encode_state, Simulation, SimulationParams};
pub use telemetry::{EpisodeRecord, EpisodeSink, JsonlSink, NoopSink};
pub use types::{
    lane_group, phase_serves, Approach, Movement, SignalIndication, Transition, LANE_GROUPS,
    NUM_PHASES,
};
pub use visualization::Visualization;
