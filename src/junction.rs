// src/junction.rs
//
// Simulator launch settings + the embedded junction micro-simulator.
//
// The episode driver talks to the simulator through the `TrafficControl`
// trait. The built-in implementation is `Junction`, a queue-based model of
// a four-approach intersection: vehicles arrive per the episode schedule,
// discharge at a saturation rate while their lane group has green, and
// accumulate waiting time while halted. An external process-backed
// controller would implement the same trait; its transport is out of
// scope here.

use std::collections::VecDeque;
use std::fmt;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::config::TrainingSettings;
use crate::generator::ArrivalSchedule;
use crate::types::{lane_group, phase_serves, SignalIndication, LANE_GROUPS};

/// Vehicles discharged per simulated second from a served through group.
const THROUGH_SATURATION: usize = 2;
/// Vehicles discharged per simulated second from a served left-turn group.
const LEFT_SATURATION: usize = 1;

/// Resolved simulator launch settings: GUI flag, scenario file, and
/// step budget, collapsed into what the embedded backend actually uses.
#[derive(Debug, Clone)]
pub struct SimulatorCmd {
    scenario: String,
    max_steps: u32,
}

impl SimulatorCmd {
    /// Resolve launch settings from the training configuration.
    ///
    /// A GUI request is accepted but headless execution is forced; the
    /// scenario name is carried opaquely and logged, not parsed.
    pub fn resolve(settings: &TrainingSettings) -> Self {
        if settings.simulation.gui {
            eprintln!("warning: gui = true requested; the embedded junction runs headless");
        }
        Self {
            scenario: settings.dir.sumocfg_file_name.clone(),
            max_steps: settings.simulation.max_steps,
        }
    }

    pub fn scenario(&self) -> &str {
        &self.scenario
    }

    pub fn max_steps(&self) -> u32 {
        self.max_steps
    }

    /// Construct the embedded junction for these launch settings.
    pub fn open_junction(&self) -> Junction {
        Junction::new(self.max_steps)
    }
}

/// Contract violations surfaced by a simulator link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatorError {
    /// The link was used before `open` or after `close`.
    NotOpen,
    /// `open` was called on a link that is already running an episode.
    AlreadyOpen,
    /// `advance` was called past the episode step budget.
    StepBudgetExhausted,
}

impl fmt::Display for SimulatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimulatorError::NotOpen => write!(f, "simulator link is not open"),
            SimulatorError::AlreadyOpen => write!(f, "simulator link is already open"),
            SimulatorError::StepBudgetExhausted => {
                write!(f, "simulator step budget exhausted")
            }
        }
    }
}

impl std::error::Error for SimulatorError {}

/// Read-only view of the junction after a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JunctionSnapshot {
    pub step: u32,
    /// Halted vehicles per lane group, stop line first.
    pub halted: Vec<usize>,
    /// Accumulated waiting seconds of all vehicles currently queued.
    pub total_wait_s: f64,
}

impl JunctionSnapshot {
    pub fn total_halted(&self) -> usize {
        self.halted.iter().sum()
    }
}

/// The seam the episode driver steps the simulator through.
///
/// `close` must be idempotent and is also invoked on drop by the built-in
/// implementation, so a failed episode cannot leak the simulator resource.
pub trait TrafficControl {
    fn open(&mut self, schedule: &ArrivalSchedule) -> Result<()>;
    fn set_signal(&mut self, signal: SignalIndication) -> Result<()>;
    /// Advance the simulation by one second.
    fn advance(&mut self) -> Result<()>;
    fn snapshot(&self) -> JunctionSnapshot;
    fn close(&mut self);
}

#[derive(Debug, Clone)]
struct QueuedVehicle {
    waited_s: u32,
}

/// Embedded queue-based junction model. Deterministic given the schedule.
#[derive(Debug)]
pub struct Junction {
    max_steps: u32,
    step: u32,
    open: bool,
    pending: Vec<(u32, usize)>, // (arrival_step, lane group), sorted
    next_arrival: usize,
    queues: Vec<VecDeque<QueuedVehicle>>,
    signal: SignalIndication,
    served: u64,
}

impl Junction {
    pub fn new(max_steps: u32) -> Self {
        Self {
            max_steps,
            step: 0,
            open: false,
            pending: Vec::new(),
            next_arrival: 0,
            queues: (0..LANE_GROUPS).map(|_| VecDeque::new()).collect(),
            signal: SignalIndication::Green(0),
            served: 0,
        }
    }

    /// Vehicles that have crossed the stop line so far this episode.
    pub fn served(&self) -> u64 {
        self.served
    }

    fn require_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(SimulatorError::NotOpen.into())
        }
    }
}

impl TrafficControl for Junction {
    fn open(&mut self, schedule: &ArrivalSchedule) -> Result<()> {
        if self.open {
            return Err(SimulatorError::AlreadyOpen.into());
        }
        self.pending = schedule
            .vehicles
            .iter()
            .map(|v| (v.arrival_step, lane_group(v.approach, v.movement)))
            .collect();
        self.pending.sort_by_key(|&(arrival, _)| arrival);
        self.next_arrival = 0;
        self.step = 0;
        self.served = 0;
        self.signal = SignalIndication::Green(0);
        for queue in &mut self.queues {
            queue.clear();
        }
        self.open = true;
        Ok(())
    }

    fn set_signal(&mut self, signal: SignalIndication) -> Result<()> {
        self.require_open()?;
        self.signal = signal;
        Ok(())
    }

    fn advance(&mut self) -> Result<()> {
        self.require_open()?;
        if self.step >= self.max_steps {
            return Err(SimulatorError::StepBudgetExhausted.into());
        }

        // Admit arrivals due at this step.
        while self.next_arrival < self.pending.len()
            && self.pending[self.next_arrival].0 <= self.step
        {
            let (_, group) = self.pending[self.next_arrival];
            self.queues[group].push_back(QueuedVehicle { waited_s: 0 });
            self.next_arrival += 1;
        }

        // Discharge served groups at their saturation rate. Yellow (and
        // red) groups hold.
        if let SignalIndication::Green(phase) = self.signal {
            for group in 0..LANE_GROUPS {
                if !phase_serves(phase, group) {
                    continue;
                }
                let rate = if group % 2 == 0 {
                    THROUGH_SATURATION
                } else {
                    LEFT_SATURATION
                };
                for _ in 0..rate {
                    if self.queues[group].pop_front().is_some() {
                        self.served += 1;
                    }
                }
            }
        }

        // Everyone still queued waits another second.
        for queue in &mut self.queues {
            for vehicle in queue.iter_mut() {
                vehicle.waited_s += 1;
            }
        }

        self.step += 1;
        Ok(())
    }

    fn snapshot(&self) -> JunctionSnapshot {
        JunctionSnapshot {
            step: self.step,
            halted: self.queues.iter().map(|q| q.len()).collect(),
            total_wait_s: self
                .queues
                .iter()
                .flat_map(|q| q.iter())
                .map(|v| v.waited_s as f64)
                .sum(),
        }
    }

    fn close(&mut self) {
        self.open = false;
    }
}

impl Drop for Junction {
    fn drop(&mut self) {
        self.close();
    }
}
