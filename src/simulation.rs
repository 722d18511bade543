// src/simulation.rs
//
// The episode driver. Owns the learning state that persists across
// episodes (online network, target network, replay memory) plus the
// simulator link, and exposes one operation:
//
//     run(episode, epsilon) -> (simulation_time, training_time)
//
// `epsilon` is the only exploration knob; it comes from the caller and is
// never recomputed here. The two returned timings are measured
// separately: simulator stepping vs replay training, and an episode with
// an under-filled memory reports a training time of exactly zero.
//
// Target synchronization counts episodes: at the end of `run(episode)`,
// if `(episode + 1) % target_update_freq == 0` the online weights are
// copied into the target network and `episode` is appended to
// `target_sync_steps`. Over a full run the sync series therefore has
// exactly `total_episodes / target_update_freq` entries.

use std::time::Instant;

use anyhow::{Context, Result};
use ndarray::{aview1, Array2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::config::TrainingSettings;
use crate::generator::TrafficGenerator;
use crate::junction::{JunctionSnapshot, TrafficControl};
use crate::memory::Memory;
use crate::model::QNetwork;
use crate::types::{SignalIndication, Transition, LANE_GROUPS};

/// Hyperparameters the episode driver needs beyond its collaborators.
#[derive(Debug, Clone)]
pub struct SimulationParams {
    pub gamma: f64,
    pub max_steps: u32,
    pub green_duration: u32,
    pub yellow_duration: u32,
    pub num_states: usize,
    pub num_actions: usize,
    pub training_epochs: u32,
    /// Target refresh cadence, in episodes.
    pub target_update_freq: u32,
}

impl SimulationParams {
    pub fn from_settings(settings: &TrainingSettings) -> Self {
        Self {
            gamma: settings.agent.gamma,
            max_steps: settings.simulation.max_steps,
            green_duration: settings.simulation.green_duration,
            yellow_duration: settings.simulation.yellow_duration,
            num_states: settings.agent.num_states,
            num_actions: settings.agent.num_actions,
            training_epochs: settings.model.training_epochs,
            target_update_freq: settings.agent.target_update_freq,
        }
    }
}

/// Episode driver with deterministic per-episode mechanics.
pub struct Simulation<L: TrafficControl> {
    model: QNetwork,
    target_model: QNetwork,
    memory: Memory,
    generator: TrafficGenerator,
    link: L,
    params: SimulationParams,

    // One element appended per episode.
    reward_store: Vec<f64>,
    cumulative_wait_store: Vec<f64>,
    avg_queue_length_store: Vec<f64>,
    // One element appended per target refresh; strictly increasing.
    target_sync_steps: Vec<u32>,
}

impl<L: TrafficControl> Simulation<L> {
    pub fn new(
        model: QNetwork,
        target_model: QNetwork,
        memory: Memory,
        generator: TrafficGenerator,
        link: L,
        params: SimulationParams,
    ) -> Self {
        Self {
            model,
            target_model,
            memory,
            generator,
            link,
            params,
            reward_store: Vec::new(),
            cumulative_wait_store: Vec::new(),
            avg_queue_length_store: Vec::new(),
            target_sync_steps: Vec::new(),
        }
    }

    /// Cumulative negative reward per episode.
    pub fn reward_store(&self) -> &[f64] {
        &self.reward_store
    }

    /// Cumulative delay (seconds) per episode.
    pub fn cumulative_wait_store(&self) -> &[f64] {
        &self.cumulative_wait_store
    }

    /// Average halted vehicles per step, per episode.
    pub fn avg_queue_length_store(&self) -> &[f64] {
        &self.avg_queue_length_store
    }

    /// Episode index of each target-network refresh.
    pub fn target_sync_steps(&self) -> &[u32] {
        &self.target_sync_steps
    }

    pub fn model(&self) -> &QNetwork {
        &self.model
    }

    pub fn params(&self) -> &SimulationParams {
        &self.params
    }

    /// Reference to the simulator link (for testing).
    pub fn link(&self) -> &L {
        &self.link
    }

    /// Run one full episode: drive the simulator to the step budget, then
    /// replay-train. Any simulator or contract failure aborts the run;
    /// the link is released on that path too.
    pub fn run(&mut self, episode: u32, epsilon: f64) -> Result<(f64, f64)> {
        let mut rng = ChaCha8Rng::seed_from_u64(episode as u64);
        let schedule = self.generator.generate(episode as u64);

        let sim_start = Instant::now();
        self.link
            .open(&schedule)
            .with_context(|| format!("episode {episode}: simulator link failed to open"))?;
        let drive_result = self.drive_episode(epsilon, &mut rng);
        self.link.close();
        let stats = drive_result
            .with_context(|| format!("episode {episode}: simulator stepping failed"))?;
        let simulation_time = sim_start.elapsed().as_secs_f64();

        let training_time = if self.memory.can_sample() {
            let train_start = Instant::now();
            for _ in 0..self.params.training_epochs {
                self.replay(&mut rng);
            }
            train_start.elapsed().as_secs_f64()
        } else {
            0.0
        };

        self.reward_store.push(stats.sum_neg_reward);
        self.cumulative_wait_store.push(stats.sum_wait);
        self.avg_queue_length_store
            .push(stats.sum_queue / self.params.max_steps.max(1) as f64);

        self.maybe_sync_target(episode);

        Ok((simulation_time, training_time))
    }

    fn drive_episode(&mut self, epsilon: f64, rng: &mut ChaCha8Rng) -> Result<EpisodeStats> {
        let mut stats = EpisodeStats::default();
        let mut step = 0u32;
        let mut old_state: Option<Vec<f64>> = None;
        let mut old_action: Option<usize> = None;
        let mut old_total_wait = 0.0;

        while step < self.params.max_steps {
            let snapshot = self.link.snapshot();
            let current_state = encode_state(&snapshot, self.params.num_states);
            let current_total_wait = snapshot.total_wait_s;

            // Store the transition closed by this observation.
            if let (Some(state), Some(action)) = (old_state.take(), old_action) {
                let reward = old_total_wait - current_total_wait;
                if reward < 0.0 {
                    stats.sum_neg_reward += reward;
                }
                self.memory.add(Transition {
                    state,
                    action,
                    reward,
                    next_state: current_state.clone(),
                });
            }

            let action = self.choose_action(&current_state, epsilon, rng);

            // A phase change gets a yellow interval first.
            if let Some(prev) = old_action {
                if prev != action {
                    self.link.set_signal(SignalIndication::Yellow(prev))?;
                    self.step_for(self.params.yellow_duration, &mut step, &mut stats)?;
                }
            }
            self.link.set_signal(SignalIndication::Green(action))?;
            self.step_for(self.params.green_duration, &mut step, &mut stats)?;

            old_state = Some(current_state);
            old_action = Some(action);
            old_total_wait = current_total_wait;
        }

        Ok(stats)
    }

    /// Advance the simulator by up to `duration` seconds, never past the
    /// step budget, accumulating queue statistics along the way.
    fn step_for(&mut self, duration: u32, step: &mut u32, stats: &mut EpisodeStats) -> Result<()> {
        let todo = duration.min(self.params.max_steps - *step);
        for _ in 0..todo {
            self.link.advance()?;
            *step += 1;
            let halted = self.link.snapshot().total_halted() as f64;
            stats.sum_queue += halted;
            // Each halted vehicle waits one second per step.
            stats.sum_wait += halted;
        }
        Ok(())
    }

    fn choose_action<R: Rng + ?Sized>(&self, state: &[f64], epsilon: f64, rng: &mut R) -> usize {
        if rng.gen::<f64>() < epsilon {
            rng.gen_range(0..self.params.num_actions)
        } else {
            let q = self.model.predict_one(state);
            q.iter()
                .take(self.params.num_actions)
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(i, _)| i)
                .unwrap_or(0)
        }
    }

    /// One replay pass: sample a batch and fit the online network against
    /// target-network bootstrap values.
    fn replay<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let batch = self.memory.sample(self.model.batch_size(), rng);
        if batch.is_empty() {
            return;
        }

        let n = batch.len();
        let mut states = Array2::zeros((n, self.params.num_states));
        let mut next_states = Array2::zeros((n, self.params.num_states));
        for (i, t) in batch.iter().enumerate() {
            states.row_mut(i).assign(&aview1(&t.state));
            next_states.row_mut(i).assign(&aview1(&t.next_state));
        }

        let q = self.model.predict_batch(&states);
        let q_next = self.target_model.predict_batch(&next_states);

        let mut targets = q;
        for (i, t) in batch.iter().enumerate() {
            let max_next = q_next
                .row(i)
                .iter()
                .copied()
                .fold(f64::NEG_INFINITY, f64::max);
            targets[[i, t.action]] = t.reward + self.params.gamma * max_next;
        }

        self.model.fit_batch(&states, &targets);
    }

    fn maybe_sync_target(&mut self, episode: u32) {
        let freq = self.params.target_update_freq;
        if freq > 0 && (episode + 1) % freq == 0 {
            self.target_model.clone_weights_from(&self.model);
            self.target_sync_steps.push(episode);
        }
    }
}

#[derive(Debug, Default)]
struct EpisodeStats {
    sum_neg_reward: f64,
    sum_wait: f64,
    sum_queue: f64,
}

/// Cell-occupancy state encoding: each lane group gets
/// `num_states / LANE_GROUPS` distance cells, finer near the stop line,
/// and a cell is 1.0 when a queued vehicle occupies it.
pub fn encode_state(snapshot: &JunctionSnapshot, num_states: usize) -> Vec<f64> {
    let cells_per_group = (num_states / LANE_GROUPS).max(1);
    let mut state = vec![0.0; num_states];
    for (group, &halted) in snapshot.halted.iter().enumerate().take(LANE_GROUPS) {
        for queue_index in 0..halted {
            let cell = distance_cell(queue_index, cells_per_group);
            state[group * cells_per_group + cell] = 1.0;
        }
    }
    state
}

/// Map a queue position to a distance cell. Cell width doubles every
/// other cell, so resolution is highest at the stop line.
fn distance_cell(queue_index: usize, cells: usize) -> usize {
    let mut start = 0usize;
    let mut width = 1usize;
    for cell in 0..cells {
        if queue_index < start + width {
            return cell;
        }
        start += width;
        if cell % 2 == 1 {
            width *= 2;
        }
    }
    cells - 1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(halted: Vec<usize>) -> JunctionSnapshot {
        JunctionSnapshot {
            step: 0,
            halted,
            total_wait_s: 0.0,
        }
    }

    #[test]
    fn empty_junction_encodes_to_zeros() {
        let state = encode_state(&snapshot(vec![0; LANE_GROUPS]), 80);
        assert_eq!(state.len(), 80);
        assert!(state.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn occupancy_lands_in_the_owning_group_block() {
        let mut halted = vec![0; LANE_GROUPS];
        halted[3] = 2;
        let state = encode_state(&snapshot(halted), 80);

        // Group 3 owns cells 30..40; two vehicles fill the first two cells.
        assert_eq!(state[30], 1.0);
        assert_eq!(state[31], 1.0);
        assert_eq!(state.iter().filter(|&&v| v == 1.0).count(), 2);
    }

    #[test]
    fn long_queues_saturate_the_far_cell() {
        let mut halted = vec![0; LANE_GROUPS];
        halted[0] = 500;
        let state = encode_state(&snapshot(halted), 80);
        assert_eq!(state[9], 1.0, "far cell must be occupied");
        assert!(state[..10].iter().all(|&v| v == 1.0));
    }

    #[test]
    fn distance_cells_are_monotone_in_queue_position() {
        let mut prev = 0;
        for i in 0..200 {
            let cell = distance_cell(i, 10);
            assert!(cell >= prev);
            assert!(cell < 10);
            prev = cell;
        }
        assert_eq!(distance_cell(0, 10), 0);
        assert_eq!(distance_cell(1000, 10), 9);
    }
}
