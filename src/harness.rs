// src/harness.rs
//
// The training session: a strictly sequential lifecycle of
// INITIALIZING (done by the caller: settings + collaborator construction)
// -> RUNNING (episode iterations) -> FINALIZING (persistence).
//
// Episodes never overlap; the memory and both networks carry learned
// state forward, so episode N+1 must not start before N's run() returns.
// Finalization order is fixed for reproducibility: the model save is
// confirmed first, then the settings snapshot, then the four metric
// plots, each plot isolated so one failure cannot lose the others.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;

use crate::config::{RunPaths, TrainingSettings};
use crate::junction::TrafficControl;
use crate::simulation::Simulation;
use crate::telemetry::{EpisodeRecord, EpisodeSink};
use crate::visualization::Visualization;

/// Exploration never fully vanishes.
pub const MIN_EPSILON: f64 = 0.05;

/// Exploration rate for `episode` of `total_episodes`:
/// `max(0.05, 1 - episode / total_episodes)`. Non-increasing over a run,
/// starting at 1.0 and floored at 0.05.
pub fn exploration_rate(episode: u32, total_episodes: u32) -> f64 {
    if total_episodes == 0 {
        return MIN_EPSILON;
    }
    (1.0 - episode as f64 / total_episodes as f64).max(MIN_EPSILON)
}

/// Per-episode outcome kept for reporting and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeOutcome {
    pub episode: u32,
    pub epsilon: f64,
    pub simulation_time: f64,
    pub training_time: f64,
}

/// What a completed training session produced.
#[derive(Debug)]
pub struct RunReport {
    pub episodes: Vec<EpisodeOutcome>,
    pub run_dir: PathBuf,
}

/// Owns every collaborator for one training session and drives the
/// episode loop. Collaborators are injected, not ambient. An episode
/// failure is fatal for the run, but finalization still runs first so the
/// model state learned so far is not lost.
pub struct TrainingHarness<L: TrafficControl, S: EpisodeSink> {
    settings: TrainingSettings,
    settings_source: PathBuf,
    run_paths: RunPaths,
    simulation: Simulation<L>,
    visualization: Visualization,
    sink: S,
}

impl<L: TrafficControl, S: EpisodeSink> TrainingHarness<L, S> {
    pub fn new(
        settings: TrainingSettings,
        settings_source: PathBuf,
        run_paths: RunPaths,
        simulation: Simulation<L>,
        visualization: Visualization,
        sink: S,
    ) -> Self {
        Self {
            settings,
            settings_source,
            run_paths,
            simulation,
            visualization,
            sink,
        }
    }

    /// Run the full session: every episode, then finalization.
    pub fn run(mut self) -> Result<RunReport> {
        let total = self.settings.simulation.total_episodes;
        let started_at = Local::now();
        println!(
            "greenwave | episodes={} | max_steps={} | run_dir={}",
            total,
            self.settings.simulation.max_steps,
            self.run_paths.run_dir().display()
        );

        let mut episodes = Vec::with_capacity(total as usize);
        let mut episode = 0u32;
        while episode < total {
            println!();
            println!("----- Episode {} of {} -----", episode + 1, total);
            let epsilon = exploration_rate(episode, total);

            let (simulation_time, training_time) = match self.simulation.run(episode, epsilon) {
                Ok(times) => times,
                Err(err) => {
                    // No per-episode recovery exists; salvage whatever
                    // model state was learned before aborting.
                    eprintln!(
                        "episode {episode} failed; saving partial state to {}",
                        self.run_paths.run_dir().display()
                    );
                    if let Err(save_err) = self.finalize() {
                        eprintln!("warning: could not save partial state: {save_err:#}");
                    }
                    return Err(err)
                        .with_context(|| format!("episode {episode} aborted the run"));
                }
            };

            println!("Simulation time: {simulation_time:.1} s");
            println!("Training time: {training_time:.1} s");
            println!(
                "Total episode time: {:.1} s",
                simulation_time + training_time
            );
            println!("Epsilon: {epsilon:.2}");

            let record =
                self.episode_record(episode, epsilon, simulation_time, training_time);
            self.sink.log_episode(&record);
            episodes.push(EpisodeOutcome {
                episode,
                epsilon,
                simulation_time,
                training_time,
            });
            episode += 1;
        }
        self.sink.flush();

        println!();
        println!(
            "----- Start time: {}",
            started_at.format("%Y-%m-%d %H:%M:%S")
        );
        println!(
            "----- End time: {}",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        );

        self.finalize()?;
        println!(
            "----- Session info saved at: {}",
            self.run_paths.run_dir().display()
        );

        Ok(RunReport {
            episodes,
            run_dir: self.run_paths.run_dir().to_path_buf(),
        })
    }

    fn episode_record(
        &self,
        episode: u32,
        epsilon: f64,
        simulation_time: f64,
        training_time: f64,
    ) -> EpisodeRecord {
        EpisodeRecord {
            episode,
            epsilon,
            simulation_time,
            training_time,
            reward: last(self.simulation.reward_store()),
            cumulative_wait: last(self.simulation.cumulative_wait_store()),
            avg_queue_length: last(self.simulation.avg_queue_length_store()),
            target_synced: self.simulation.target_sync_steps().last() == Some(&episode),
        }
    }

    /// Persist run artifacts. The model save must succeed before any plot
    /// output is attempted; plot failures are logged and skipped.
    fn finalize(&mut self) -> Result<()> {
        let run_dir: &Path = self.run_paths.run_dir();
        self.simulation
            .model()
            .save(run_dir)
            .context("failed to save trained model")?;
        self.run_paths
            .snapshot_settings(&self.settings_source)
            .context("failed to snapshot training settings")?;

        let sync_episodes: Vec<f64> = self
            .simulation
            .target_sync_steps()
            .iter()
            .map(|&e| e as f64)
            .collect();
        let series: [(&[f64], &str, &str, &str); 4] = [
            (&sync_episodes, "target_syncs", "Sync event index", "Episode"),
            (
                self.simulation.reward_store(),
                "reward",
                "Episode",
                "Cumulative negative reward",
            ),
            (
                self.simulation.cumulative_wait_store(),
                "delay",
                "Episode",
                "Cumulative delay (s)",
            ),
            (
                self.simulation.avg_queue_length_store(),
                "queue",
                "Episode",
                "Average queue length (vehicles)",
            ),
        ];
        for (data, name, xlabel, ylabel) in series {
            if let Err(err) = self
                .visualization
                .save_data_and_plot(data, name, xlabel, ylabel)
            {
                eprintln!("warning: plot '{name}' failed, continuing: {err:#}");
            }
        }
        Ok(())
    }
}

fn last(series: &[f64]) -> f64 {
    series.last().copied().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epsilon_starts_at_one() {
        assert_eq!(exploration_rate(0, 100), 1.0);
        assert_eq!(exploration_rate(0, 2), 1.0);
    }

    #[test]
    fn epsilon_is_floored_near_the_end() {
        // 1 - 99/100 = 0.01 < 0.05.
        assert_eq!(exploration_rate(99, 100), MIN_EPSILON);
        // 1 - 1/2 = 0.5 stays above the floor.
        assert_eq!(exploration_rate(1, 2), 0.5);
    }

    #[test]
    fn epsilon_is_monotonically_non_increasing() {
        let total = 137;
        let mut prev = f64::INFINITY;
        for episode in 0..total {
            let eps = exploration_rate(episode, total);
            assert!(eps <= prev);
            assert!((MIN_EPSILON..=1.0).contains(&eps));
            prev = eps;
        }
    }

    #[test]
    fn epsilon_floor_engages_exactly_when_schedule_drops_below_it() {
        let total = 100;
        for episode in 0..total {
            let schedule = 1.0 - episode as f64 / total as f64;
            let expected = if schedule < MIN_EPSILON {
                MIN_EPSILON
            } else {
                schedule
            };
            assert_eq!(exploration_rate(episode, total), expected);
        }
    }

    #[test]
    fn zero_total_episodes_is_defined() {
        assert_eq!(exploration_rate(0, 0), MIN_EPSILON);
    }
}
