// src/config.rs
//
// Central configuration for the greenwave harness.
// All training hyperparameters flow through one INI file
// (configs/training_settings.ini); there are no CLI flags. Loading is
// fail-fast: a missing file, a missing key, or an out-of-range value
// aborts the run before any collaborator is constructed.
//
// This module also owns the run directory: a uniquely named
// `<models_path_name>/model_<N>` folder that receives the trained model,
// a verbatim snapshot of the settings file, and the summary plots.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use config::{File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::types::{LANE_GROUPS, NUM_PHASES};

/// `[simulation]` section: episode count, step budget, and signal timings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationSection {
    /// GUI rendering request. Accepted for compatibility; the embedded
    /// junction always runs headless.
    pub gui: bool,
    pub total_episodes: u32,
    /// Step budget per episode, in simulated seconds.
    pub max_steps: u32,
    pub n_cars_generated: u32,
    pub green_duration: u32,
    pub yellow_duration: u32,
}

/// `[model]` section: Q-network architecture and training-step parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSection {
    /// Number of hidden layers.
    pub num_layers: usize,
    /// Width of every hidden layer.
    pub width_layers: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    /// Replay passes performed after each episode.
    pub training_epochs: u32,
}

/// `[memory]` section: replay buffer bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySection {
    /// Below this fill level `sample` returns an empty draw.
    pub memory_size_min: usize,
    /// FIFO eviction kicks in at this size.
    pub memory_size_max: usize,
}

/// `[agent]` section: state/action spaces and learning constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSection {
    pub num_states: usize,
    pub num_actions: usize,
    /// Discount factor.
    pub gamma: f64,
    /// Target-network refresh cadence, counted in episodes.
    pub target_update_freq: u32,
}

/// `[dir]` section: output location and scenario file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirSection {
    pub models_path_name: String,
    /// Scenario identifier handed to the simulator launch settings.
    /// Carried opaquely; the embedded junction does not parse it.
    pub sumocfg_file_name: String,
}

/// Immutable training settings, loaded once at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSettings {
    pub simulation: SimulationSection,
    pub model: ModelSection,
    pub memory: MemorySection,
    pub agent: AgentSection,
    pub dir: DirSection,
}

impl TrainingSettings {
    /// Load and validate settings from an INI file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = config::Config::builder()
            .add_source(File::from(path).format(FileFormat::Ini))
            .build()
            .with_context(|| {
                format!("failed to read training settings from {}", path.display())
            })?;
        let settings: TrainingSettings = raw.try_deserialize().with_context(|| {
            format!("missing or malformed key in {}", path.display())
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Range checks over the loaded values. Violations are fatal at startup.
    pub fn validate(&self) -> Result<()> {
        let s = &self.simulation;
        if s.max_steps == 0 {
            bail!("simulation.max_steps must be positive");
        }
        if s.green_duration == 0 || s.yellow_duration == 0 {
            bail!("simulation.green_duration and simulation.yellow_duration must be positive");
        }

        let m = &self.model;
        if m.num_layers == 0 || m.width_layers == 0 {
            bail!("model.num_layers and model.width_layers must be positive");
        }
        if m.batch_size == 0 {
            bail!("model.batch_size must be positive");
        }
        if !(m.learning_rate.is_finite() && m.learning_rate > 0.0) {
            bail!("model.learning_rate must be a positive finite number");
        }

        let mem = &self.memory;
        if mem.memory_size_max == 0 {
            bail!("memory.memory_size_max must be positive");
        }
        if mem.memory_size_min > mem.memory_size_max {
            bail!(
                "memory.memory_size_min ({}) exceeds memory.memory_size_max ({})",
                mem.memory_size_min,
                mem.memory_size_max
            );
        }

        let a = &self.agent;
        if a.num_states == 0 || a.num_states % LANE_GROUPS != 0 {
            bail!(
                "agent.num_states must be a positive multiple of {} (one cell row per lane group)",
                LANE_GROUPS
            );
        }
        if a.num_actions == 0 || a.num_actions > NUM_PHASES {
            bail!("agent.num_actions must be in 1..={NUM_PHASES}");
        }
        if !(a.gamma > 0.0 && a.gamma <= 1.0) {
            bail!("agent.gamma must be in (0, 1]");
        }
        if a.target_update_freq == 0 {
            bail!("agent.target_update_freq must be positive");
        }

        if self.dir.models_path_name.is_empty() {
            bail!("dir.models_path_name must not be empty");
        }
        Ok(())
    }
}

/// Filesystem locations owned by a single training run.
#[derive(Debug, Clone)]
pub struct RunPaths {
    run_dir: PathBuf,
}

impl RunPaths {
    /// Create `<models_path_name>/model_<N>`, where `N` is one larger than
    /// the highest suffix already present.
    pub fn create(models_path_name: &str) -> Result<Self> {
        let base = PathBuf::from(models_path_name);
        fs::create_dir_all(&base)
            .with_context(|| format!("failed to create {}", base.display()))?;

        let mut next = 1u32;
        for entry in fs::read_dir(&base)
            .with_context(|| format!("failed to list {}", base.display()))?
        {
            let entry = entry.with_context(|| format!("failed to list {}", base.display()))?;
            let name = entry.file_name();
            if let Some(n) = name
                .to_string_lossy()
                .strip_prefix("model_")
                .and_then(|suffix| suffix.parse::<u32>().ok())
            {
                next = next.max(n + 1);
            }
        }

        let run_dir = base.join(format!("model_{next}"));
        fs::create_dir_all(&run_dir)
            .with_context(|| format!("failed to create run directory {}", run_dir.display()))?;
        Ok(Self { run_dir })
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Copy the settings file verbatim into the run directory, so the run
    /// can be reproduced from its own snapshot.
    pub fn snapshot_settings(&self, source: &Path) -> Result<PathBuf> {
        let dest = self.run_dir.join("training_settings.ini");
        fs::copy(source, &dest).with_context(|| {
            format!(
                "failed to copy {} into {}",
                source.display(),
                self.run_dir.display()
            )
        })?;
        Ok(dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SETTINGS_INI: &str = "\
[simulation]
gui = false
total_episodes = 3
max_steps = 120
n_cars_generated = 40
green_duration = 10
yellow_duration = 4

[model]
num_layers = 2
width_layers = 16
batch_size = 8
learning_rate = 0.001
training_epochs = 4

[memory]
memory_size_min = 10
memory_size_max = 500

[agent]
num_states = 80
num_actions = 4
gamma = 0.75
target_update_freq = 2

[dir]
models_path_name = models
sumocfg_file_name = intersection/scenario.sumocfg
";

    fn write_ini(dir: &Path, contents: &str) -> PathBuf {
        let path = dir.join("training_settings.ini");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn loads_all_sections_from_ini() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_ini(dir.path(), SETTINGS_INI);

        let settings = TrainingSettings::load(&path).unwrap();
        assert!(!settings.simulation.gui);
        assert_eq!(settings.simulation.total_episodes, 3);
        assert_eq!(settings.simulation.max_steps, 120);
        assert_eq!(settings.model.width_layers, 16);
        assert_eq!(settings.memory.memory_size_max, 500);
        assert_eq!(settings.agent.num_states, 80);
        assert_eq!(settings.agent.target_update_freq, 2);
        assert_eq!(settings.dir.models_path_name, "models");
    }

    #[test]
    fn missing_file_is_a_descriptive_error() {
        let err = TrainingSettings::load("/nonexistent/training_settings.ini").unwrap_err();
        assert!(format!("{err:#}").contains("training_settings.ini"));
    }

    #[test]
    fn missing_key_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let truncated = SETTINGS_INI.replace("gamma = 0.75\n", "");
        let path = write_ini(dir.path(), &truncated);
        assert!(TrainingSettings::load(&path).is_err());
    }

    #[test]
    fn malformed_value_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let broken = SETTINGS_INI.replace("max_steps = 120", "max_steps = lots");
        let path = write_ini(dir.path(), &broken);
        assert!(TrainingSettings::load(&path).is_err());
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();

        for (from, to) in [
            ("gamma = 0.75", "gamma = 1.5"),
            ("memory_size_min = 10", "memory_size_min = 10000"),
            ("num_states = 80", "num_states = 81"),
            ("num_actions = 4", "num_actions = 9"),
            ("learning_rate = 0.001", "learning_rate = -0.5"),
            ("target_update_freq = 2", "target_update_freq = 0"),
        ] {
            let path = write_ini(dir.path(), &SETTINGS_INI.replace(from, to));
            assert!(
                TrainingSettings::load(&path).is_err(),
                "expected rejection for {to:?}"
            );
        }
    }

    #[test]
    fn run_paths_increment_per_run() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("models");
        let base_str = base.to_string_lossy();

        let first = RunPaths::create(&base_str).unwrap();
        let second = RunPaths::create(&base_str).unwrap();
        assert!(first.run_dir().ends_with("model_1"));
        assert!(second.run_dir().ends_with("model_2"));
        assert!(first.run_dir().is_dir());
        assert!(second.run_dir().is_dir());
    }

    #[test]
    fn snapshot_is_a_verbatim_copy_that_reloads_identically() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_ini(dir.path(), SETTINGS_INI);
        let settings = TrainingSettings::load(&source).unwrap();

        let base = dir.path().join("models");
        let paths = RunPaths::create(&base.to_string_lossy()).unwrap();
        let snapshot = paths.snapshot_settings(&source).unwrap();

        assert_eq!(
            fs::read(&source).unwrap(),
            fs::read(&snapshot).unwrap(),
            "snapshot must be byte-identical"
        );
        let reloaded = TrainingSettings::load(&snapshot).unwrap();
        assert_eq!(settings, reloaded);
    }
}
