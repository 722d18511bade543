// src/main.rs
//
// Argument-free training entrypoint.
//
// There are no CLI flags: all configuration flows through the settings
// file, by default configs/training_settings.ini relative to the working
// directory (override the location with GREENWAVE_CONFIG). Collaborators
// are constructed here once and handed to the harness; nothing lives at
// module scope.

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};

use greenwave::config::{RunPaths, TrainingSettings};
use greenwave::generator::TrafficGenerator;
use greenwave::harness::TrainingHarness;
use greenwave::junction::SimulatorCmd;
use greenwave::memory::Memory;
use greenwave::model::QNetwork;
use greenwave::simulation::{Simulation, SimulationParams};
use greenwave::telemetry::JsonlSink;
use greenwave::visualization::Visualization;

const DEFAULT_CONFIG_PATH: &str = "configs/training_settings.ini";
const CONFIG_ENV_VAR: &str = "GREENWAVE_CONFIG";

fn main() {
    if let Err(err) = run() {
        eprintln!("greenwave: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let settings_source = PathBuf::from(
        env::var(CONFIG_ENV_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string()),
    );
    let settings = TrainingSettings::load(&settings_source)?;
    let run_paths = RunPaths::create(&settings.dir.models_path_name)?;

    let cmd = SimulatorCmd::resolve(&settings);
    println!(
        "greenwave | scenario={} | target_update_freq={} episodes",
        cmd.scenario(),
        settings.agent.target_update_freq
    );

    let model = QNetwork::new(
        settings.model.num_layers,
        settings.model.width_layers,
        settings.model.batch_size,
        settings.model.learning_rate,
        settings.agent.num_states,
        settings.agent.num_actions,
    );
    // The target network starts as an exact copy of the online network.
    let target_model = model.clone();

    let memory = Memory::new(
        settings.memory.memory_size_max,
        settings.memory.memory_size_min,
    );
    let generator = TrafficGenerator::new(
        settings.simulation.max_steps,
        settings.simulation.n_cars_generated,
    );
    let simulation = Simulation::new(
        model,
        target_model,
        memory,
        generator,
        cmd.open_junction(),
        SimulationParams::from_settings(&settings),
    );

    let visualization = Visualization::new(run_paths.run_dir().to_path_buf(), 96);
    let sink = JsonlSink::create(&run_paths.run_dir().join("episodes.jsonl"))
        .context("failed to create episode telemetry sink")?;

    let harness = TrainingHarness::new(
        settings,
        settings_source,
        run_paths,
        simulation,
        visualization,
        sink,
    );
    harness.run()?;
    Ok(())
}
