//! `trafficflowviz`: run a road/vehicle table pair through the engine.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use trafficflowviz::rendering::{HeadlessRenderer, PlotRenderer};
use trafficflowviz::{Engine, EngineError, SimConfig};

#[derive(Parser)]
#[command(name = "trafficflowviz", about = "Traffic-flow simulation and visualization")]
struct Cli {
    /// Road network table
    roads: PathBuf,
    /// Vehicle table
    vehicles: PathBuf,
    #[arg(long, default_value = "TrafficFlowViz")]
    title: String,
    #[arg(long, default_value_t = 1280)]
    width: u32,
    #[arg(long, default_value_t = 720)]
    height: u32,
    /// JSON file overriding the default parameters
    #[arg(long)]
    config: Option<PathBuf>,
    /// Close after this many frames even if vehicles are still moving
    #[arg(long)]
    frames: Option<u64>,
    /// Write PNG frames into this directory instead of running headless
    #[arg(long)]
    record: Option<PathBuf>,
    /// Keep only every Nth frame when recording
    #[arg(long, default_value_t = 1)]
    every: u64,
    /// Overrides simulation.time_scale
    #[arg(long)]
    time_scale: Option<f64>,
}

fn run(cli: Cli) -> Result<(), EngineError> {
    let mut config = match &cli.config {
        Some(path) => SimConfig::from_json_file(path)?,
        None => SimConfig::default(),
    };
    if let Some(scale) = cli.time_scale {
        config.simulation.time_scale = scale;
    }

    let mut engine = Engine::new(cli.title, cli.width, cli.height)?;
    engine.set_road_csv(cli.roads)?;
    engine.set_csv(cli.vehicles)?;
    engine.set_config(config)?;
    match cli.record {
        Some(dir) => engine.set_renderer(Box::new(
            PlotRenderer::new(dir, cli.every).with_max_frames(cli.frames),
        ))?,
        None => engine.set_renderer(Box::new(HeadlessRenderer::new(cli.frames)))?,
    }

    let summary = engine.run()?;
    println!(
        "{} ticks, {:.2}s simulated, {} frames ({:.1} fps)",
        summary.ticks, summary.sim_time, summary.frames, summary.average_fps
    );
    println!(
        "completed {}, excluded {}, halted {}, alerts {}",
        summary.completed, summary.excluded, summary.halted, summary.alerts_raised
    );
    for issue in &summary.issues {
        println!("  {issue}");
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::FAILURE
        }
    }
}
