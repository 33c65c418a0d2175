//! The embedding API: configure an [`Engine`], then `run()` it.
//!
//! The simulation runs as a spawned tokio task that advances whole ticks
//! from a [`FrameScheduler`] and publishes snapshot pairs through a
//! single-slot `watch` channel. The render loop runs on the calling thread,
//! always reads the newest pair and never touches simulation state. Closing
//! the window flips a second `watch` channel that stops the task.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::config::SimConfig;
use crate::engine::frame_scheduler::FrameScheduler;
use crate::error::{ConfigurationError, EngineError, VehicleError};
use crate::rendering::{Frame, HeadlessRenderer, Renderer, WindowEvent, WindowSpec};
use crate::shared_data::SnapshotPair;
use crate::simulation_engine::road_network::RoadNetwork;
use crate::simulation_engine::simulation::TrafficSimulator;
use crate::simulation_engine::vehicles::VehiclePopulation;

/// Shortest wall-clock period between simulation batches.
const MIN_BATCH_PERIOD: Duration = Duration::from_millis(1);

/// Outcome of a finished run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub ticks: u64,
    pub sim_time: f64,
    pub frames: u64,
    pub average_fps: f64,
    pub completed: usize,
    pub excluded: usize,
    pub halted: usize,
    pub alerts_raised: usize,
    pub issues: Vec<VehicleError>,
}

impl RunSummary {
    fn collect(simulator: &TrafficSimulator, frames: u64, wall: Duration) -> Self {
        let seconds = wall.as_secs_f64();
        Self {
            ticks: simulator.ticks(),
            sim_time: simulator.time(),
            frames,
            average_fps: if seconds > 0.0 {
                frames as f64 / seconds
            } else {
                0.0
            },
            completed: simulator.completed_count(),
            excluded: simulator.excluded_count(),
            halted: simulator.halted_count(),
            alerts_raised: simulator.alerts().total_raised(),
            issues: simulator.issues().to_vec(),
        }
    }
}

/// What the simulation task publishes after each batch.
#[derive(Debug, Clone)]
struct Published {
    snapshots: SnapshotPair,
    alpha: f64,
}

pub struct Engine {
    window: WindowSpec,
    road_csv: Option<PathBuf>,
    vehicle_csv: Option<PathBuf>,
    config: SimConfig,
    renderer: Option<Box<dyn Renderer>>,
    speed_limits: Vec<(String, f64)>,
    started: bool,
}

impl Engine {
    /// Creates an engine for a window of `width` x `height` pixels.
    pub fn new(title: impl Into<String>, width: u32, height: u32) -> Result<Self, ConfigurationError> {
        if width == 0 || height == 0 {
            return Err(ConfigurationError::InvalidDimensions {
                width: i64::from(width),
                height: i64::from(height),
            });
        }
        Ok(Self {
            window: WindowSpec {
                title: title.into(),
                width,
                height,
            },
            road_csv: None,
            vehicle_csv: None,
            config: SimConfig::default(),
            renderer: None,
            speed_limits: Vec::new(),
            started: false,
        })
    }

    fn ensure_configurable(&self) -> Result<(), ConfigurationError> {
        if self.started {
            Err(ConfigurationError::AlreadyStarted)
        } else {
            Ok(())
        }
    }

    /// Path of the road network table.
    pub fn set_road_csv(&mut self, path: impl Into<PathBuf>) -> Result<(), ConfigurationError> {
        self.ensure_configurable()?;
        self.road_csv = Some(path.into());
        Ok(())
    }

    /// Path of the vehicle table.
    pub fn set_csv(&mut self, path: impl Into<PathBuf>) -> Result<(), ConfigurationError> {
        self.ensure_configurable()?;
        self.vehicle_csv = Some(path.into());
        Ok(())
    }

    pub fn set_config(&mut self, config: SimConfig) -> Result<(), ConfigurationError> {
        self.ensure_configurable()?;
        self.config = config;
        Ok(())
    }

    pub fn set_renderer(&mut self, renderer: Box<dyn Renderer>) -> Result<(), ConfigurationError> {
        self.ensure_configurable()?;
        self.renderer = Some(renderer);
        Ok(())
    }

    /// Overrides the limit of every lane of `segment` for the whole run.
    pub fn set_speed_limit(&mut self, segment: impl Into<String>, limit: f64) -> Result<(), ConfigurationError> {
        self.ensure_configurable()?;
        if !(limit.is_finite() && limit > 0.0) {
            return Err(ConfigurationError::InvalidParameter {
                name: "speed_limit",
                reason: format!("must be positive, got {limit}"),
            });
        }
        self.speed_limits.push((segment.into(), limit));
        Ok(())
    }

    pub fn title(&self) -> &str {
        &self.window.title
    }

    pub fn width(&self) -> u32 {
        self.window.width
    }

    pub fn height(&self) -> u32 {
        self.window.height
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Loads both tables, then simulates and renders until the window is
    /// closed. Blocks the calling thread. Can be called once.
    pub fn run(&mut self) -> Result<RunSummary, EngineError> {
        self.ensure_configurable()?;
        self.started = true;

        let road_csv = self
            .road_csv
            .clone()
            .ok_or(ConfigurationError::MissingRoadTable)?;
        let vehicle_csv = self
            .vehicle_csv
            .clone()
            .ok_or(ConfigurationError::MissingVehicleTable)?;
        self.config.validate()?;

        let network = Arc::new(RoadNetwork::load(&road_csv, &self.config)?);
        let population = VehiclePopulation::load(&vehicle_csv, &network, &self.config)?;
        let mut simulator = TrafficSimulator::new(network, population, &self.config);
        for (segment, limit) in &self.speed_limits {
            simulator.set_speed_limit(segment, *limit)?;
        }

        let renderer = self
            .renderer
            .take()
            .unwrap_or_else(|| -> Box<dyn Renderer> { Box::new(HeadlessRenderer::default()) });

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        runtime.block_on(run_loop(
            simulator,
            renderer,
            self.window.clone(),
            self.config.clone(),
        ))
    }
}

async fn run_loop(
    simulator: TrafficSimulator,
    mut renderer: Box<dyn Renderer>,
    window: WindowSpec,
    config: SimConfig,
) -> Result<RunSummary, EngineError> {
    let geometry = simulator.network().geometry();
    renderer.open(&window, &geometry)?;

    let initial = SnapshotPair::initial(simulator.snapshot());
    let (feed_tx, feed_rx) = watch::channel(Published {
        snapshots: initial,
        alpha: 0.0,
    });
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = FrameScheduler::from_params(&config.simulation);
    let simulation = tokio::spawn(simulation_task(simulator, scheduler, feed_tx, shutdown_rx));

    log::info!(
        "Running \"{}\" at {} fps target, tick {}s x{}",
        window.title,
        config.render.target_fps,
        config.simulation.tick_seconds,
        config.simulation.time_scale
    );

    let started = Instant::now();
    let mut frames: u64 = 0;
    let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / config.render.target_fps));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let outcome = loop {
        ticker.tick().await;
        if simulation.is_finished() {
            break Ok(());
        }
        let published = feed_rx.borrow().clone();
        let elapsed = started.elapsed().as_secs_f64();
        let frame = Frame {
            index: frames,
            alpha: published.alpha,
            fps: if elapsed > 0.0 { frames as f64 / elapsed } else { 0.0 },
            snapshots: published.snapshots,
        };
        match renderer.draw(&frame) {
            Ok(WindowEvent::Continue) => frames += 1,
            Ok(WindowEvent::Close) => {
                frames += 1;
                log::info!("Window closed after {frames} frames");
                break Ok(());
            }
            Err(error) => break Err(error),
        }
    };

    // The task may already be gone; a closed channel is fine.
    let _ = shutdown_tx.send(true);
    let simulator = simulation
        .await
        .map_err(|error| EngineError::SimulationFailed(error.to_string()))?;
    outcome?;

    let summary = RunSummary::collect(&simulator, frames, started.elapsed());
    renderer.finish(&summary)?;
    log::info!(
        "Simulated {:.2}s in {} ticks: {} completed, {} excluded, {} halted, {} alerts",
        summary.sim_time,
        summary.ticks,
        summary.completed,
        summary.excluded,
        summary.halted,
        summary.alerts_raised
    );
    Ok(summary)
}

async fn simulation_task(
    mut simulator: TrafficSimulator,
    mut scheduler: FrameScheduler,
    feed: watch::Sender<Published>,
    mut shutdown: watch::Receiver<bool>,
) -> TrafficSimulator {
    let period = Duration::from_secs_f64(scheduler.tick_seconds() / scheduler.time_scale())
        .max(MIN_BATCH_PERIOD);
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last = Instant::now();

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = interval.tick() => {
                let now = Instant::now();
                let budget = scheduler.advance(now - last);
                last = now;
                if budget.ticks == 0 {
                    feed.send_modify(|published| published.alpha = budget.alpha);
                    continue;
                }

                let mut previous = None;
                for remaining in (0..budget.ticks).rev() {
                    if remaining == 0 {
                        previous = Some(simulator.snapshot());
                    }
                    simulator.tick();
                }
                let current = simulator.snapshot();
                feed.send_modify(|published| {
                    let snapshots = match previous.take() {
                        Some(before) => SnapshotPair::initial(before).advance(current),
                        None => published.snapshots.advance(current),
                    };
                    *published = Published {
                        snapshots,
                        alpha: budget.alpha,
                    };
                });
            }
        }
    }

    if scheduler.dropped_seconds() > 0.0 {
        log::debug!(
            "Dropped {:.2}s of simulated time to keep up",
            scheduler.dropped_seconds()
        );
    }
    log::info!(
        "Simulation stopped at t={:.2}s after {} ticks",
        simulator.time(),
        simulator.ticks()
    );
    simulator
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_canvas() {
        assert!(matches!(
            Engine::new("t", 0, 600),
            Err(ConfigurationError::InvalidDimensions { width: 0, height: 600 })
        ));
    }

    #[test]
    fn run_without_tables_fails() {
        let mut engine = Engine::new("t", 800, 600).unwrap();
        assert!(matches!(
            engine.run(),
            Err(EngineError::Configuration(ConfigurationError::MissingRoadTable))
        ));
        assert!(matches!(
            engine.set_road_csv("roads.csv"),
            Err(ConfigurationError::AlreadyStarted)
        ));
        assert!(matches!(
            engine.run(),
            Err(EngineError::Configuration(ConfigurationError::AlreadyStarted))
        ));
    }

    #[test]
    fn missing_vehicle_table_is_reported() {
        let mut engine = Engine::new("t", 800, 600).unwrap();
        engine.set_road_csv("roads.csv").unwrap();
        assert!(matches!(
            engine.run(),
            Err(EngineError::Configuration(ConfigurationError::MissingVehicleTable))
        ));
    }

    #[test]
    fn rejects_bad_speed_limit() {
        let mut engine = Engine::new("t", 800, 600).unwrap();
        assert!(engine.set_speed_limit("A", -1.0).is_err());
        assert!(engine.set_speed_limit("A", 12.0).is_ok());
    }
}
