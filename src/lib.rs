//! Traffic-flow simulation engine with fixed-step kinematics and a decoupled
//! render path.
//!
//! The road network and vehicle population are loaded from CSV tables, a
//! [`simulation_engine::simulation::TrafficSimulator`] advances them in whole
//! ticks, and the [`engine::Engine`] orchestrator hands immutable snapshots to
//! a [`rendering::Renderer`].

pub mod config;
pub mod control_system;
pub mod engine;
pub mod error;
pub mod flow_analyzer;
pub mod global_variables;
pub mod monitoring;
pub mod rendering;
pub mod shared_data;
pub mod simulation_engine;

pub use config::SimConfig;
pub use engine::{Engine, RunSummary};
pub use error::{ConfigurationError, EngineError, FormatError, RenderError, VehicleError};
