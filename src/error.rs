//! Error taxonomy for loading, configuring, simulating and presenting.

use std::path::PathBuf;

use thiserror::Error;

use crate::simulation_engine::vehicles::VehicleId;

/// A table could not be loaded. Fatal for the table it concerns.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("could not open {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed table: {0}")]
    Csv(#[from] csv::Error),

    #[error("{table} table is missing required column `{column}`")]
    MissingColumn {
        table: &'static str,
        column: &'static str,
    },

    #[error("line {line}: invalid {column} `{value}`: {reason}")]
    InvalidField {
        line: u64,
        column: &'static str,
        value: String,
        reason: String,
    },

    #[error("line {line}: lane_count must be at least 1, got {value}")]
    InvalidLaneCount { line: u64, value: i64 },

    #[error("segment `{segment}` has degenerate geometry: {reason}")]
    DegenerateGeometry { segment: String, reason: String },

    #[error("line {line}: duplicate segment id `{id}`")]
    DuplicateSegment { line: u64, id: String },

    #[error("segment `{segment}` lists unknown successor `{successor}`")]
    UnknownSuccessor { segment: String, successor: String },

    #[error("{table} table contains no rows")]
    Empty { table: &'static str },
}

/// A single vehicle could not be admitted or kept in the simulation.
///
/// These are reported and the vehicle is excluded; they never abort a run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VehicleError {
    #[error("line {line}: {reason}")]
    InvalidRow { line: u64, reason: String },

    #[error("vehicle {vehicle} references unknown lane `{lane}`")]
    UnknownLane { vehicle: VehicleId, lane: String },

    #[error("vehicle {vehicle}: route step `{from}` -> `{to}` is not a lane connection")]
    DisconnectedRoute {
        vehicle: VehicleId,
        from: String,
        to: String,
    },

    #[error("vehicle {vehicle}: no sink reachable from lane `{lane}`")]
    UnreachableRoute { vehicle: VehicleId, lane: String },

    #[error("vehicle {vehicle} halted on lane `{lane}`: {reason}")]
    Halted {
        vehicle: VehicleId,
        lane: String,
        reason: String,
    },
}

impl VehicleError {
    /// True for errors where the vehicle points at network structure that
    /// does not exist.
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            VehicleError::UnknownLane { .. } | VehicleError::DisconnectedRoute { .. }
        )
    }
}

/// Misuse of the embedding API or an invalid configuration.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("the engine has already been started")]
    AlreadyStarted,

    #[error("no road table was set before run()")]
    MissingRoadTable,

    #[error("no vehicle table was set before run()")]
    MissingVehicleTable,

    #[error("canvas dimensions must be positive, got {width}x{height}")]
    InvalidDimensions { width: i64, height: i64 },

    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("could not read configuration {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed configuration: {0}")]
    Json(#[from] serde_json::Error),
}

/// The presentation layer failed.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("render backend error: {0}")]
    Backend(String),

    #[error("could not prepare output {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Top-level failure of [`crate::engine::Engine::run`].
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("could not start the runtime: {0}")]
    Runtime(#[from] std::io::Error),

    #[error("simulation task failed: {0}")]
    SimulationFailed(String),
}
