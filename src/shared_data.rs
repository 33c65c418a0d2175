// src/shared_data.rs
//
// Immutable data handed from the simulation task to the render path.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::control_system::traffic_light_controller::LightState;
use crate::simulation_engine::intersections::JunctionId;
use crate::simulation_engine::lanes::{LaneId, Point};
use crate::simulation_engine::vehicles::{VehicleId, VehicleType};

/// Axis-aligned bounds of the road geometry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Bounds {
    pub fn empty() -> Self {
        Self {
            min_x: f64::INFINITY,
            min_y: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            max_y: f64::NEG_INFINITY,
        }
    }

    pub fn include(&mut self, point: &Point) {
        self.min_x = self.min_x.min(point.x);
        self.min_y = self.min_y.min(point.y);
        self.max_x = self.max_x.max(point.x);
        self.max_y = self.max_y.max(point.y);
    }

    pub fn is_empty(&self) -> bool {
        self.min_x > self.max_x || self.min_y > self.max_y
    }

    pub fn width(&self) -> f64 {
        (self.max_x - self.min_x).max(0.0)
    }

    pub fn height(&self) -> f64 {
        (self.max_y - self.min_y).max(0.0)
    }

    pub fn padded(&self, margin: f64) -> Self {
        Self {
            min_x: self.min_x - margin,
            min_y: self.min_y - margin,
            max_x: self.max_x + margin,
            max_y: self.max_y + margin,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentVisual {
    pub id: String,
    pub points: Vec<Point>,
    pub lane_count: usize,
    pub oneway: bool,
}

/// Static road layout for drawing. Built once per network and shared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoadGeometry {
    pub segments: Vec<SegmentVisual>,
    /// Positions of junctions that need arbitration.
    pub junctions: Vec<Point>,
    pub bounds: Bounds,
    pub lane_width: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VehicleVisual {
    pub id: VehicleId,
    pub vehicle_type: VehicleType,
    pub lane: LaneId,
    /// Front-bumper position in world coordinates, lane offset applied.
    pub position: Point,
    pub heading: f64,
    pub speed: f64,
    pub length: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalVisual {
    pub junction: JunctionId,
    pub lane: LaneId,
    pub position: Point,
    pub state: LightState,
}

/// Consistent state of the simulation at the end of one tick.
#[derive(Debug, Clone)]
pub struct SimulationSnapshot {
    pub tick: u64,
    pub sim_time: f64,
    /// Vehicles on the road, keyed by id.
    pub vehicles: BTreeMap<VehicleId, VehicleVisual>,
    pub signals: Vec<SignalVisual>,
    /// Latest congestion level per segment, indexed like the geometry.
    pub congestion: Vec<f64>,
    pub active_vehicles: usize,
    pub pending_vehicles: usize,
    pub completed_vehicles: usize,
    pub alerts_raised: usize,
    pub geometry: Arc<RoadGeometry>,
}

impl SimulationSnapshot {
    /// True when nothing is moving and nothing is left to spawn.
    pub fn is_idle(&self) -> bool {
        self.active_vehicles == 0 && self.pending_vehicles == 0
    }
}

/// The two most recent snapshots, published together so the renderer can
/// interpolate between them.
#[derive(Debug, Clone)]
pub struct SnapshotPair {
    pub previous: Arc<SimulationSnapshot>,
    pub current: Arc<SimulationSnapshot>,
}

impl SnapshotPair {
    pub fn initial(snapshot: SimulationSnapshot) -> Self {
        let snapshot = Arc::new(snapshot);
        Self {
            previous: Arc::clone(&snapshot),
            current: snapshot,
        }
    }

    /// Shifts `current` into `previous`.
    pub fn advance(&self, next: SimulationSnapshot) -> Self {
        Self {
            previous: Arc::clone(&self.current),
            current: Arc::new(next),
        }
    }
}

/// Shortest signed difference `to - from`, in `(-PI, PI]`.
pub fn angle_difference(from: f64, to: f64) -> f64 {
    let tau = std::f64::consts::TAU;
    let diff = (to - from).rem_euclid(tau);
    if diff > std::f64::consts::PI {
        diff - tau
    } else {
        diff
    }
}
