use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::config::SimConfig;
use crate::error::{FormatError, VehicleError};
use crate::simulation_engine::lanes::LaneId;
use crate::simulation_engine::road_network::RoadNetwork;

pub type VehicleId = u64;

const TABLE: &str = "vehicle";

/// Different types of vehicles in the simulation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VehicleType {
    #[default]
    Car,
    Bus,
    Truck,
    EmergencyVan,
}

impl VehicleType {
    /// Body length used when the table leaves the length cell empty.
    pub fn default_length(self) -> f64 {
        match self {
            VehicleType::Car => 4.5,
            VehicleType::Bus => 12.0,
            VehicleType::Truck => 16.0,
            VehicleType::EmergencyVan => 5.5,
        }
    }

    pub fn is_emergency(self) -> bool {
        matches!(self, VehicleType::EmergencyVan)
    }
}

impl FromStr for VehicleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "car" => Ok(VehicleType::Car),
            "bus" => Ok(VehicleType::Bus),
            "truck" => Ok(VehicleType::Truck),
            "emergency" | "emergencyvan" | "emergency_van" | "ambulance" => {
                Ok(VehicleType::EmergencyVan)
            }
            other => Err(format!("unknown vehicle type `{other}`")),
        }
    }
}

/// Lifecycle of a vehicle inside the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VehicleStatus {
    /// Waiting for its spawn time or for room at its start position.
    Pending,
    Active,
    /// Left the network at a sink lane.
    Completed,
    /// Stopped for good by a runtime fault; still occupies its lane.
    Halted,
    /// Never entered the simulation.
    Excluded,
}

/// Represents a vehicle traveling along the lane graph.
#[derive(Debug, Clone)]
pub struct Vehicle {
    pub id: VehicleId,
    pub vehicle_type: VehicleType,
    pub lane: LaneId,
    /// Arc length of the front bumper along `lane`. The body occupies
    /// `[position - length, position]`.
    pub position: f64,
    pub speed: f64,
    pub acceleration: f64,
    pub length: f64,
    /// Multiplier applied to the lane speed limit, in `(0, 1]` unless given.
    pub speed_factor: f64,
    /// Lanes to traverse, starting with the current one. `None` until first
    /// computed.
    pub route: Option<Vec<LaneId>>,
    pub route_index: usize,
    pub spawn_time: f64,
    pub status: VehicleStatus,
    /// When the vehicle first came within stopping distance of the junction
    /// ahead. Cleared once it crosses.
    pub approach_since: Option<f64>,
    pub waiting_time: f64,
    pub distance_travelled: f64,
}

impl Vehicle {
    /// Creates a car-following vehicle with the default body length for its type.
    pub fn new(
        id: VehicleId,
        vehicle_type: VehicleType,
        lane: LaneId,
        position: f64,
        speed: f64,
    ) -> Self {
        Self {
            id,
            vehicle_type,
            lane,
            position,
            speed,
            acceleration: 0.0,
            length: vehicle_type.default_length(),
            speed_factor: 1.0,
            route: None,
            route_index: 0,
            spawn_time: 0.0,
            status: VehicleStatus::Pending,
            approach_since: None,
            waiting_time: 0.0,
            distance_travelled: 0.0,
        }
    }

    pub fn is_emergency(&self) -> bool {
        self.vehicle_type.is_emergency()
    }

    pub fn rear(&self) -> f64 {
        self.position - self.length
    }

    /// Lane after the current one on the route, if any.
    pub fn next_lane(&self) -> Option<LaneId> {
        self.route
            .as_ref()
            .and_then(|route| route.get(self.route_index + 1))
            .copied()
    }

    /// Current lane and every lane after it.
    pub fn remaining_route(&self) -> &[LaneId] {
        match &self.route {
            Some(route) => &route[self.route_index.min(route.len())..],
            None => &[],
        }
    }

    /// True while the vehicle occupies road space.
    pub fn is_on_road(&self) -> bool {
        matches!(self.status, VehicleStatus::Active | VehicleStatus::Halted)
    }
}

#[derive(Debug, Deserialize)]
struct VehicleRow {
    id: u64,
    lane_id: String,
    position: f64,
    speed: f64,
    #[serde(default)]
    length: Option<f64>,
    #[serde(default, rename = "type")]
    vehicle_type: Option<String>,
    #[serde(default)]
    route: Option<String>,
    #[serde(default)]
    spawn_time: Option<f64>,
    #[serde(default)]
    speed_factor: Option<f64>,
}

/// All vehicles read from the vehicle table, in file order.
#[derive(Debug, Clone, Default)]
pub struct VehiclePopulation {
    vehicles: Vec<Vehicle>,
    rejected: Vec<VehicleError>,
}

impl VehiclePopulation {
    pub fn load(
        path: impl AsRef<Path>,
        network: &RoadNetwork,
        config: &SimConfig,
    ) -> Result<Self, FormatError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| FormatError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let population = Self::from_reader(file, network, config)?;
        log::info!(
            "Loaded {} vehicles from {} ({} rejected)",
            population.vehicles.len(),
            path.display(),
            population.rejected.len()
        );
        Ok(population)
    }

    /// Reads the table. Header problems are fatal; a bad row only excludes
    /// that vehicle and is listed in [`rejected`](Self::rejected).
    pub fn from_reader<R: Read>(
        reader: R,
        network: &RoadNetwork,
        config: &SimConfig,
    ) -> Result<Self, FormatError> {
        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(reader);
        let headers = rdr.headers()?.clone();
        for column in ["id", "lane_id", "position", "speed", "length"] {
            if !headers.iter().any(|h| h == column) {
                return Err(FormatError::MissingColumn {
                    table: TABLE,
                    column,
                });
            }
        }

        let mut rng = SmallRng::seed_from_u64(config.simulation.seed);
        let jitter = config.driver.speed_factor_jitter;
        let mut seen = HashSet::new();
        let mut population = Self::default();

        for record in rdr.records() {
            let record = record?;
            let line = record.position().map_or(0, |p| p.line());
            let outcome = record
                .deserialize::<VehicleRow>(Some(&headers))
                .map_err(|e| VehicleError::InvalidRow {
                    line,
                    reason: e.to_string(),
                })
                .and_then(|row| admit(row, line, network, &mut seen));

            match outcome {
                Ok(mut vehicle) => {
                    if vehicle.speed_factor <= 0.0 {
                        vehicle.speed_factor = if jitter > 0.0 {
                            rng.random_range((1.0 - jitter)..=1.0)
                        } else {
                            1.0
                        };
                    }
                    population.vehicles.push(vehicle);
                }
                Err(error) => {
                    log::warn!("Skipping vehicle: {error}");
                    population.rejected.push(error);
                }
            }
        }

        if population.vehicles.is_empty() {
            log::warn!("Vehicle table produced no usable vehicles");
        }
        Ok(population)
    }

    pub fn vehicles(&self) -> &[Vehicle] {
        &self.vehicles
    }

    pub fn get(&self, id: VehicleId) -> Option<&Vehicle> {
        self.vehicles.iter().find(|v| v.id == id)
    }

    pub fn rejected(&self) -> &[VehicleError] {
        &self.rejected
    }

    pub fn len(&self) -> usize {
        self.vehicles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vehicles.is_empty()
    }

    pub fn into_parts(self) -> (Vec<Vehicle>, Vec<VehicleError>) {
        (self.vehicles, self.rejected)
    }
}

/// Validates one row against the network. A speed factor of zero means
/// "draw one".
fn admit(
    row: VehicleRow,
    line: u64,
    network: &RoadNetwork,
    seen: &mut HashSet<VehicleId>,
) -> Result<Vehicle, VehicleError> {
    let invalid = |reason: String| VehicleError::InvalidRow { line, reason };

    if !seen.insert(row.id) {
        return Err(invalid(format!("duplicate vehicle id {}", row.id)));
    }
    let vehicle_type: VehicleType = row
        .vehicle_type
        .as_deref()
        .unwrap_or_default()
        .parse()
        .map_err(invalid)?;

    let lane = network
        .lane_by_key(&row.lane_id)
        .ok_or_else(|| VehicleError::UnknownLane {
            vehicle: row.id,
            lane: row.lane_id.clone(),
        })?;

    let length = row.length.unwrap_or_else(|| vehicle_type.default_length());
    if !(length.is_finite() && length > 0.0) {
        return Err(invalid(format!("length must be positive, got {length}")));
    }
    if !(row.speed.is_finite() && row.speed >= 0.0) {
        return Err(invalid(format!("speed must be non-negative, got {}", row.speed)));
    }
    let lane_length = network.lane(lane).map_or(0.0, |l| l.length());
    if !(row.position.is_finite() && (0.0..=lane_length).contains(&row.position)) {
        return Err(invalid(format!(
            "position {} is outside lane {} of length {lane_length:.2}",
            row.position, row.lane_id
        )));
    }
    let spawn_time = row.spawn_time.unwrap_or(0.0);
    if !(spawn_time.is_finite() && spawn_time >= 0.0) {
        return Err(invalid(format!("spawn_time must be non-negative, got {spawn_time}")));
    }
    let speed_factor = match row.speed_factor {
        Some(factor) if factor.is_finite() && factor > 0.0 => factor,
        Some(factor) => return Err(invalid(format!("speed_factor must be positive, got {factor}"))),
        None => 0.0,
    };

    let route = match row.route.as_deref().filter(|r| !r.is_empty()) {
        Some(text) => Some(parse_route(text, row.id, lane, network)?),
        None => None,
    };

    let mut vehicle = Vehicle::new(row.id, vehicle_type, lane, row.position, row.speed);
    vehicle.length = length;
    vehicle.spawn_time = spawn_time;
    vehicle.speed_factor = speed_factor;
    vehicle.route = route;
    Ok(vehicle)
}

/// Parses a `;`-separated list of lane keys into a connected route that
/// begins at `start`.
fn parse_route(
    text: &str,
    vehicle: VehicleId,
    start: LaneId,
    network: &RoadNetwork,
) -> Result<Vec<LaneId>, VehicleError> {
    let mut route = vec![start];
    for key in text.split(';').map(str::trim).filter(|k| !k.is_empty()) {
        let lane = network
            .lane_by_key(key)
            .ok_or_else(|| VehicleError::UnknownLane {
                vehicle,
                lane: key.to_string(),
            })?;
        if route.len() == 1 && lane == start {
            continue;
        }
        let previous = route[route.len() - 1];
        if !network.successors(previous).contains(&lane) {
            return Err(VehicleError::DisconnectedRoute {
                vehicle,
                from: network.lane_key(previous),
                to: network.lane_key(lane),
            });
        }
        route.push(lane);
    }
    Ok(route)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network() -> RoadNetwork {
        RoadNetwork::from_reader(
            "id,geometry,lane_count,speed_limit\n\
             A,0 0;100 0,1,10\n\
             B,100 0;200 0,1,10\n\
             C,500 500;600 500,1,10\n"
                .as_bytes(),
            &SimConfig::default(),
        )
        .unwrap()
    }

    fn load(table: &str) -> Result<VehiclePopulation, FormatError> {
        VehiclePopulation::from_reader(table.as_bytes(), &network(), &SimConfig::default())
    }

    #[test]
    fn unknown_lane_is_reported_and_rest_usable() {
        let population = load(
            "id,lane_id,position,speed,length\n\
             1,A,10,5,4\n\
             2,NOPE,10,5,4\n\
             3,B:0,20,5,\n",
        )
        .unwrap();
        assert_eq!(population.len(), 2);
        assert_eq!(population.rejected().len(), 1);
        assert!(matches!(
            population.rejected()[0],
            VehicleError::UnknownLane { vehicle: 2, .. }
        ));
        assert_eq!(population.get(3).unwrap().length, VehicleType::Car.default_length());
    }

    #[test]
    fn missing_length_column_is_fatal() {
        let err = load("id,lane_id,position,speed\n1,A,10,5\n").unwrap_err();
        assert!(matches!(err, FormatError::MissingColumn { column: "length", .. }));
    }

    #[test]
    fn malformed_rows_are_skipped() {
        let population = load(
            "id,lane_id,position,speed,length\n\
             x,A,10,5,4\n\
             1,A,150,5,4\n\
             2,A,10,-1,4\n\
             3,A,10,5,0\n\
             4,A,10,5,4\n\
             4,A,20,5,4\n",
        )
        .unwrap();
        assert_eq!(population.len(), 1);
        assert_eq!(population.rejected().len(), 5);
    }

    #[test]
    fn parses_optional_columns() {
        let population = load(
            "id,lane_id,position,speed,length,type,route,spawn_time,speed_factor\n\
             7,A,0,0,,bus,A;B,2.5,0.8\n",
        )
        .unwrap();
        let bus = population.get(7).unwrap();
        assert_eq!(bus.vehicle_type, VehicleType::Bus);
        assert_eq!(bus.length, 12.0);
        assert_eq!(bus.spawn_time, 2.5);
        assert_eq!(bus.speed_factor, 0.8);
        assert_eq!(bus.route.as_ref().unwrap().len(), 2);
    }

    #[test]
    fn disconnected_route_is_rejected() {
        let population = load("id,lane_id,position,speed,length,route\n1,A,0,0,4,C\n").unwrap();
        assert!(population.is_empty());
        assert!(matches!(
            population.rejected()[0],
            VehicleError::DisconnectedRoute { vehicle: 1, .. }
        ));
    }

    #[test]
    fn speed_factors_are_deterministic() {
        let mut config = SimConfig::default();
        config.driver.speed_factor_jitter = 0.2;
        let table = "id,lane_id,position,speed,length\n1,A,10,0,4\n2,A,30,0,4\n";
        let a = VehiclePopulation::from_reader(table.as_bytes(), &network(), &config).unwrap();
        let b = VehiclePopulation::from_reader(table.as_bytes(), &network(), &config).unwrap();
        for (x, y) in a.vehicles().iter().zip(b.vehicles()) {
            assert_eq!(x.speed_factor, y.speed_factor);
            assert!((0.8..=1.0).contains(&x.speed_factor));
        }
    }
}
