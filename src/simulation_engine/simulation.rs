// simulation.rs
//
// Fixed-step traffic simulator. One call to `tick` advances every vehicle by
// exactly one Δt in a fixed order: activation, junction arbitration,
// control, integration with lane relocation, separation, grant release,
// statistics. Vehicles are always visited in ascending id order so a given
// input replays identically.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::config::SimConfig;
use crate::control_system::traffic_light_controller::TrafficLightController;
use crate::error::{ConfigurationError, VehicleError};
use crate::flow_analyzer::{collect_traffic_data, TrafficAnalyzer};
use crate::global_variables::SEPARATION_EPSILON;
use crate::monitoring::AlertManager;
use crate::shared_data::{SignalVisual, SimulationSnapshot, VehicleVisual};
use crate::simulation_engine::intersections::{
    ApproachRequest, Junction, JunctionArbiter, JunctionId, JunctionPolicy,
};
use crate::simulation_engine::lanes::{LaneId, Point, Pose};
use crate::simulation_engine::movement::{integrate, DriverModel};
use crate::simulation_engine::road_network::RoadNetwork;
use crate::simulation_engine::route_generation::shortest_route_to_sink;
use crate::simulation_engine::spatial_index::SpatialIndex;
use crate::simulation_engine::vehicles::{Vehicle, VehicleId, VehiclePopulation, VehicleStatus};

/// Slack for comparing accumulated simulated time against spawn times.
const TIME_EPSILON: f64 = 1e-9;
/// Below this speed a vehicle counts as waiting.
const WAITING_SPEED: f64 = 0.1;

pub struct TrafficSimulator {
    network: Arc<RoadNetwork>,
    /// Sorted by id.
    vehicles: Vec<Vehicle>,
    index: SpatialIndex,
    arbiter: JunctionArbiter,
    signals: TrafficLightController,
    overridden: HashSet<JunctionId>,
    driver: DriverModel,
    lookahead: f64,
    spawn_clearance: f64,
    dt: f64,
    tick: u64,
    time: f64,
    speed_limits: Vec<f64>,
    analyzer: TrafficAnalyzer,
    alerts: AlertManager,
    issues: Vec<VehicleError>,
    rejected: usize,
}

impl TrafficSimulator {
    pub fn new(network: Arc<RoadNetwork>, population: VehiclePopulation, config: &SimConfig) -> Self {
        let (mut vehicles, issues) = population.into_parts();
        vehicles.sort_by_key(|v| v.id);
        for vehicle in &mut vehicles {
            vehicle.status = VehicleStatus::Pending;
        }
        let speed_limits = network.lanes().iter().map(|l| l.speed_limit).collect();

        Self {
            index: SpatialIndex::new(network.lanes().len()),
            arbiter: JunctionArbiter::new(),
            signals: TrafficLightController::initialize(&network, &config.junction),
            overridden: HashSet::new(),
            driver: DriverModel::from_params(&config.driver),
            lookahead: config.driver.lookahead,
            spawn_clearance: config.driver.spawn_clearance,
            dt: config.simulation.tick_seconds,
            tick: 0,
            time: 0.0,
            speed_limits,
            analyzer: TrafficAnalyzer::new(&network, &config.monitoring),
            alerts: AlertManager::new(&config.monitoring),
            rejected: issues.len(),
            issues,
            vehicles,
            network,
        }
    }

    /// Advances the simulation by one Δt.
    pub fn tick(&mut self) {
        self.signals.update_all(self.dt);
        self.activate_pending();
        self.update_emergency_overrides();
        self.arbitrate_junctions();
        let accelerations = self.plan_accelerations();
        self.integrate(&accelerations);
        self.enforce_separation();
        self.release_cleared_grants();

        self.tick += 1;
        self.time = self.tick as f64 * self.dt;
        self.sample_statistics();
    }

    /// Runs whole ticks until `seconds` of simulated time have passed.
    pub fn run_for(&mut self, seconds: f64) {
        let ticks = (seconds / self.dt).round() as u64;
        for _ in 0..ticks {
            self.tick();
        }
    }

    fn activate_pending(&mut self) {
        let now = self.time + TIME_EPSILON;
        for vehicle in self
            .vehicles
            .iter_mut()
            .filter(|v| v.status == VehicleStatus::Pending && v.spawn_time <= now)
        {
            if vehicle.route.is_none() {
                match shortest_route_to_sink(&self.network, vehicle.lane) {
                    Some(route) => vehicle.route = Some(route),
                    None => {
                        let error = VehicleError::UnreachableRoute {
                            vehicle: vehicle.id,
                            lane: self.network.lane_key(vehicle.lane),
                        };
                        log::warn!("Excluding vehicle: {error}");
                        vehicle.status = VehicleStatus::Excluded;
                        self.issues.push(error);
                        continue;
                    }
                }
            }
            if !self.index.is_clear(
                &self.network,
                vehicle.lane,
                vehicle.position,
                vehicle.length,
                self.spawn_clearance,
            ) {
                log::debug!("Vehicle {} waits for room to spawn", vehicle.id);
                continue;
            }
            self.index
                .insert(vehicle.id, vehicle.lane, vehicle.position, vehicle.length);
            vehicle.status = VehicleStatus::Active;
            log::debug!(
                "Vehicle {} entered at {} {:.2}",
                vehicle.id,
                self.network.lane_key(vehicle.lane),
                vehicle.position
            );
        }
    }

    /// Emergency vehicles within lookahead of a signal junction get their
    /// approach switched to green.
    fn update_emergency_overrides(&mut self) {
        let mut wanted: BTreeMap<JunctionId, Vec<LaneId>> = BTreeMap::new();
        for vehicle in self.active().filter(|v| v.is_emergency()) {
            let Some(junction) = arbitrated_junction_ahead(&self.network, vehicle) else {
                continue;
            };
            if junction.policy() != Some(JunctionPolicy::Signal) {
                continue;
            }
            let to_end = distance_to_lane_end(&self.network, vehicle);
            if to_end > self.lookahead {
                continue;
            }
            if let Some(approach) = junction.approach_of(vehicle.lane) {
                wanted
                    .entry(junction.id)
                    .or_insert_with(|| junction.approaches[approach].clone());
            }
        }

        let stale: Vec<JunctionId> = self
            .overridden
            .iter()
            .filter(|id| !wanted.contains_key(id))
            .copied()
            .collect();
        for junction in stale {
            self.signals.clear_emergency_override(junction);
            self.overridden.remove(&junction);
        }
        for (junction, lanes) in wanted {
            if self.overridden.insert(junction) {
                log::info!("Emergency override at junction {junction}");
                self.signals.set_emergency_override_route(junction, lanes);
            }
        }
    }

    fn arbitrate_junctions(&mut self) {
        let mut requests: BTreeMap<JunctionId, Vec<ApproachRequest>> = BTreeMap::new();
        for vehicle in self
            .vehicles
            .iter_mut()
            .filter(|v| v.status == VehicleStatus::Active)
        {
            let Some(junction) = arbitrated_junction_ahead(&self.network, vehicle) else {
                vehicle.approach_since = None;
                continue;
            };
            let to_end = distance_to_lane_end(&self.network, vehicle);
            if to_end > self.driver.approach_distance(vehicle.speed) {
                continue;
            }
            let since = *vehicle.approach_since.get_or_insert(self.time);
            if self.arbiter.is_granted(vehicle.id, junction.id)
                || !self.index.is_head_of_lane(vehicle.id)
            {
                continue;
            }
            requests.entry(junction.id).or_default().push(ApproachRequest {
                vehicle: vehicle.id,
                lane: vehicle.lane,
                arrival_time: since,
                emergency: vehicle.is_emergency(),
            });
        }

        for (id, pending) in requests {
            let Some(junction) = self.network.junction(id) else {
                continue;
            };
            for vehicle in self.arbiter.arbitrate(junction, &pending, &self.signals) {
                log::debug!("Vehicle {vehicle} may cross junction {id}");
            }
        }
    }

    fn plan_accelerations(&self) -> Vec<(usize, f64)> {
        self.vehicles
            .iter()
            .enumerate()
            .filter(|(_, v)| v.status == VehicleStatus::Active)
            .map(|(slot, vehicle)| (slot, self.acceleration_for(vehicle)))
            .collect()
    }

    fn acceleration_for(&self, vehicle: &Vehicle) -> f64 {
        let desired = self.desired_speed(vehicle, vehicle.lane);
        let route = vehicle.remaining_route();
        let path = if route.is_empty() {
            std::slice::from_ref(&vehicle.lane)
        } else {
            route
        };
        let leader = self
            .index
            .leader(&self.network, vehicle.id, path, self.lookahead)
            .map(|leader| (leader.gap, self.speed_of(leader.vehicle)));
        let mut acceleration = self.driver.acceleration(vehicle.speed, desired, leader);

        let to_end = distance_to_lane_end(&self.network, vehicle);
        if let Some(next) = vehicle.next_lane() {
            // Slow down ahead of a lower limit on the next lane.
            let next_desired = self.desired_speed(vehicle, next);
            if next_desired < vehicle.speed && to_end > 0.0 {
                let needed = (vehicle.speed.powi(2) - next_desired.powi(2)) / (2.0 * to_end);
                if needed > self.driver.comfortable_deceleration * 0.5 {
                    acceleration = acceleration.min(-needed.min(self.driver.max_deceleration));
                }
            }
        }
        if self.must_stop(vehicle) {
            acceleration = acceleration.min(self.driver.stop_at(vehicle.speed, desired, to_end));
        }
        acceleration
    }

    /// An arbitrated junction is ahead, the vehicle is close to it and it
    /// holds no grant.
    fn must_stop(&self, vehicle: &Vehicle) -> bool {
        let Some(junction) = arbitrated_junction_ahead(&self.network, vehicle) else {
            return false;
        };
        let to_end = distance_to_lane_end(&self.network, vehicle);
        to_end <= self.driver.approach_distance(vehicle.speed) + vehicle.speed * self.dt
            && !self.arbiter.is_granted(vehicle.id, junction.id)
    }

    fn desired_speed(&self, vehicle: &Vehicle, lane: LaneId) -> f64 {
        self.speed_limits.get(lane.index()).copied().unwrap_or(0.0) * vehicle.speed_factor
    }

    fn speed_of(&self, id: VehicleId) -> f64 {
        self.vehicle(id).map_or(0.0, |v| v.speed)
    }

    fn integrate(&mut self, accelerations: &[(usize, f64)]) {
        for &(slot, acceleration) in accelerations {
            let must_stop = self.must_stop(&self.vehicles[slot]);
            let max_speed = {
                let vehicle = &self.vehicles[slot];
                self.desired_speed(vehicle, vehicle.lane)
            };
            let network = Arc::clone(&self.network);
            let vehicle = &mut self.vehicles[slot];

            let (speed, distance) = integrate(vehicle.speed, acceleration, self.dt, max_speed);
            vehicle.acceleration = acceleration;
            vehicle.speed = speed;
            let mut position = vehicle.position + distance;
            let lane_length = network.lane(vehicle.lane).map_or(0.0, |l| l.length());
            if must_stop && position > lane_length {
                position = lane_length;
                vehicle.speed = 0.0;
            }
            vehicle.distance_travelled += position - vehicle.position;
            if vehicle.speed < WAITING_SPEED {
                vehicle.waiting_time += self.dt;
            }

            loop {
                let lane_length = network.lane(vehicle.lane).map_or(0.0, |l| l.length());
                match vehicle.next_lane() {
                    None if position >= lane_length => {
                        vehicle.position = lane_length;
                        vehicle.status = VehicleStatus::Completed;
                        log::debug!("Vehicle {} completed its route", vehicle.id);
                        break;
                    }
                    Some(next) if position > lane_length => {
                        if !network.successors(vehicle.lane).contains(&next) {
                            let error = VehicleError::Halted {
                                vehicle: vehicle.id,
                                lane: network.lane_key(vehicle.lane),
                                reason: format!(
                                    "no connection to {}",
                                    network.lane_key(next)
                                ),
                            };
                            log::warn!("{error}");
                            self.issues.push(error);
                            position = lane_length;
                            vehicle.speed = 0.0;
                            vehicle.acceleration = 0.0;
                            vehicle.status = VehicleStatus::Halted;
                            break;
                        }
                        position -= lane_length;
                        vehicle.lane = next;
                        vehicle.route_index += 1;
                        vehicle.approach_since = None;
                    }
                    _ => break,
                }
            }

            match vehicle.status {
                VehicleStatus::Completed => {
                    self.index.remove(vehicle.id);
                    self.arbiter.release(vehicle.id);
                }
                _ => {
                    vehicle.position = position;
                    self.index.update(vehicle.id, vehicle.lane, position);
                }
            }
        }
    }

    /// Pushes followers back so no two bodies overlap after integration.
    fn enforce_separation(&mut self) {
        let passes = self.vehicles.len() + 1;
        for _ in 0..passes {
            let mut moved = false;
            for slot in 0..self.vehicles.len() {
                if self.vehicles[slot].status != VehicleStatus::Active {
                    continue;
                }
                let vehicle = &self.vehicles[slot];
                let route = vehicle.remaining_route();
                let path = if route.is_empty() {
                    std::slice::from_ref(&vehicle.lane)
                } else {
                    route
                };
                let Some(leader) =
                    self.index
                        .leader(&self.network, vehicle.id, path, f64::INFINITY)
                else {
                    continue;
                };
                if leader.gap >= SEPARATION_EPSILON {
                    continue;
                }
                let leader_speed = self.speed_of(leader.vehicle);
                let shortfall = SEPARATION_EPSILON - leader.gap;
                self.pull_back(slot, shortfall, leader_speed);
                moved = true;
            }
            if !moved {
                break;
            }
        }
    }

    fn pull_back(&mut self, slot: usize, distance: f64, speed_cap: f64) {
        let network = Arc::clone(&self.network);
        let vehicle = &mut self.vehicles[slot];
        let mut position = vehicle.position - distance;
        while position < 0.0 && vehicle.route_index > 0 {
            let Some(previous) = vehicle
                .route
                .as_ref()
                .and_then(|r| r.get(vehicle.route_index - 1))
                .copied()
            else {
                break;
            };
            position += network.lane(previous).map_or(0.0, |l| l.length());
            vehicle.lane = previous;
            vehicle.route_index -= 1;
        }
        vehicle.position = position.max(0.0);
        vehicle.speed = vehicle.speed.min(speed_cap);
        vehicle.distance_travelled = (vehicle.distance_travelled - distance).max(0.0);
        self.index.update(vehicle.id, vehicle.lane, vehicle.position);
    }

    /// A grant ends once the vehicle's rear has left the junction, or the
    /// vehicle is no longer moving through the network.
    fn release_cleared_grants(&mut self) {
        for vehicle in &self.vehicles {
            let Some((_, granted_lane)) = self.arbiter.grant_of(vehicle.id) else {
                continue;
            };
            let cleared = match vehicle.status {
                VehicleStatus::Active => {
                    let lane_length = self.network.lane(vehicle.lane).map_or(0.0, |l| l.length());
                    vehicle.lane != granted_lane
                        && (vehicle.rear() >= 0.0 || vehicle.position >= lane_length)
                }
                _ => true,
            };
            if cleared {
                self.arbiter.release(vehicle.id);
            }
        }
    }

    fn sample_statistics(&mut self) {
        if !self.analyzer.is_due(self.dt) {
            return;
        }
        let data = collect_traffic_data(&self.network, &self.vehicles, &self.speed_limits, self.time);
        self.alerts.evaluate(&self.network, &data, &self.analyzer);
        self.analyzer.record(&data);
    }

    fn active(&self) -> impl Iterator<Item = &Vehicle> {
        self.vehicles
            .iter()
            .filter(|v| v.status == VehicleStatus::Active)
    }

    /// Changes the limit of every lane of `segment` from the next tick on.
    pub fn set_speed_limit(&mut self, segment: &str, limit: f64) -> Result<(), ConfigurationError> {
        if !(limit.is_finite() && limit > 0.0) {
            return Err(ConfigurationError::InvalidParameter {
                name: "speed_limit",
                reason: format!("must be positive, got {limit}"),
            });
        }
        let lanes: Vec<LaneId> = self
            .network
            .segment_by_id(segment)
            .ok_or_else(|| ConfigurationError::InvalidParameter {
                name: "speed_limit",
                reason: format!("unknown segment `{segment}`"),
            })?
            .lanes()
            .collect();
        for lane in lanes {
            self.speed_limits[lane.index()] = limit;
        }
        log::info!("Speed limit of segment {segment} set to {limit}");
        Ok(())
    }

    pub fn speed_limit(&self, lane: LaneId) -> Option<f64> {
        self.speed_limits.get(lane.index()).copied()
    }

    /// Render-facing copy of the current state.
    pub fn snapshot(&self) -> SimulationSnapshot {
        let vehicles = self
            .vehicles
            .iter()
            .filter(|v| v.is_on_road())
            .filter_map(|v| {
                let pose = self.offset_pose(v.lane, v.position)?;
                Some((
                    v.id,
                    VehicleVisual {
                        id: v.id,
                        vehicle_type: v.vehicle_type,
                        lane: v.lane,
                        position: pose.position,
                        heading: pose.heading,
                        speed: v.speed,
                        length: v.length,
                    },
                ))
            })
            .collect();

        let signals = self
            .network
            .junctions()
            .iter()
            .filter(|j| j.policy() == Some(JunctionPolicy::Signal))
            .flat_map(|junction| {
                junction.incoming.iter().filter_map(|&lane| {
                    let state = self.signals.light_for(junction.id, lane)?;
                    let length = self.network.lane(lane)?.length();
                    let pose = self.offset_pose(lane, length)?;
                    Some(SignalVisual {
                        junction: junction.id,
                        lane,
                        position: pose.position,
                        state,
                    })
                })
            })
            .collect();

        SimulationSnapshot {
            tick: self.tick,
            sim_time: self.time,
            vehicles,
            signals,
            congestion: self.analyzer.congestion_levels(),
            active_vehicles: self.count(VehicleStatus::Active),
            pending_vehicles: self.count(VehicleStatus::Pending),
            completed_vehicles: self.count(VehicleStatus::Completed),
            alerts_raised: self.alerts.total_raised(),
            geometry: self.network.geometry(),
        }
    }

    fn offset_pose(&self, lane: LaneId, s: f64) -> Option<Pose> {
        let pose = self.network.world_position(lane, s)?;
        let offset = self.network.lateral_offset(lane);
        // Right of travel in a y-up world.
        let (sin, cos) = pose.heading.sin_cos();
        Some(Pose {
            position: Point::new(
                pose.position.x + offset * sin,
                pose.position.y - offset * cos,
            ),
            heading: pose.heading,
        })
    }

    fn count(&self, status: VehicleStatus) -> usize {
        self.vehicles.iter().filter(|v| v.status == status).count()
    }

    pub fn network(&self) -> &Arc<RoadNetwork> {
        &self.network
    }

    pub fn vehicles(&self) -> &[Vehicle] {
        &self.vehicles
    }

    pub fn vehicle(&self, id: VehicleId) -> Option<&Vehicle> {
        self.vehicles
            .binary_search_by_key(&id, |v| v.id)
            .ok()
            .map(|slot| &self.vehicles[slot])
    }

    pub fn spatial_index(&self) -> &SpatialIndex {
        &self.index
    }

    pub fn signals(&self) -> &TrafficLightController {
        &self.signals
    }

    pub fn signals_mut(&mut self) -> &mut TrafficLightController {
        &mut self.signals
    }

    pub fn analyzer(&self) -> &TrafficAnalyzer {
        &self.analyzer
    }

    pub fn alerts(&self) -> &AlertManager {
        &self.alerts
    }

    pub fn alerts_mut(&mut self) -> &mut AlertManager {
        &mut self.alerts
    }

    /// Every vehicle problem reported so far, load-time rejections first.
    pub fn issues(&self) -> &[VehicleError] {
        &self.issues
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn ticks(&self) -> u64 {
        self.tick
    }

    pub fn tick_seconds(&self) -> f64 {
        self.dt
    }

    pub fn completed_count(&self) -> usize {
        self.count(VehicleStatus::Completed)
    }

    pub fn halted_count(&self) -> usize {
        self.count(VehicleStatus::Halted)
    }

    /// Vehicles rejected at load time plus those excluded at activation.
    pub fn excluded_count(&self) -> usize {
        self.rejected + self.count(VehicleStatus::Excluded)
    }

    /// Nothing left to move or spawn. Halted vehicles do not count.
    pub fn is_idle(&self) -> bool {
        !self
            .vehicles
            .iter()
            .any(|v| matches!(v.status, VehicleStatus::Active | VehicleStatus::Pending))
    }
}

fn arbitrated_junction_ahead<'a>(network: &'a RoadNetwork, vehicle: &Vehicle) -> Option<&'a Junction> {
    vehicle.next_lane()?;
    network
        .junction_at_end(vehicle.lane)
        .filter(|junction| junction.needs_arbitration())
}

fn distance_to_lane_end(network: &RoadNetwork, vehicle: &Vehicle) -> f64 {
    network
        .lane(vehicle.lane)
        .map_or(0.0, |lane| lane.length() - vehicle.position)
}
