use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::control_system::traffic_light_controller::TrafficLightController;
use crate::simulation_engine::lanes::{LaneId, Point};
use crate::simulation_engine::vehicles::VehicleId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JunctionId(pub u32);

impl JunctionId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for JunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "J{}", self.0)
    }
}

/// Arbitration policy applied to junctions that need one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JunctionPolicy {
    /// One vehicle holds the conflict zone at a time; earliest arrival wins.
    #[default]
    FirstArrival,
    /// Fixed-time signal phases, one approach green at a time.
    Signal,
}

/// Control at a junction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JunctionControl {
    /// Plain continuation or dead end, vehicles pass freely.
    Uncontrolled,
    Arbitrated(JunctionPolicy),
}

/// Point where lanes terminate and begin.
#[derive(Debug, Clone)]
pub struct Junction {
    pub id: JunctionId,
    pub position: Point,
    pub incoming: Vec<LaneId>,
    pub outgoing: Vec<LaneId>,
    /// Incoming lanes grouped by approach (one segment direction each). Lanes
    /// of the same approach are compatible with each other.
    pub approaches: Vec<Vec<LaneId>>,
    pub control: JunctionControl,
}

impl Junction {
    pub fn approach_of(&self, lane: LaneId) -> Option<usize> {
        self.approaches
            .iter()
            .position(|approach| approach.contains(&lane))
    }

    pub fn needs_arbitration(&self) -> bool {
        matches!(self.control, JunctionControl::Arbitrated(_))
    }

    pub fn policy(&self) -> Option<JunctionPolicy> {
        match self.control {
            JunctionControl::Uncontrolled => None,
            JunctionControl::Arbitrated(policy) => Some(policy),
        }
    }

    /// Two incoming lanes may hold the conflict zone together only when they
    /// belong to the same approach.
    pub fn compatible(&self, a: LaneId, b: LaneId) -> bool {
        match (self.approach_of(a), self.approach_of(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        }
    }
}

/// A head-of-lane vehicle asking to cross a junction this tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ApproachRequest {
    pub vehicle: VehicleId,
    pub lane: LaneId,
    /// Simulated time at which the vehicle first came within stopping
    /// distance of the junction.
    pub arrival_time: f64,
    pub emergency: bool,
}

/// Tracks which vehicles may cross which junction.
#[derive(Debug, Default, Clone)]
pub struct JunctionArbiter {
    /// First-arrival junctions: the single vehicle holding the zone.
    holders: HashMap<JunctionId, VehicleId>,
    /// Every outstanding grant, released when the vehicle clears the junction.
    grants: HashMap<VehicleId, (JunctionId, LaneId)>,
}

impl JunctionArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_granted(&self, vehicle: VehicleId, junction: JunctionId) -> bool {
        self.grants
            .get(&vehicle)
            .is_some_and(|(granted, _)| *granted == junction)
    }

    pub fn grant_of(&self, vehicle: VehicleId) -> Option<(JunctionId, LaneId)> {
        self.grants.get(&vehicle).copied()
    }

    pub fn holder(&self, junction: JunctionId) -> Option<VehicleId> {
        self.holders.get(&junction).copied()
    }

    /// Lanes whose vehicles currently hold a grant at `junction`.
    pub fn granted_lanes(&self, junction: JunctionId) -> Vec<LaneId> {
        let mut lanes: Vec<LaneId> = self
            .grants
            .values()
            .filter(|(granted, _)| *granted == junction)
            .map(|(_, lane)| *lane)
            .collect();
        lanes.sort();
        lanes.dedup();
        lanes
    }

    /// Decides this tick's grants for one junction and returns the vehicles
    /// newly allowed in. Requests are served by earliest arrival, then lane id,
    /// then vehicle id, so identical inputs give identical outcomes.
    pub fn arbitrate(
        &mut self,
        junction: &Junction,
        requests: &[ApproachRequest],
        signals: &TrafficLightController,
    ) -> Vec<VehicleId> {
        let Some(policy) = junction.policy() else {
            return Vec::new();
        };

        let mut ordered: Vec<&ApproachRequest> = requests
            .iter()
            .filter(|request| !self.grants.contains_key(&request.vehicle))
            .collect();
        ordered.sort_by(|a, b| {
            b.emergency
                .cmp(&a.emergency)
                .then(a.arrival_time.total_cmp(&b.arrival_time))
                .then(a.lane.cmp(&b.lane))
                .then(a.vehicle.cmp(&b.vehicle))
        });

        let mut granted = Vec::new();
        match policy {
            JunctionPolicy::FirstArrival => {
                if self.holders.contains_key(&junction.id) {
                    return granted;
                }
                if let Some(first) = ordered.first() {
                    self.holders.insert(junction.id, first.vehicle);
                    self.grants.insert(first.vehicle, (junction.id, first.lane));
                    granted.push(first.vehicle);
                }
            }
            JunctionPolicy::Signal => {
                let mut lanes_served: HashSet<LaneId> = HashSet::new();
                for request in ordered {
                    if !signals.is_lane_green(junction.id, request.lane) {
                        continue;
                    }
                    // Grants outlive the green, so a vehicle still waiting
                    // from an earlier phase keeps other approaches out.
                    let conflicting = self
                        .granted_lanes(junction.id)
                        .into_iter()
                        .any(|held| !junction.compatible(held, request.lane));
                    if conflicting || !lanes_served.insert(request.lane) {
                        continue;
                    }
                    self.grants
                        .insert(request.vehicle, (junction.id, request.lane));
                    granted.push(request.vehicle);
                }
            }
        }
        granted
    }

    /// Drops any grant held by `vehicle`.
    pub fn release(&mut self, vehicle: VehicleId) {
        if let Some((junction, _)) = self.grants.remove(&vehicle) {
            if self.holders.get(&junction) == Some(&vehicle) {
                self.holders.remove(&junction);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_system::traffic_light_controller::{
        IntersectionController, TrafficLightPhase,
    };

    fn four_way(policy: JunctionPolicy) -> Junction {
        Junction {
            id: JunctionId(0),
            position: Point::new(0.0, 0.0),
            incoming: vec![LaneId(0), LaneId(1), LaneId(2)],
            outgoing: vec![LaneId(3), LaneId(4)],
            approaches: vec![vec![LaneId(0), LaneId(1)], vec![LaneId(2)]],
            control: JunctionControl::Arbitrated(policy),
        }
    }

    fn request(vehicle: VehicleId, lane: u32, arrival_time: f64) -> ApproachRequest {
        ApproachRequest {
            vehicle,
            lane: LaneId(lane),
            arrival_time,
            emergency: false,
        }
    }

    #[test]
    fn earliest_arrival_wins() {
        let junction = four_way(JunctionPolicy::FirstArrival);
        let signals = TrafficLightController::default();
        let mut arbiter = JunctionArbiter::new();
        let granted = arbiter.arbitrate(
            &junction,
            &[request(7, 2, 3.0), request(9, 0, 1.5)],
            &signals,
        );
        assert_eq!(granted, vec![9]);
        assert_eq!(arbiter.holder(junction.id), Some(9));
    }

    #[test]
    fn exact_ties_break_by_lane_then_vehicle() {
        let junction = four_way(JunctionPolicy::FirstArrival);
        let signals = TrafficLightController::default();
        let mut arbiter = JunctionArbiter::new();
        let granted = arbiter.arbitrate(
            &junction,
            &[request(1, 2, 4.0), request(5, 1, 4.0), request(3, 1, 4.0)],
            &signals,
        );
        assert_eq!(granted, vec![3]);
    }

    #[test]
    fn holder_blocks_until_released() {
        let junction = four_way(JunctionPolicy::FirstArrival);
        let signals = TrafficLightController::default();
        let mut arbiter = JunctionArbiter::new();
        arbiter.arbitrate(&junction, &[request(1, 0, 0.0)], &signals);
        assert!(arbiter
            .arbitrate(&junction, &[request(2, 2, 0.5)], &signals)
            .is_empty());
        arbiter.release(1);
        assert_eq!(
            arbiter.arbitrate(&junction, &[request(2, 2, 0.5)], &signals),
            vec![2]
        );
    }

    #[test]
    fn replay_gives_identical_grants() {
        let junction = four_way(JunctionPolicy::FirstArrival);
        let signals = TrafficLightController::default();
        let requests = [request(4, 2, 2.0), request(8, 0, 2.0), request(6, 1, 2.0)];
        let mut first = JunctionArbiter::new();
        let mut second = JunctionArbiter::new();
        assert_eq!(
            first.arbitrate(&junction, &requests, &signals),
            second.arbitrate(&junction, &requests, &signals)
        );
    }

    #[test]
    fn emergency_requests_go_first() {
        let junction = four_way(JunctionPolicy::FirstArrival);
        let signals = TrafficLightController::default();
        let mut arbiter = JunctionArbiter::new();
        let mut ambulance = request(2, 2, 9.0);
        ambulance.emergency = true;
        let granted = arbiter.arbitrate(&junction, &[request(1, 0, 1.0), ambulance], &signals);
        assert_eq!(granted, vec![2]);
    }

    fn two_phase_signals(junction: &Junction) -> TrafficLightController {
        let phases = junction
            .approaches
            .iter()
            .map(|lanes| TrafficLightPhase {
                green_lanes: lanes.clone(),
                duration: 2.0,
            })
            .collect();
        let mut signals = TrafficLightController::default();
        signals.controllers.insert(
            junction.id,
            IntersectionController::new(junction.id, phases, 1.0),
        );
        signals
    }

    #[test]
    fn signal_grants_only_green_lanes() {
        let junction = four_way(JunctionPolicy::Signal);
        let signals = two_phase_signals(&junction);
        let mut arbiter = JunctionArbiter::new();
        let granted = arbiter.arbitrate(
            &junction,
            &[request(1, 0, 0.0), request(2, 1, 0.5), request(3, 2, 0.1)],
            &signals,
        );
        assert_eq!(granted, vec![1, 2]);
        assert_eq!(arbiter.granted_lanes(junction.id), vec![LaneId(0), LaneId(1)]);
    }

    #[test]
    fn stale_grant_blocks_next_green_approach() {
        let junction = four_way(JunctionPolicy::Signal);
        let mut signals = two_phase_signals(&junction);
        let mut arbiter = JunctionArbiter::new();
        assert_eq!(arbiter.arbitrate(&junction, &[request(1, 0, 0.0)], &signals), vec![1]);

        // Vehicle 1 has not crossed when the other approach turns green.
        for _ in 0..6 {
            signals.update_all(0.5);
        }
        assert!(signals.is_lane_green(junction.id, LaneId(2)));
        assert!(!signals.is_lane_green(junction.id, LaneId(0)));
        assert!(arbiter
            .arbitrate(&junction, &[request(2, 2, 1.0)], &signals)
            .is_empty());

        arbiter.release(1);
        assert_eq!(arbiter.arbitrate(&junction, &[request(2, 2, 1.0)], &signals), vec![2]);
        for held in arbiter.granted_lanes(junction.id) {
            assert!(junction.compatible(held, LaneId(2)));
        }
    }

    #[test]
    fn compatibility_follows_approaches() {
        let junction = four_way(JunctionPolicy::Signal);
        assert!(junction.compatible(LaneId(0), LaneId(1)));
        assert!(!junction.compatible(LaneId(1), LaneId(2)));
    }
}
