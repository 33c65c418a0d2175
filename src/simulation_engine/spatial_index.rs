//! Per-lane ordering of vehicles for leader and follower lookups.
//!
//! Each lane keeps its occupants sorted by front-bumper position, so a
//! lookup is a binary search and an update is a remove plus an insert.

use std::collections::HashMap;

use crate::simulation_engine::lanes::LaneId;
use crate::simulation_engine::road_network::RoadNetwork;
use crate::simulation_engine::vehicles::VehicleId;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Occupant {
    pub vehicle: VehicleId,
    pub position: f64,
    pub length: f64,
}

impl Occupant {
    pub fn rear(&self) -> f64 {
        self.position - self.length
    }
}

/// Nearest vehicle ahead along a path of lanes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Leader {
    pub vehicle: VehicleId,
    pub lane: LaneId,
    /// Bumper-to-bumper distance: leader rear minus own front.
    pub gap: f64,
}

#[derive(Debug, Clone, Default)]
pub struct SpatialIndex {
    lanes: Vec<Vec<Occupant>>,
    locations: HashMap<VehicleId, LaneId>,
}

fn order(a: &Occupant, b: &Occupant) -> std::cmp::Ordering {
    a.position
        .total_cmp(&b.position)
        .then(a.vehicle.cmp(&b.vehicle))
}

impl SpatialIndex {
    pub fn new(lane_count: usize) -> Self {
        Self {
            lanes: vec![Vec::new(); lane_count],
            locations: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn contains(&self, vehicle: VehicleId) -> bool {
        self.locations.contains_key(&vehicle)
    }

    pub fn lane_of(&self, vehicle: VehicleId) -> Option<LaneId> {
        self.locations.get(&vehicle).copied()
    }

    /// Occupants of `lane`, ordered by ascending position.
    pub fn vehicles_on(&self, lane: LaneId) -> &[Occupant] {
        self.lanes.get(lane.index()).map_or(&[], Vec::as_slice)
    }

    pub fn occupant(&self, vehicle: VehicleId) -> Option<&Occupant> {
        let lane = self.lane_of(vehicle)?;
        self.vehicles_on(lane).iter().find(|o| o.vehicle == vehicle)
    }

    pub fn insert(&mut self, vehicle: VehicleId, lane: LaneId, position: f64, length: f64) {
        self.remove(vehicle);
        let Some(occupants) = self.lanes.get_mut(lane.index()) else {
            return;
        };
        let entry = Occupant {
            vehicle,
            position,
            length,
        };
        let at = occupants.partition_point(|o| order(o, &entry).is_lt());
        occupants.insert(at, entry);
        self.locations.insert(vehicle, lane);
    }

    pub fn remove(&mut self, vehicle: VehicleId) -> bool {
        let Some(lane) = self.locations.remove(&vehicle) else {
            return false;
        };
        if let Some(occupants) = self.lanes.get_mut(lane.index()) {
            occupants.retain(|o| o.vehicle != vehicle);
        }
        true
    }

    /// Moves a vehicle to a new lane and position.
    pub fn update(&mut self, vehicle: VehicleId, lane: LaneId, position: f64) {
        let length = self.occupant(vehicle).map_or(0.0, |o| o.length);
        self.insert(vehicle, lane, position, length);
    }

    /// First vehicle ahead of `position` along `path`, where `path[0]` is the
    /// lane `position` is measured on. Vehicles further than `lookahead`
    /// (front to rear) are ignored. `exclude` skips the querying vehicle.
    pub fn leader_ahead(
        &self,
        network: &RoadNetwork,
        path: &[LaneId],
        position: f64,
        exclude: Option<VehicleId>,
        lookahead: f64,
    ) -> Option<Leader> {
        let mut offset = 0.0;
        for (step, &lane) in path.iter().enumerate() {
            let occupants = self.vehicles_on(lane);
            let candidate = if step == 0 {
                let start = occupants.partition_point(|o| o.position < position);
                occupants[start..]
                    .iter()
                    .find(|o| Some(o.vehicle) != exclude && !self.is_behind(o, position, exclude))
            } else {
                occupants.iter().find(|o| Some(o.vehicle) != exclude)
            };
            if let Some(leader) = candidate {
                let gap = offset + leader.rear() - position;
                return (gap <= lookahead).then_some(Leader {
                    vehicle: leader.vehicle,
                    lane,
                    gap,
                });
            }
            offset += network.lane(lane).map_or(0.0, |l| l.length());
            if offset - position > lookahead {
                break;
            }
        }
        None
    }

    /// Equal positions are ordered by vehicle id.
    fn is_behind(&self, other: &Occupant, position: f64, exclude: Option<VehicleId>) -> bool {
        match exclude {
            Some(own) => other.position == position && other.vehicle < own,
            None => false,
        }
    }

    pub fn leader(
        &self,
        network: &RoadNetwork,
        vehicle: VehicleId,
        path: &[LaneId],
        lookahead: f64,
    ) -> Option<Leader> {
        let own = self.occupant(vehicle)?;
        self.leader_ahead(network, path, own.position, Some(vehicle), lookahead)
    }

    /// Nearest vehicle behind on the same lane.
    pub fn follower(&self, vehicle: VehicleId) -> Option<&Occupant> {
        let lane = self.lane_of(vehicle)?;
        let occupants = self.vehicles_on(lane);
        let at = occupants.iter().position(|o| o.vehicle == vehicle)?;
        at.checked_sub(1).map(|i| &occupants[i])
    }

    /// True when no vehicle ahead on the same lane.
    pub fn is_head_of_lane(&self, vehicle: VehicleId) -> bool {
        let Some(lane) = self.lane_of(vehicle) else {
            return false;
        };
        self.vehicles_on(lane)
            .last()
            .is_some_and(|o| o.vehicle == vehicle)
    }

    /// Whether a body of `length` with its front at `position` on `lane`
    /// keeps at least `clearance` from every vehicle, including bodies still
    /// hanging back from successor lanes and over into predecessors.
    pub fn is_clear(
        &self,
        network: &RoadNetwork,
        lane: LaneId,
        position: f64,
        length: f64,
        clearance: f64,
    ) -> bool {
        let front = position + clearance;
        let rear = position - length - clearance;
        let overlaps = |o_rear: f64, o_front: f64| o_front > rear && o_rear < front;

        if self
            .vehicles_on(lane)
            .iter()
            .any(|o| overlaps(o.rear(), o.position))
        {
            return false;
        }
        let lane_length = network.lane(lane).map_or(0.0, |l| l.length());
        let ahead_blocked = network.successors(lane).iter().any(|&next| {
            self.vehicles_on(next)
                .iter()
                .any(|o| overlaps(lane_length + o.rear(), lane_length + o.position))
        });
        if ahead_blocked {
            return false;
        }
        !network.predecessors(lane).iter().any(|&previous| {
            let previous_length = network.lane(previous).map_or(0.0, |l| l.length());
            self.vehicles_on(previous).iter().any(|o| {
                overlaps(o.rear() - previous_length, o.position - previous_length)
            })
        })
    }
}
