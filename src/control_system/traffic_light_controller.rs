use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::JunctionParams;
use crate::simulation_engine::intersections::{JunctionId, JunctionPolicy};
use crate::simulation_engine::lanes::LaneId;
use crate::simulation_engine::road_network::RoadNetwork;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LightState {
    Green,
    Yellow,
    Red,
}

#[derive(Debug, Clone)]
pub struct TrafficLightPhase {
    pub green_lanes: Vec<LaneId>,
    /// Green time in simulated seconds.
    pub duration: f64,
}

/// Fixed-time signal plan for one junction. Every phase change passes
/// through a yellow interval in which no lane is green.
#[derive(Debug, Clone)]
pub struct IntersectionController {
    pub junction: JunctionId,
    pub phases: Vec<TrafficLightPhase>,
    pub current_phase_index: usize,
    pub elapsed_in_phase: f64,
    pub yellow_duration: f64,
    pub in_yellow: bool,
    pub emergency_override: Option<Vec<LaneId>>,
    pending_override: Option<Vec<LaneId>>,
}

impl IntersectionController {
    pub fn new(junction: JunctionId, phases: Vec<TrafficLightPhase>, yellow_duration: f64) -> Self {
        Self {
            junction,
            phases,
            current_phase_index: 0,
            elapsed_in_phase: 0.0,
            yellow_duration,
            in_yellow: false,
            emergency_override: None,
            pending_override: None,
        }
    }

    /// Advances the plan by `dt` simulated seconds.
    pub fn update(&mut self, dt: f64) {
        if self.phases.is_empty() {
            return;
        }
        self.elapsed_in_phase += dt;

        if self.in_yellow {
            if self.elapsed_in_phase >= self.yellow_duration {
                self.elapsed_in_phase = 0.0;
                self.in_yellow = false;
                match self.pending_override.take() {
                    Some(lanes) => {
                        log::debug!(
                            "Junction {} emergency override: green for {:?}",
                            self.junction,
                            lanes
                        );
                        self.emergency_override = Some(lanes);
                    }
                    None => self.advance_phase(),
                }
            }
            return;
        }

        // Do not cycle phases during emergency override.
        if self.emergency_override.is_some() {
            return;
        }

        let current_phase = &self.phases[self.current_phase_index];
        if self.elapsed_in_phase >= current_phase.duration {
            self.elapsed_in_phase = 0.0;
            if self.yellow_duration > 0.0 {
                self.in_yellow = true;
            } else {
                self.advance_phase();
            }
        }
    }

    fn advance_phase(&mut self) {
        self.current_phase_index = (self.current_phase_index + 1) % self.phases.len();
        log::debug!(
            "Junction {} switching to phase {}: green for {:?}",
            self.junction,
            self.current_phase_index,
            self.phases[self.current_phase_index].green_lanes
        );
    }

    pub fn light_for(&self, lane: LaneId) -> LightState {
        if let Some(ref override_lanes) = self.emergency_override {
            return if override_lanes.contains(&lane) {
                LightState::Green
            } else {
                LightState::Red
            };
        }
        let Some(phase) = self.phases.get(self.current_phase_index) else {
            return LightState::Green;
        };
        match (phase.green_lanes.contains(&lane), self.in_yellow) {
            (true, false) => LightState::Green,
            (true, true) => LightState::Yellow,
            (false, _) => LightState::Red,
        }
    }

    /// Requests green for `lanes` (one approach). Takes effect after a yellow
    /// interval unless those lanes are already green.
    pub fn set_emergency_override(&mut self, lanes: Vec<LaneId>) {
        if self.emergency_override.as_ref() == Some(&lanes)
            || self.pending_override.as_ref() == Some(&lanes)
        {
            return;
        }
        let already_green = lanes
            .iter()
            .all(|lane| self.light_for(*lane) == LightState::Green);
        if already_green && self.emergency_override.is_none() {
            self.emergency_override = Some(lanes);
            return;
        }
        self.emergency_override = None;
        self.pending_override = Some(lanes);
        if !self.in_yellow {
            self.in_yellow = true;
            self.elapsed_in_phase = 0.0;
        }
    }

    pub fn clear_emergency_override(&mut self) {
        if self.emergency_override.take().is_some() {
            log::debug!("Clearing emergency override for junction {}", self.junction);
            self.in_yellow = true;
            self.elapsed_in_phase = 0.0;
        }
    }
}

/// Signal plans for every signal-controlled junction. Junctions without a
/// plan report every lane as green.
#[derive(Debug, Clone, Default)]
pub struct TrafficLightController {
    pub controllers: HashMap<JunctionId, IntersectionController>,
}

impl TrafficLightController {
    /// Creates one phase per approach for each signal junction.
    pub fn initialize(network: &RoadNetwork, params: &JunctionParams) -> Self {
        let mut controllers = HashMap::new();
        for junction in network.junctions() {
            if junction.policy() != Some(JunctionPolicy::Signal) || junction.approaches.is_empty()
            {
                continue;
            }
            let phases = junction
                .approaches
                .iter()
                .map(|lanes| TrafficLightPhase {
                    green_lanes: lanes.clone(),
                    duration: params.green_seconds,
                })
                .collect();
            controllers.insert(
                junction.id,
                IntersectionController::new(junction.id, phases, params.yellow_seconds),
            );
        }
        Self { controllers }
    }

    pub fn update_all(&mut self, dt: f64) {
        for controller in self.controllers.values_mut() {
            controller.update(dt);
        }
    }

    pub fn is_lane_green(&self, junction: JunctionId, lane: LaneId) -> bool {
        self.controllers
            .get(&junction)
            .map_or(true, |ctrl| ctrl.light_for(lane) == LightState::Green)
    }

    pub fn light_for(&self, junction: JunctionId, lane: LaneId) -> Option<LightState> {
        self.controllers
            .get(&junction)
            .map(|ctrl| ctrl.light_for(lane))
    }

    pub fn set_emergency_override_route(&mut self, junction: JunctionId, lanes: Vec<LaneId>) {
        if let Some(ctrl) = self.controllers.get_mut(&junction) {
            ctrl.set_emergency_override(lanes);
        }
    }

    pub fn clear_emergency_override(&mut self, junction: JunctionId) {
        if let Some(ctrl) = self.controllers.get_mut(&junction) {
            ctrl.clear_emergency_override();
        }
    }
}
