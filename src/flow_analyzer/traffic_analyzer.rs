// traffic_analyzer.rs
//
// Per-segment flow statistics sampled at a fixed simulated interval and kept
// in a bounded history.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::config::MonitoringParams;
use crate::global_variables::CAPACITY_SPACING;
use crate::simulation_engine::road_network::RoadNetwork;
use crate::simulation_engine::vehicles::Vehicle;

/// One measurement of a segment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SegmentSample {
    pub time: f64,
    pub vehicle_count: usize,
    pub mean_speed: f64,
    pub max_speed: f64,
    pub speed_limit: f64,
    pub congestion: f64,
}

/// Measurement of every segment at one instant, indexed like
/// [`RoadNetwork::segments`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrafficData {
    pub time: f64,
    pub total_vehicles: usize,
    pub segments: Vec<SegmentSample>,
}

/// Occupancy relative to a nominal capacity of one vehicle per
/// `CAPACITY_SPACING` units of lane, clamped to `[0, 1]`.
pub fn congestion_level(vehicle_count: usize, length: f64, lanes: usize) -> f64 {
    let capacity = length * lanes as f64 / CAPACITY_SPACING;
    if capacity <= 0.0 {
        return if vehicle_count > 0 { 1.0 } else { 0.0 };
    }
    (vehicle_count as f64 / capacity).clamp(0.0, 1.0)
}

/// Collect a measurement from the vehicles currently on the road.
/// `speed_limits` holds the effective limit of each lane.
pub fn collect_traffic_data(
    network: &RoadNetwork,
    vehicles: &[Vehicle],
    speed_limits: &[f64],
    time: f64,
) -> TrafficData {
    let mut counts = vec![0usize; network.segments().len()];
    let mut speed_sums = vec![0.0; network.segments().len()];
    let mut max_speeds = vec![0.0f64; network.segments().len()];
    let mut total_vehicles = 0;

    for vehicle in vehicles.iter().filter(|v| v.is_on_road()) {
        let Some(lane) = network.lane(vehicle.lane) else {
            continue;
        };
        counts[lane.segment] += 1;
        speed_sums[lane.segment] += vehicle.speed;
        max_speeds[lane.segment] = max_speeds[lane.segment].max(vehicle.speed);
        total_vehicles += 1;
    }

    let segments = network
        .segments()
        .iter()
        .enumerate()
        .map(|(index, segment)| {
            let count = counts[index];
            let speed_limit = segment
                .lanes()
                .next()
                .and_then(|lane| speed_limits.get(lane.index()))
                .copied()
                .unwrap_or(segment.speed_limit);
            SegmentSample {
                time,
                vehicle_count: count,
                mean_speed: if count > 0 {
                    speed_sums[index] / count as f64
                } else {
                    0.0
                },
                max_speed: max_speeds[index],
                speed_limit,
                congestion: congestion_level(count, segment.length(), segment.lanes().count()),
            }
        })
        .collect();

    TrafficData {
        time,
        total_vehicles,
        segments,
    }
}

/// Rolling history of one segment.
#[derive(Debug, Clone)]
pub struct SegmentStatistics {
    pub id: String,
    capacity: usize,
    history: VecDeque<SegmentSample>,
}

impl SegmentStatistics {
    pub fn new(id: impl Into<String>, capacity: usize) -> Self {
        Self {
            id: id.into(),
            capacity,
            history: VecDeque::with_capacity(capacity),
        }
    }

    pub fn record(&mut self, sample: SegmentSample) {
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(sample);
    }

    pub fn latest(&self) -> Option<&SegmentSample> {
        self.history.back()
    }

    pub fn history(&self) -> impl Iterator<Item = &SegmentSample> {
        self.history.iter()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Mean of the sampled mean speeds, counting only samples with traffic.
    pub fn historical_mean_speed(&self) -> Option<f64> {
        let occupied: Vec<f64> = self
            .history
            .iter()
            .filter(|s| s.vehicle_count > 0)
            .map(|s| s.mean_speed)
            .collect();
        if occupied.is_empty() {
            return None;
        }
        Some(occupied.iter().sum::<f64>() / occupied.len() as f64)
    }

    /// Number of samples that had traffic.
    pub fn occupied_samples(&self) -> usize {
        self.history.iter().filter(|s| s.vehicle_count > 0).count()
    }

    pub fn average_congestion(&self) -> f64 {
        if self.history.is_empty() {
            return 0.0;
        }
        self.history.iter().map(|s| s.congestion).sum::<f64>() / self.history.len() as f64
    }
}

/// Samples segment statistics every `stats_interval` simulated seconds.
#[derive(Debug, Clone)]
pub struct TrafficAnalyzer {
    interval: f64,
    since_last: f64,
    segments: Vec<SegmentStatistics>,
}

impl TrafficAnalyzer {
    pub fn new(network: &RoadNetwork, params: &MonitoringParams) -> Self {
        Self {
            interval: params.stats_interval,
            // Sample on the first tick.
            since_last: params.stats_interval,
            segments: network
                .segments()
                .iter()
                .map(|s| SegmentStatistics::new(s.id.clone(), params.history_capacity))
                .collect(),
        }
    }

    /// Advances the sampling clock; true when a sample should be taken.
    pub fn is_due(&mut self, dt: f64) -> bool {
        self.since_last += dt;
        if self.since_last + 1e-9 >= self.interval {
            self.since_last = 0.0;
            true
        } else {
            false
        }
    }

    pub fn record(&mut self, data: &TrafficData) {
        for (stats, sample) in self.segments.iter_mut().zip(&data.segments) {
            stats.record(*sample);
        }
    }

    pub fn segments(&self) -> &[SegmentStatistics] {
        &self.segments
    }

    pub fn statistics(&self, segment: usize) -> Option<&SegmentStatistics> {
        self.segments.get(segment)
    }

    /// Latest congestion level per segment.
    pub fn congestion_levels(&self) -> Vec<f64> {
        self.segments
            .iter()
            .map(|s| s.latest().map_or(0.0, |sample| sample.congestion))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;
    use crate::simulation_engine::lanes::LaneId;
    use crate::simulation_engine::vehicles::{VehicleStatus, VehicleType};
    use approx::assert_abs_diff_eq;

    fn sample(count: usize, mean_speed: f64) -> SegmentSample {
        SegmentSample {
            vehicle_count: count,
            mean_speed,
            ..SegmentSample::default()
        }
    }

    #[test]
    fn congestion_is_clamped() {
        assert_abs_diff_eq!(congestion_level(5, 100.0, 1), 0.5);
        assert_abs_diff_eq!(congestion_level(50, 100.0, 1), 1.0);
        assert_abs_diff_eq!(congestion_level(0, 100.0, 2), 0.0);
    }

    #[test]
    fn history_is_bounded() {
        let mut stats = SegmentStatistics::new("A", 3);
        for i in 0..5 {
            stats.record(sample(1, i as f64));
        }
        assert_eq!(stats.len(), 3);
        assert_abs_diff_eq!(stats.historical_mean_speed().unwrap(), 3.0);
        assert_eq!(stats.latest().unwrap().mean_speed, 4.0);
    }

    #[test]
    fn empty_samples_do_not_count_towards_mean_speed() {
        let mut stats = SegmentStatistics::new("A", 10);
        stats.record(sample(0, 0.0));
        assert!(stats.historical_mean_speed().is_none());
        stats.record(sample(2, 8.0));
        assert_eq!(stats.occupied_samples(), 1);
        assert_abs_diff_eq!(stats.historical_mean_speed().unwrap(), 8.0);
    }

    #[test]
    fn collects_per_segment_counts() {
        let config = SimConfig::default();
        let network = RoadNetwork::from_reader(
            "id,geometry,lane_count,speed_limit\nA,0 0;100 0,1,10\nB,100 0;200 0,1,10\n"
                .as_bytes(),
            &config,
        )
        .unwrap();
        let mut on_a = Vehicle::new(1, VehicleType::Car, LaneId(0), 50.0, 6.0);
        on_a.status = VehicleStatus::Active;
        let mut other = Vehicle::new(2, VehicleType::Car, LaneId(0), 20.0, 2.0);
        other.status = VehicleStatus::Active;
        let pending = Vehicle::new(3, VehicleType::Car, LaneId(1), 10.0, 0.0);
        let limits = vec![10.0, 10.0];

        let data = collect_traffic_data(&network, &[on_a, other, pending], &limits, 1.0);
        assert_eq!(data.total_vehicles, 2);
        assert_eq!(data.segments[0].vehicle_count, 2);
        assert_abs_diff_eq!(data.segments[0].mean_speed, 4.0);
        assert_abs_diff_eq!(data.segments[0].max_speed, 6.0);
        assert_abs_diff_eq!(data.segments[0].congestion, 0.2);
        assert_eq!(data.segments[1].vehicle_count, 0);

        let mut analyzer = TrafficAnalyzer::new(&network, &config.monitoring);
        assert!(analyzer.is_due(0.05));
        assert!(!analyzer.is_due(0.05));
        analyzer.record(&data);
        assert_abs_diff_eq!(analyzer.congestion_levels()[0], 0.2);
    }
}
