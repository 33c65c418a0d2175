//! Threshold alerts raised from segment statistics.

use std::collections::{HashSet, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::MonitoringParams;
use crate::flow_analyzer::{TrafficAnalyzer, TrafficData};
use crate::simulation_engine::road_network::RoadNetwork;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertKind {
    Congestion,
    SpeedViolation,
    UnusualSlowdown,
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AlertKind::Congestion => "congestion",
            AlertKind::SpeedViolation => "speed violation",
            AlertKind::UnusualSlowdown => "unusual slowdown",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub segment: String,
    /// Simulated time at which the condition was first observed.
    pub time: f64,
    pub value: f64,
    pub message: String,
    pub acknowledged: bool,
}

/// Keeps the most recent alerts. A condition raises one alert when it starts
/// and may raise again only after it has cleared.
#[derive(Debug, Clone)]
pub struct AlertManager {
    enabled: bool,
    congestion_threshold: f64,
    speed_violation_ratio: f64,
    slowdown_ratio: f64,
    max_alerts: usize,
    alerts: VecDeque<Alert>,
    active_conditions: HashSet<(AlertKind, usize)>,
    total_raised: usize,
}

impl AlertManager {
    pub fn new(params: &MonitoringParams) -> Self {
        Self {
            enabled: params.alerts_enabled,
            congestion_threshold: params.congestion_threshold,
            speed_violation_ratio: params.speed_violation_ratio,
            slowdown_ratio: params.slowdown_ratio,
            max_alerts: params.max_alerts,
            alerts: VecDeque::with_capacity(params.max_alerts),
            active_conditions: HashSet::new(),
            total_raised: 0,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.active_conditions.clear();
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Checks the latest measurement against the thresholds and returns the
    /// number of alerts raised.
    pub fn evaluate(
        &mut self,
        network: &RoadNetwork,
        data: &TrafficData,
        analyzer: &TrafficAnalyzer,
    ) -> usize {
        if !self.enabled {
            return 0;
        }
        let mut raised = 0;
        for (index, sample) in data.segments.iter().enumerate() {
            let Some(segment) = network.segment(index) else {
                continue;
            };

            let congested = sample.congestion >= self.congestion_threshold;
            raised += self.track(
                AlertKind::Congestion,
                index,
                congested,
                || Alert {
                    kind: AlertKind::Congestion,
                    segment: segment.id.clone(),
                    time: data.time,
                    value: sample.congestion,
                    message: format!(
                        "segment {} congestion at {:.0}%",
                        segment.id,
                        sample.congestion * 100.0
                    ),
                    acknowledged: false,
                },
            );

            let speeding = sample.vehicle_count > 0
                && sample.max_speed > sample.speed_limit * self.speed_violation_ratio;
            raised += self.track(AlertKind::SpeedViolation, index, speeding, || Alert {
                kind: AlertKind::SpeedViolation,
                segment: segment.id.clone(),
                time: data.time,
                value: sample.max_speed,
                message: format!(
                    "segment {}: vehicle at {:.1} exceeds limit {:.1}",
                    segment.id, sample.max_speed, sample.speed_limit
                ),
                acknowledged: false,
            });

            let historical = analyzer
                .statistics(index)
                .filter(|stats| stats.occupied_samples() >= 2)
                .and_then(|stats| stats.historical_mean_speed());
            let slowdown = match historical {
                Some(mean) => {
                    sample.vehicle_count > 0 && sample.mean_speed < mean * self.slowdown_ratio
                }
                None => false,
            };
            raised += self.track(AlertKind::UnusualSlowdown, index, slowdown, || Alert {
                kind: AlertKind::UnusualSlowdown,
                segment: segment.id.clone(),
                time: data.time,
                value: sample.mean_speed,
                message: format!(
                    "segment {}: mean speed {:.1} well below usual {:.1}",
                    segment.id,
                    sample.mean_speed,
                    historical.unwrap_or_default()
                ),
                acknowledged: false,
            });
        }
        raised
    }

    fn track(
        &mut self,
        kind: AlertKind,
        segment: usize,
        condition: bool,
        alert: impl FnOnce() -> Alert,
    ) -> usize {
        if !condition {
            self.active_conditions.remove(&(kind, segment));
            return 0;
        }
        if !self.active_conditions.insert((kind, segment)) {
            return 0;
        }
        self.push(alert());
        1
    }

    pub fn push(&mut self, alert: Alert) {
        log::info!("Alert ({}) at t={:.2}: {}", alert.kind, alert.time, alert.message);
        self.total_raised += 1;
        if self.max_alerts == 0 {
            return;
        }
        while self.alerts.len() >= self.max_alerts {
            self.alerts.pop_front();
        }
        self.alerts.push_back(alert);
    }

    /// Marks the alert at `index` (oldest first) as seen.
    pub fn acknowledge(&mut self, index: usize) -> bool {
        match self.alerts.get_mut(index) {
            Some(alert) => {
                alert.acknowledged = true;
                true
            }
            None => false,
        }
    }

    pub fn alerts(&self) -> impl Iterator<Item = &Alert> {
        self.alerts.iter()
    }

    pub fn active_alerts(&self) -> Vec<&Alert> {
        self.alerts.iter().filter(|a| !a.acknowledged).collect()
    }

    pub fn total_raised(&self) -> usize {
        self.total_raised
    }

    pub fn clear(&mut self) {
        self.alerts.clear();
        self.active_conditions.clear();
    }
}
