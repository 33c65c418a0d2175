//! Run configuration, loadable from JSON. Every section falls back to the
//! defaults in [`crate::global_variables`].

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;
use crate::global_variables::*;
use crate::simulation_engine::intersections::JunctionPolicy;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub simulation: SimulationParams,
    pub driver: DriverParams,
    pub network: NetworkParams,
    pub junction: JunctionParams,
    pub monitoring: MonitoringParams,
    pub render: RenderParams,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationParams {
    /// Fixed tick duration in simulated seconds.
    pub tick_seconds: f64,
    /// Simulated seconds per wall-clock second.
    pub time_scale: f64,
    /// Upper bound on ticks run between two published snapshots; backlog
    /// beyond it is dropped.
    pub max_ticks_per_batch: u32,
    pub seed: u64,
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            tick_seconds: DEFAULT_TICK_SECONDS,
            time_scale: DEFAULT_TIME_SCALE,
            max_ticks_per_batch: DEFAULT_MAX_TICKS_PER_BATCH,
            seed: DEFAULT_SEED,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverParams {
    pub max_acceleration: f64,
    pub comfortable_deceleration: f64,
    pub max_deceleration: f64,
    pub min_gap: f64,
    pub time_headway: f64,
    pub acceleration_exponent: f64,
    pub lookahead: f64,
    pub spawn_clearance: f64,
    /// Vehicles without an explicit speed factor draw one from
    /// `[1 - jitter, 1]`.
    pub speed_factor_jitter: f64,
}

impl Default for DriverParams {
    fn default() -> Self {
        Self {
            max_acceleration: DEFAULT_MAX_ACCELERATION,
            comfortable_deceleration: DEFAULT_COMFORTABLE_DECELERATION,
            max_deceleration: DEFAULT_MAX_DECELERATION,
            min_gap: DEFAULT_MIN_GAP,
            time_headway: DEFAULT_TIME_HEADWAY,
            acceleration_exponent: DEFAULT_ACCELERATION_EXPONENT,
            lookahead: DEFAULT_LOOKAHEAD,
            spawn_clearance: DEFAULT_SPAWN_CLEARANCE,
            speed_factor_jitter: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkParams {
    pub snap_tolerance: f64,
    pub lane_width: f64,
    pub min_segment_length: f64,
}

impl Default for NetworkParams {
    fn default() -> Self {
        Self {
            snap_tolerance: DEFAULT_SNAP_TOLERANCE,
            lane_width: DEFAULT_LANE_WIDTH,
            min_segment_length: DEFAULT_MIN_SEGMENT_LENGTH,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JunctionParams {
    /// Policy for junctions whose road rows do not request a signal.
    pub default_policy: JunctionPolicy,
    pub green_seconds: f64,
    pub yellow_seconds: f64,
}

impl Default for JunctionParams {
    fn default() -> Self {
        Self {
            default_policy: JunctionPolicy::FirstArrival,
            green_seconds: DEFAULT_GREEN_SECONDS,
            yellow_seconds: DEFAULT_YELLOW_SECONDS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringParams {
    pub alerts_enabled: bool,
    pub stats_interval: f64,
    pub history_capacity: usize,
    pub congestion_threshold: f64,
    pub speed_violation_ratio: f64,
    pub slowdown_ratio: f64,
    pub max_alerts: usize,
}

impl Default for MonitoringParams {
    fn default() -> Self {
        Self {
            alerts_enabled: true,
            stats_interval: DEFAULT_STATS_INTERVAL,
            history_capacity: STATS_HISTORY_CAPACITY,
            congestion_threshold: DEFAULT_CONGESTION_THRESHOLD,
            speed_violation_ratio: DEFAULT_SPEED_VIOLATION_RATIO,
            slowdown_ratio: DEFAULT_SLOWDOWN_RATIO,
            max_alerts: MAX_ALERTS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderParams {
    pub target_fps: f64,
}

impl Default for RenderParams {
    fn default() -> Self {
        Self {
            target_fps: DEFAULT_TARGET_FPS,
        }
    }
}

fn require_positive(name: &'static str, value: f64) -> Result<(), ConfigurationError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigurationError::InvalidParameter {
            name,
            reason: format!("must be a positive number, got {value}"),
        })
    }
}

impl SimConfig {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigurationError> {
        let config: SimConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigurationError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let sim = &self.simulation;
        require_positive("simulation.tick_seconds", sim.tick_seconds)?;
        require_positive("simulation.time_scale", sim.time_scale)?;
        if sim.max_ticks_per_batch == 0 {
            return Err(ConfigurationError::InvalidParameter {
                name: "simulation.max_ticks_per_batch",
                reason: "must be at least 1".to_string(),
            });
        }

        let driver = &self.driver;
        require_positive("driver.max_acceleration", driver.max_acceleration)?;
        require_positive("driver.comfortable_deceleration", driver.comfortable_deceleration)?;
        require_positive("driver.max_deceleration", driver.max_deceleration)?;
        require_positive("driver.min_gap", driver.min_gap)?;
        require_positive("driver.time_headway", driver.time_headway)?;
        require_positive("driver.acceleration_exponent", driver.acceleration_exponent)?;
        require_positive("driver.lookahead", driver.lookahead)?;
        if driver.max_deceleration < driver.comfortable_deceleration {
            return Err(ConfigurationError::InvalidParameter {
                name: "driver.max_deceleration",
                reason: "must not be below driver.comfortable_deceleration".to_string(),
            });
        }
        if !(0.0..1.0).contains(&driver.speed_factor_jitter) {
            return Err(ConfigurationError::InvalidParameter {
                name: "driver.speed_factor_jitter",
                reason: format!("must lie in [0, 1), got {}", driver.speed_factor_jitter),
            });
        }
        if !(driver.spawn_clearance >= 0.0) {
            return Err(ConfigurationError::InvalidParameter {
                name: "driver.spawn_clearance",
                reason: "must not be negative".to_string(),
            });
        }

        require_positive("network.snap_tolerance", self.network.snap_tolerance)?;
        require_positive("network.lane_width", self.network.lane_width)?;
        require_positive("network.min_segment_length", self.network.min_segment_length)?;

        require_positive("junction.green_seconds", self.junction.green_seconds)?;
        if !(self.junction.yellow_seconds >= 0.0) {
            return Err(ConfigurationError::InvalidParameter {
                name: "junction.yellow_seconds",
                reason: "must not be negative".to_string(),
            });
        }

        require_positive("monitoring.stats_interval", self.monitoring.stats_interval)?;
        if self.monitoring.history_capacity == 0 {
            return Err(ConfigurationError::InvalidParameter {
                name: "monitoring.history_capacity",
                reason: "must be at least 1".to_string(),
            });
        }

        if self.monitoring.max_alerts == 0 {
            return Err(ConfigurationError::InvalidParameter {
                name: "monitoring.max_alerts",
                reason: "must be at least 1".to_string(),
            });
        }

        require_positive("render.target_fps", self.render.target_fps)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(SimConfig::default().validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config =
            SimConfig::from_json_str(r#"{ "simulation": { "tick_seconds": 0.1 } }"#).unwrap();
        assert_eq!(config.simulation.tick_seconds, 0.1);
        assert_eq!(config.simulation.max_ticks_per_batch, DEFAULT_MAX_TICKS_PER_BATCH);
        assert_eq!(config.driver, DriverParams::default());
    }

    #[test]
    fn junction_policy_is_snake_case() {
        let config =
            SimConfig::from_json_str(r#"{ "junction": { "default_policy": "signal" } }"#).unwrap();
        assert_eq!(config.junction.default_policy, JunctionPolicy::Signal);
    }

    #[test]
    fn rejects_non_positive_tick() {
        let err = SimConfig::from_json_str(r#"{ "simulation": { "tick_seconds": 0 } }"#)
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::InvalidParameter { name: "simulation.tick_seconds", .. }
        ));
    }

    #[test]
    fn rejects_zero_alert_capacity() {
        let err = SimConfig::from_json_str(r#"{ "monitoring": { "max_alerts": 0 } }"#)
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::InvalidParameter { name: "monitoring.max_alerts", .. }
        ));
    }

    #[test]
    fn rejects_braking_limit_below_comfort() {
        let mut config = SimConfig::default();
        config.driver.max_deceleration = 1.0;
        assert!(config.validate().is_err());
    }
}
