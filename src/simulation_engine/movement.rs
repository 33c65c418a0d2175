//! Longitudinal driver model and kinematic integration.

use crate::config::DriverParams;

/// Car-following law in the intelligent-driver form: free-road acceleration
/// towards the desired speed, reduced by an interaction term that grows as
/// the gap closes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriverModel {
    pub max_acceleration: f64,
    pub comfortable_deceleration: f64,
    pub max_deceleration: f64,
    pub min_gap: f64,
    pub time_headway: f64,
    pub acceleration_exponent: f64,
}

impl DriverModel {
    pub fn from_params(params: &DriverParams) -> Self {
        Self {
            max_acceleration: params.max_acceleration,
            comfortable_deceleration: params.comfortable_deceleration,
            max_deceleration: params.max_deceleration,
            min_gap: params.min_gap,
            time_headway: params.time_headway,
            acceleration_exponent: params.acceleration_exponent,
        }
    }

    /// Acceleration for a vehicle at `speed` wanting `desired_speed`, with an
    /// optional leader given as `(gap, leader_speed)`. Always within
    /// `[-max_deceleration, max_acceleration]`.
    pub fn acceleration(&self, speed: f64, desired_speed: f64, leader: Option<(f64, f64)>) -> f64 {
        let free = if desired_speed > 0.0 {
            self.max_acceleration
                * (1.0 - (speed / desired_speed).powf(self.acceleration_exponent))
        } else {
            -self.max_deceleration
        };

        let interaction = match leader {
            Some((gap, _)) if gap <= 0.0 => return -self.max_deceleration,
            Some((gap, leader_speed)) => {
                let desired_gap = self.desired_gap(speed, speed - leader_speed);
                -self.max_acceleration * (desired_gap / gap).powi(2)
            }
            None => 0.0,
        };

        (free + interaction).clamp(-self.max_deceleration, self.max_acceleration)
    }

    /// Acceleration that brings the vehicle to rest `distance` ahead, as if a
    /// stopped vehicle stood there with no minimum gap.
    pub fn stop_at(&self, speed: f64, desired_speed: f64, distance: f64) -> f64 {
        let virtual_gap = distance + self.min_gap;
        self.acceleration(speed, desired_speed, Some((virtual_gap, 0.0)))
    }

    fn desired_gap(&self, speed: f64, closing_speed: f64) -> f64 {
        let braking = (self.max_acceleration * self.comfortable_deceleration).sqrt();
        let dynamic = speed * self.time_headway + speed * closing_speed / (2.0 * braking);
        self.min_gap + dynamic.max(0.0)
    }

    /// Distance needed to stop from `speed` at comfortable deceleration.
    pub fn stopping_distance(&self, speed: f64) -> f64 {
        speed * speed / (2.0 * self.comfortable_deceleration)
    }

    /// Distance at which a vehicle starts to negotiate the junction ahead.
    pub fn approach_distance(&self, speed: f64) -> f64 {
        self.stopping_distance(speed) + self.min_gap + speed * self.time_headway
    }
}

/// Semi-implicit Euler step: the new speed moves the vehicle for the whole
/// of `dt`. Speed stays within `[0, max_speed]`; a vehicle that would reverse
/// stops after its braking distance instead.
pub fn integrate(speed: f64, acceleration: f64, dt: f64, max_speed: f64) -> (f64, f64) {
    let unclamped = speed + acceleration * dt;
    if unclamped <= 0.0 {
        let distance = if acceleration < 0.0 {
            speed * speed / (2.0 * -acceleration)
        } else {
            0.0
        };
        return (0.0, distance.min(speed * dt).max(0.0));
    }
    let new_speed = unclamped.min(max_speed.max(0.0));
    (new_speed, new_speed * dt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn model() -> DriverModel {
        DriverModel::from_params(&DriverParams::default())
    }

    #[test]
    fn free_road_accelerates_to_limit() {
        let m = model();
        assert_abs_diff_eq!(m.acceleration(0.0, 10.0, None), m.max_acceleration);
        assert_abs_diff_eq!(m.acceleration(10.0, 10.0, None), 0.0);
        assert!(m.acceleration(12.0, 10.0, None) < 0.0);
    }

    #[test]
    fn close_leader_forces_braking() {
        let m = model();
        let braking = m.acceleration(10.0, 10.0, Some((3.0, 0.0)));
        assert_abs_diff_eq!(braking, -m.max_deceleration);
        assert_abs_diff_eq!(m.acceleration(5.0, 10.0, Some((-1.0, 5.0))), -m.max_deceleration);
        let far = m.acceleration(10.0, 10.0, Some((140.0, 10.0)));
        assert!(far < 0.0 && far > -0.1);
    }

    #[test]
    fn integration_never_reverses() {
        let (speed, distance) = integrate(1.0, -9.0, 1.0, 10.0);
        assert_eq!(speed, 0.0);
        assert_abs_diff_eq!(distance, 1.0 / 18.0, epsilon = 1e-12);

        let (speed, distance) = integrate(9.5, 1.5, 1.0, 10.0);
        assert_eq!(speed, 10.0);
        assert_abs_diff_eq!(distance, 10.0, epsilon = 1e-12);
    }

    #[test]
    fn position_uses_updated_speed() {
        let (speed, distance) = integrate(2.0, 1.0, 0.5, 10.0);
        assert_abs_diff_eq!(speed, 2.5, epsilon = 1e-12);
        assert_abs_diff_eq!(distance, 1.25, epsilon = 1e-12);
    }

    #[test]
    fn stop_law_brakes_near_line() {
        let m = model();
        assert!(m.stop_at(10.0, 10.0, 5.0) < -m.comfortable_deceleration);
        assert!(m.stop_at(0.0, 10.0, 100.0) > 0.0);
    }
}
