//! Presentation side of the engine: the renderer seam, interpolated frames
//! and the congestion colour ramp.

pub mod headless;
pub mod plot_renderer;

pub use headless::HeadlessRenderer;
pub use plot_renderer::PlotRenderer;

use crate::engine::RunSummary;
use crate::error::RenderError;
use crate::shared_data::{angle_difference, RoadGeometry, SimulationSnapshot, SnapshotPair, VehicleVisual};

/// Window requested by the embedding program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowSpec {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

/// What the presentation layer wants after drawing a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowEvent {
    Continue,
    /// The window was closed; the run should shut down.
    Close,
}

/// One presented frame: the two latest snapshots and how far between them
/// the display time lies.
#[derive(Debug, Clone)]
pub struct Frame {
    pub index: u64,
    /// Interpolation fraction in `[0, 1]` from `previous` to `current`.
    pub alpha: f64,
    /// Measured frames per second so far.
    pub fps: f64,
    pub snapshots: SnapshotPair,
}

impl Frame {
    pub fn current(&self) -> &SimulationSnapshot {
        &self.snapshots.current
    }

    /// Vehicle poses at display time. Vehicles present in both snapshots are
    /// blended; vehicles that just appeared are shown where they are, and
    /// vehicles that left are not shown.
    pub fn interpolate(&self) -> Vec<VehicleVisual> {
        let alpha = self.alpha.clamp(0.0, 1.0);
        let previous = &self.snapshots.previous.vehicles;
        self.snapshots
            .current
            .vehicles
            .values()
            .map(|current| match previous.get(&current.id) {
                Some(before) => VehicleVisual {
                    position: before.position.lerp(&current.position, alpha),
                    heading: before.heading + angle_difference(before.heading, current.heading) * alpha,
                    speed: before.speed + (current.speed - before.speed) * alpha,
                    ..*current
                },
                None => *current,
            })
            .collect()
    }
}

/// Draws frames. The render loop calls `open` once, `draw` at the target
/// rate until it returns [`WindowEvent::Close`], then `finish`.
pub trait Renderer {
    fn open(&mut self, _window: &WindowSpec, _geometry: &RoadGeometry) -> Result<(), RenderError> {
        Ok(())
    }

    fn draw(&mut self, frame: &Frame) -> Result<WindowEvent, RenderError>;

    fn finish(&mut self, _summary: &RunSummary) -> Result<(), RenderError> {
        Ok(())
    }
}

/// Heatmap ramp: green when free-flowing, yellow at half capacity, red when
/// congested.
pub fn congestion_color(level: f64) -> (u8, u8, u8) {
    const LOW: (f64, f64, f64) = (40.0, 180.0, 60.0);
    const MEDIUM: (f64, f64, f64) = (240.0, 200.0, 40.0);
    const HIGH: (f64, f64, f64) = (220.0, 40.0, 40.0);

    let level = if level.is_finite() { level.clamp(0.0, 1.0) } else { 0.0 };
    let (from, to, t) = if level < 0.5 {
        (LOW, MEDIUM, level * 2.0)
    } else {
        (MEDIUM, HIGH, (level - 0.5) * 2.0)
    };
    let mix = |a: f64, b: f64| (a + (b - a) * t).round() as u8;
    (mix(from.0, to.0), mix(from.1, to.1), mix(from.2, to.2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared_data::Bounds;
    use crate::simulation_engine::lanes::{LaneId, Point};
    use crate::simulation_engine::vehicles::VehicleType;
    use approx::assert_abs_diff_eq;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn visual(id: u64, x: f64, heading: f64) -> VehicleVisual {
        VehicleVisual {
            id,
            vehicle_type: VehicleType::Car,
            lane: LaneId(0),
            position: Point::new(x, 0.0),
            heading,
            speed: 10.0,
            length: 4.5,
        }
    }

    fn snapshot(tick: u64, vehicles: &[VehicleVisual]) -> SimulationSnapshot {
        SimulationSnapshot {
            tick,
            sim_time: tick as f64 * 0.1,
            vehicles: vehicles.iter().map(|v| (v.id, *v)).collect::<BTreeMap<_, _>>(),
            signals: Vec::new(),
            congestion: Vec::new(),
            active_vehicles: vehicles.len(),
            pending_vehicles: 0,
            completed_vehicles: 0,
            alerts_raised: 0,
            geometry: Arc::new(RoadGeometry {
                segments: Vec::new(),
                junctions: Vec::new(),
                bounds: Bounds::empty(),
                lane_width: 3.5,
            }),
        }
    }

    #[test]
    fn interpolates_between_snapshots() {
        let pair = SnapshotPair::initial(snapshot(0, &[visual(1, 0.0, 0.0), visual(2, 5.0, 0.0)]))
            .advance(snapshot(1, &[visual(1, 10.0, 0.0), visual(3, 7.0, 0.0)]));
        let frame = Frame {
            index: 0,
            alpha: 0.25,
            fps: 60.0,
            snapshots: pair,
        };
        let vehicles = frame.interpolate();
        assert_eq!(vehicles.len(), 2);
        assert_abs_diff_eq!(vehicles[0].position.x, 2.5, epsilon = 1e-12);
        assert_abs_diff_eq!(vehicles[1].position.x, 7.0, epsilon = 1e-12);
    }

    #[test]
    fn heading_blend_takes_short_way_round() {
        let pi = std::f64::consts::PI;
        let pair = SnapshotPair::initial(snapshot(0, &[visual(1, 0.0, pi - 0.1)]))
            .advance(snapshot(1, &[visual(1, 0.0, -pi + 0.1)]));
        let frame = Frame {
            index: 0,
            alpha: 0.5,
            fps: 0.0,
            snapshots: pair,
        };
        let heading = frame.interpolate()[0].heading;
        assert_abs_diff_eq!(heading.cos(), -1.0, epsilon = 1e-9);
    }

    #[test]
    fn colour_ramp_endpoints() {
        assert_eq!(congestion_color(0.0), (40, 180, 60));
        assert_eq!(congestion_color(0.5), (240, 200, 40));
        assert_eq!(congestion_color(1.0), (220, 40, 40));
        assert_eq!(congestion_color(7.0), congestion_color(1.0));
        assert_eq!(congestion_color(f64::NAN), congestion_color(0.0));
    }
}
