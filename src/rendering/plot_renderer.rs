//! Frame recorder drawing with plotters into PNG files.
//!
//! Only geometric primitives are drawn, so no font backend is needed.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use plotters::prelude::*;

use crate::engine::RunSummary;
use crate::error::RenderError;
use crate::rendering::{congestion_color, Frame, Renderer, WindowEvent, WindowSpec};
use crate::shared_data::{Bounds, RoadGeometry, VehicleVisual};
use crate::control_system::traffic_light_controller::LightState;
use crate::simulation_engine::lanes::Point;
use crate::simulation_engine::vehicles::VehicleType;

const BACKGROUND: RGBColor = RGBColor(245, 245, 240);
const JUNCTION: RGBColor = RGBColor(90, 90, 90);
const VEHICLE_WIDTH: f64 = 2.0;
const MARGIN: f64 = 10.0;

/// Maps world coordinates (y up) onto pixels (y down), preserving aspect.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewTransform {
    bounds: Bounds,
    scale: f64,
    offset_x: f64,
    offset_y: f64,
    height: f64,
}

impl ViewTransform {
    pub fn fit(bounds: &Bounds, width: u32, height: u32) -> Self {
        let bounds = if bounds.is_empty() {
            Bounds {
                min_x: 0.0,
                min_y: 0.0,
                max_x: 1.0,
                max_y: 1.0,
            }
        } else {
            bounds.padded(MARGIN)
        };
        let scale_x = width as f64 / bounds.width().max(1e-6);
        let scale_y = height as f64 / bounds.height().max(1e-6);
        let scale = scale_x.min(scale_y);
        Self {
            bounds,
            scale,
            offset_x: (width as f64 - bounds.width() * scale) / 2.0,
            offset_y: (height as f64 - bounds.height() * scale) / 2.0,
            height: height as f64,
        }
    }

    pub fn to_pixel(&self, point: &Point) -> (i32, i32) {
        let x = self.offset_x + (point.x - self.bounds.min_x) * self.scale;
        let y = self.height - (self.offset_y + (point.y - self.bounds.min_y) * self.scale);
        (x.round() as i32, y.round() as i32)
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }
}

/// Writes every `every_nth` frame as `frame_%08d.png` into a directory.
#[derive(Debug, Clone)]
pub struct PlotRenderer {
    output_dir: PathBuf,
    every_nth: u64,
    max_frames: Option<u64>,
    close_when_idle: bool,
    size: (u32, u32),
    view: Option<ViewTransform>,
    geometry: Option<Arc<RoadGeometry>>,
    frames: u64,
    written: u64,
}

impl PlotRenderer {
    pub fn new(output_dir: impl Into<PathBuf>, every_nth: u64) -> Self {
        Self {
            output_dir: output_dir.into(),
            every_nth: every_nth.max(1),
            max_frames: None,
            close_when_idle: true,
            size: (0, 0),
            view: None,
            geometry: None,
            frames: 0,
            written: 0,
        }
    }

    pub fn with_max_frames(mut self, max_frames: Option<u64>) -> Self {
        self.max_frames = max_frames;
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn frame_path(&self, index: u64) -> PathBuf {
        self.output_dir.join(format!("frame_{index:08}.png"))
    }

    fn render(&self, frame: &Frame, path: &Path) -> Result<(), RenderError> {
        let (Some(view), Some(geometry)) = (self.view, self.geometry.as_ref()) else {
            return Err(RenderError::Backend("renderer was not opened".to_string()));
        };
        let root = BitMapBackend::new(path, self.size).into_drawing_area();
        root.fill(&BACKGROUND).map_err(backend)?;

        let congestion = &frame.current().congestion;
        let road_width = (geometry.lane_width * view.scale()).max(1.0);
        for (index, segment) in geometry.segments.iter().enumerate() {
            let lanes = if segment.oneway {
                segment.lane_count
            } else {
                segment.lane_count * 2
            };
            let (r, g, b) = congestion_color(congestion.get(index).copied().unwrap_or(0.0));
            let style = ShapeStyle {
                color: RGBColor(r, g, b).to_rgba(),
                filled: false,
                stroke_width: (road_width * lanes as f64).round().max(1.0) as u32,
            };
            let points: Vec<(i32, i32)> = segment.points.iter().map(|p| view.to_pixel(p)).collect();
            root.draw(&PathElement::new(points, style)).map_err(backend)?;
        }

        let junction_radius = (road_width * 0.75).round().max(2.0) as i32;
        for junction in &geometry.junctions {
            root.draw(&Circle::new(view.to_pixel(junction), junction_radius, JUNCTION.filled()))
                .map_err(backend)?;
        }

        for signal in &frame.current().signals {
            let color = match signal.state {
                LightState::Green => GREEN,
                LightState::Yellow => YELLOW,
                LightState::Red => RED,
            };
            let radius = (road_width * 0.4).round().max(2.0) as i32;
            root.draw(&Circle::new(view.to_pixel(&signal.position), radius, color.filled()))
                .map_err(backend)?;
        }

        for vehicle in frame.interpolate() {
            let corners: Vec<(i32, i32)> = vehicle_outline(&vehicle)
                .iter()
                .map(|p| view.to_pixel(p))
                .collect();
            root.draw(&Polygon::new(corners, vehicle_color(vehicle.vehicle_type).filled()))
                .map_err(backend)?;
        }

        root.present().map_err(backend)?;
        Ok(())
    }
}

fn backend(error: impl std::fmt::Display) -> RenderError {
    RenderError::Backend(error.to_string())
}

fn vehicle_color(vehicle_type: VehicleType) -> RGBColor {
    match vehicle_type {
        VehicleType::Car => RGBColor(30, 90, 200),
        VehicleType::Bus => RGBColor(130, 60, 170),
        VehicleType::Truck => RGBColor(60, 60, 60),
        VehicleType::EmergencyVan => RGBColor(230, 30, 30),
    }
}

/// Rectangle covering the body: front bumper at `position`, extending
/// `length` back along the heading.
fn vehicle_outline(vehicle: &VehicleVisual) -> [Point; 4] {
    let (sin, cos) = vehicle.heading.sin_cos();
    let half = VEHICLE_WIDTH / 2.0;
    let front = vehicle.position;
    let rear = Point::new(front.x - cos * vehicle.length, front.y - sin * vehicle.length);
    let side = Point::new(-sin * half, cos * half);
    [
        Point::new(front.x + side.x, front.y + side.y),
        Point::new(front.x - side.x, front.y - side.y),
        Point::new(rear.x - side.x, rear.y - side.y),
        Point::new(rear.x + side.x, rear.y + side.y),
    ]
}

impl Renderer for PlotRenderer {
    fn open(&mut self, window: &WindowSpec, geometry: &RoadGeometry) -> Result<(), RenderError> {
        std::fs::create_dir_all(&self.output_dir).map_err(|source| RenderError::Io {
            path: self.output_dir.clone(),
            source,
        })?;
        self.size = (window.width, window.height);
        self.view = Some(ViewTransform::fit(&geometry.bounds, window.width, window.height));
        self.geometry = Some(Arc::new(geometry.clone()));
        log::info!(
            "Recording \"{}\" every {} frame(s) into {}",
            window.title,
            self.every_nth,
            self.output_dir.display()
        );
        Ok(())
    }

    fn draw(&mut self, frame: &Frame) -> Result<WindowEvent, RenderError> {
        if frame.index % self.every_nth == 0 {
            let path = self.frame_path(frame.index);
            self.render(frame, &path)?;
            self.written += 1;
        }
        self.frames += 1;

        let limit_reached = self.max_frames.is_some_and(|max| self.frames >= max);
        let snapshot = frame.current();
        let idle = self.close_when_idle && snapshot.tick > 0 && snapshot.is_idle();
        Ok(if limit_reached || idle {
            WindowEvent::Close
        } else {
            WindowEvent::Continue
        })
    }

    fn finish(&mut self, summary: &RunSummary) -> Result<(), RenderError> {
        log::info!(
            "Wrote {} frame(s) to {} over {:.1} simulated seconds",
            self.written,
            self.output_dir.display(),
            summary.sim_time
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared_data::{SegmentVisual, SimulationSnapshot, SnapshotPair};
    use crate::simulation_engine::lanes::LaneId;
    use std::collections::BTreeMap;

    fn geometry() -> RoadGeometry {
        let mut bounds = Bounds::empty();
        bounds.include(&Point::new(0.0, 0.0));
        bounds.include(&Point::new(100.0, 50.0));
        RoadGeometry {
            segments: vec![SegmentVisual {
                id: "A".to_string(),
                points: vec![Point::new(0.0, 0.0), Point::new(100.0, 50.0)],
                lane_count: 1,
                oneway: true,
            }],
            junctions: vec![Point::new(100.0, 50.0)],
            bounds,
            lane_width: 3.5,
        }
    }

    #[test]
    fn view_flips_y_axis() {
        let mut bounds = Bounds::empty();
        bounds.include(&Point::new(0.0, 0.0));
        bounds.include(&Point::new(80.0, 80.0));
        let view = ViewTransform::fit(&bounds, 100, 100);
        let (_, bottom) = view.to_pixel(&Point::new(0.0, 0.0));
        let (_, top) = view.to_pixel(&Point::new(0.0, 80.0));
        assert!(bottom > top);
        assert_eq!(view.to_pixel(&Point::new(-10.0, 90.0)), (0, 0));
    }

    #[test]
    fn writes_numbered_png_frames() {
        let dir = tempfile::tempdir().unwrap();
        let geometry = geometry();
        let mut renderer = PlotRenderer::new(dir.path().join("frames"), 2);
        let window = WindowSpec {
            title: "test".to_string(),
            width: 160,
            height: 90,
        };
        renderer.open(&window, &geometry).unwrap();

        let mut vehicles = BTreeMap::new();
        vehicles.insert(
            1,
            VehicleVisual {
                id: 1,
                vehicle_type: VehicleType::Bus,
                lane: LaneId(0),
                position: Point::new(50.0, 25.0),
                heading: 0.4,
                speed: 5.0,
                length: 12.0,
            },
        );
        let snapshot = SimulationSnapshot {
            tick: 1,
            sim_time: 0.05,
            vehicles,
            signals: Vec::new(),
            congestion: vec![0.3],
            active_vehicles: 1,
            pending_vehicles: 0,
            completed_vehicles: 0,
            alerts_raised: 0,
            geometry: Arc::new(geometry),
        };
        let pair = SnapshotPair::initial(snapshot);
        for index in 0..3 {
            let frame = Frame {
                index,
                alpha: 0.0,
                fps: 30.0,
                snapshots: pair.clone(),
            };
            assert_eq!(renderer.draw(&frame).unwrap(), WindowEvent::Continue);
        }
        assert_eq!(renderer.written(), 2);
        assert!(renderer.frame_path(0).exists());
        assert!(!renderer.frame_path(1).exists());
        assert!(dir.path().join("frames/frame_00000002.png").exists());
    }
}
