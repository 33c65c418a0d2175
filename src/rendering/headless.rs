use crate::engine::RunSummary;
use crate::error::RenderError;
use crate::rendering::{Frame, Renderer, WindowEvent, WindowSpec};
use crate::shared_data::RoadGeometry;

/// Renderer without a display. Closes its "window" after `max_frames`
/// frames, or once nothing is left to simulate.
#[derive(Debug, Clone)]
pub struct HeadlessRenderer {
    max_frames: Option<u64>,
    close_when_idle: bool,
    frames: u64,
    last_tick: u64,
    peak_vehicles: usize,
}

impl HeadlessRenderer {
    pub fn new(max_frames: Option<u64>) -> Self {
        Self {
            max_frames,
            close_when_idle: true,
            frames: 0,
            last_tick: 0,
            peak_vehicles: 0,
        }
    }

    /// Keeps running after the simulation has gone idle.
    pub fn keep_open_when_idle(mut self) -> Self {
        self.close_when_idle = false;
        self
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn last_tick(&self) -> u64 {
        self.last_tick
    }

    pub fn peak_vehicles(&self) -> usize {
        self.peak_vehicles
    }
}

impl Default for HeadlessRenderer {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Renderer for HeadlessRenderer {
    fn open(&mut self, window: &WindowSpec, geometry: &RoadGeometry) -> Result<(), RenderError> {
        log::info!(
            "Headless window \"{}\" ({}x{}), {} road segments",
            window.title,
            window.width,
            window.height,
            geometry.segments.len()
        );
        Ok(())
    }

    fn draw(&mut self, frame: &Frame) -> Result<WindowEvent, RenderError> {
        self.frames += 1;
        let snapshot = frame.current();
        self.last_tick = snapshot.tick;
        self.peak_vehicles = self.peak_vehicles.max(snapshot.vehicles.len());

        let limit_reached = self.max_frames.is_some_and(|max| self.frames >= max);
        // Tick 0 is the state before anything spawned.
        let idle = self.close_when_idle && snapshot.tick > 0 && snapshot.is_idle();
        Ok(if limit_reached || idle {
            WindowEvent::Close
        } else {
            WindowEvent::Continue
        })
    }

    fn finish(&mut self, summary: &RunSummary) -> Result<(), RenderError> {
        log::info!(
            "Headless run finished: {} frames, peak {} vehicles on screen, {} completed",
            self.frames,
            self.peak_vehicles,
            summary.completed
        );
        Ok(())
    }
}
