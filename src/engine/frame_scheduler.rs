//! Converts elapsed wall time into whole simulation ticks.

use std::time::Duration;

use crate::config::SimulationParams;

/// Ticks to run for one batch, and how far the leftover time reaches into
/// the next tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickBudget {
    pub ticks: u32,
    /// Fraction of a tick left in the accumulator, in `[0, 1)`.
    pub alpha: f64,
}

/// Fixed-step accumulator. Scaled wall time goes in, whole Δt steps come
/// out; anything beyond `max_ticks_per_batch` steps is dropped so a slow
/// frame never triggers a catch-up spiral.
#[derive(Debug, Clone)]
pub struct FrameScheduler {
    tick_seconds: f64,
    time_scale: f64,
    max_ticks_per_batch: u32,
    accumulator: f64,
    dropped_seconds: f64,
}

impl FrameScheduler {
    pub fn new(tick_seconds: f64, time_scale: f64, max_ticks_per_batch: u32) -> Self {
        Self {
            tick_seconds,
            time_scale,
            max_ticks_per_batch,
            accumulator: 0.0,
            dropped_seconds: 0.0,
        }
    }

    pub fn from_params(params: &SimulationParams) -> Self {
        Self::new(
            params.tick_seconds,
            params.time_scale,
            params.max_ticks_per_batch,
        )
    }

    pub fn tick_seconds(&self) -> f64 {
        self.tick_seconds
    }

    pub fn time_scale(&self) -> f64 {
        self.time_scale
    }

    /// Simulated time discarded because batches were full.
    pub fn dropped_seconds(&self) -> f64 {
        self.dropped_seconds
    }

    pub fn alpha(&self) -> f64 {
        if self.tick_seconds > 0.0 {
            (self.accumulator / self.tick_seconds).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    /// Adds `elapsed` wall time and takes out as many whole ticks as fit.
    pub fn advance(&mut self, elapsed: Duration) -> TickBudget {
        if self.tick_seconds <= 0.0 {
            return TickBudget {
                ticks: 0,
                alpha: 0.0,
            };
        }
        self.accumulator += elapsed.as_secs_f64() * self.time_scale;

        let max = self.tick_seconds * self.max_ticks_per_batch as f64;
        if self.accumulator > max {
            self.dropped_seconds += self.accumulator - max;
            self.accumulator = max;
        }

        let mut ticks = 0;
        // Absorb rounding so 3 x 0.05 s yields 3 ticks, not 2.
        while self.accumulator + 1e-9 >= self.tick_seconds && ticks < self.max_ticks_per_batch {
            self.accumulator = (self.accumulator - self.tick_seconds).max(0.0);
            ticks += 1;
        }

        TickBudget {
            ticks,
            alpha: self.alpha().min(1.0 - f64::EPSILON),
        }
    }
}
