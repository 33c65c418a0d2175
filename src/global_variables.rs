// Simulation clock
pub const DEFAULT_TICK_SECONDS: f64 = 0.05;
pub const DEFAULT_TIME_SCALE: f64 = 1.0;
pub const DEFAULT_MAX_TICKS_PER_BATCH: u32 = 10;
pub const DEFAULT_SEED: u64 = 1;

// Render clock
pub const DEFAULT_TARGET_FPS: f64 = 60.0;

// Road geometry (world units)
pub const DEFAULT_SNAP_TOLERANCE: f64 = 0.5;
pub const DEFAULT_LANE_WIDTH: f64 = 3.5;
pub const DEFAULT_MIN_SEGMENT_LENGTH: f64 = 0.1;

// Driver model
pub const DEFAULT_MAX_ACCELERATION: f64 = 1.5;
pub const DEFAULT_COMFORTABLE_DECELERATION: f64 = 2.0;
pub const DEFAULT_MAX_DECELERATION: f64 = 9.0;
pub const DEFAULT_MIN_GAP: f64 = 2.0;
pub const DEFAULT_TIME_HEADWAY: f64 = 1.2;
pub const DEFAULT_ACCELERATION_EXPONENT: f64 = 4.0;
pub const DEFAULT_LOOKAHEAD: f64 = 150.0;
pub const DEFAULT_SPAWN_CLEARANCE: f64 = 2.0;
pub const SEPARATION_EPSILON: f64 = 0.01;

// Junction control (seconds)
pub const DEFAULT_GREEN_SECONDS: f64 = 10.0;
pub const DEFAULT_YELLOW_SECONDS: f64 = 3.0;

// Monitoring
pub const DEFAULT_STATS_INTERVAL: f64 = 1.0;
pub const STATS_HISTORY_CAPACITY: usize = 60;
pub const DEFAULT_CONGESTION_THRESHOLD: f64 = 0.7;
pub const DEFAULT_SPEED_VIOLATION_RATIO: f64 = 1.5;
pub const DEFAULT_SLOWDOWN_RATIO: f64 = 0.5;
pub const MAX_ALERTS: usize = 100;
/// One vehicle per this many world units of lane counts as full capacity.
pub const CAPACITY_SPACING: f64 = 10.0;
