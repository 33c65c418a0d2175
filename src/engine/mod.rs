pub mod frame_scheduler;
pub mod orchestrator;

pub use frame_scheduler::{FrameScheduler, TickBudget};
pub use orchestrator::{Engine, RunSummary};
