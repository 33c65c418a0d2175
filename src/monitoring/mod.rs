pub mod traffic_monitoring_system;

pub use traffic_monitoring_system::{Alert, AlertKind, AlertManager};
