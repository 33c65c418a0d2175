pub mod traffic_analyzer;

pub use traffic_analyzer::{
    collect_traffic_data, congestion_level, SegmentSample, SegmentStatistics, TrafficAnalyzer,
    TrafficData,
};
