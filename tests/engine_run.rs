use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use trafficflowviz::rendering::{HeadlessRenderer, PlotRenderer};
use trafficflowviz::{ConfigurationError, Engine, EngineError, FormatError, SimConfig};

const ROADS: &str = "id,geometry,lane_count,speed_limit,oneway\n\
A,0 0;100 0,1,10,1\n\
B,100 0;160 0,1,10,1\n";

fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    path
}

fn fast_config() -> SimConfig {
    let mut config = SimConfig::default();
    config.simulation.time_scale = 40.0;
    config
}

fn engine(dir: &Path, vehicles: &str) -> Engine {
    let mut engine = Engine::new("test", 320, 240).unwrap();
    engine.set_road_csv(write(dir, "roads.csv", ROADS)).unwrap();
    engine.set_csv(write(dir, "vehicles.csv", vehicles)).unwrap();
    engine.set_config(fast_config()).unwrap();
    engine
}

#[test]
fn runs_until_every_vehicle_leaves() {
    let dir = TempDir::new().unwrap();
    let mut engine = engine(
        dir.path(),
        "id,lane_id,position,speed,length\n1,A,10,5,4.5\n2,A,30,5,4.5\n",
    );
    engine
        .set_renderer(Box::new(HeadlessRenderer::new(Some(3_000))))
        .unwrap();

    let summary = engine.run().unwrap();
    assert_eq!(summary.completed, 2);
    assert_eq!(summary.halted, 0);
    assert!(summary.issues.is_empty());
    assert!(summary.ticks > 0);
    assert!(summary.sim_time > 0.0);
    assert!(summary.frames > 0);
    assert!(engine.is_started());
}

#[test]
fn bad_rows_are_reported_not_fatal() {
    let dir = TempDir::new().unwrap();
    let mut engine = engine(
        dir.path(),
        "id,lane_id,position,speed,length\n1,A,10,5,4.5\n2,Nowhere,5,0,4.5\n3,A,abc,0,4.5\n",
    );
    engine
        .set_renderer(Box::new(HeadlessRenderer::new(Some(3_000))))
        .unwrap();

    let summary = engine.run().unwrap();
    assert_eq!(summary.completed, 1);
}

#[test]
fn frame_limit_closes_the_window() {
    let dir = TempDir::new().unwrap();
    let mut engine = engine(dir.path(), "id,lane_id,position,speed,length\n1,A,10,0,4.5\n");
    let mut config = SimConfig::default();
    config.simulation.time_scale = 0.01;
    engine.set_config(config).unwrap();
    engine
        .set_renderer(Box::new(HeadlessRenderer::new(Some(3))))
        .unwrap();

    let summary = engine.run().unwrap();
    assert_eq!(summary.frames, 3);
    assert_eq!(summary.completed, 0);
}

#[test]
fn missing_road_file_is_a_format_error() {
    let dir = TempDir::new().unwrap();
    let mut engine = Engine::new("test", 320, 240).unwrap();
    engine.set_road_csv(dir.path().join("absent.csv")).unwrap();
    engine
        .set_csv(write(dir.path(), "vehicles.csv", "id,lane_id,position,speed,length\n"))
        .unwrap();

    assert!(matches!(
        engine.run(),
        Err(EngineError::Format(FormatError::Io { .. }))
    ));
}

#[test]
fn road_table_without_required_columns_is_rejected() {
    let dir = TempDir::new().unwrap();
    let mut engine = Engine::new("test", 320, 240).unwrap();
    engine
        .set_road_csv(write(dir.path(), "roads.csv", "id,lanes\nA,1\n"))
        .unwrap();
    engine
        .set_csv(write(dir.path(), "vehicles.csv", "id,lane_id,position,speed,length\n"))
        .unwrap();

    assert!(matches!(engine.run(), Err(EngineError::Format(_))));
}

#[test]
fn invalid_parameters_stop_the_run() {
    let dir = TempDir::new().unwrap();
    let mut engine = engine(dir.path(), "id,lane_id,position,speed,length\n1,A,10,0,4.5\n");
    let mut config = SimConfig::default();
    config.simulation.tick_seconds = 0.0;
    engine.set_config(config).unwrap();

    assert!(matches!(
        engine.run(),
        Err(EngineError::Configuration(ConfigurationError::InvalidParameter { .. }))
    ));
}

#[test]
fn unknown_speed_limit_segment_is_rejected() {
    let dir = TempDir::new().unwrap();
    let mut engine = engine(dir.path(), "id,lane_id,position,speed,length\n1,A,10,0,4.5\n");
    engine.set_speed_limit("Z", 5.0).unwrap();

    assert!(matches!(engine.run(), Err(EngineError::Configuration(_))));
}

#[test]
fn recording_writes_png_frames() {
    let dir = TempDir::new().unwrap();
    let frames = dir.path().join("frames");
    let mut engine = engine(dir.path(), "id,lane_id,position,speed,length\n1,A,10,5,4.5\n");
    engine
        .set_renderer(Box::new(
            PlotRenderer::new(&frames, 1).with_max_frames(Some(2)),
        ))
        .unwrap();

    let summary = engine.run().unwrap();
    assert_eq!(summary.frames, 2);
    assert!(frames.join("frame_00000000.png").exists());
}
