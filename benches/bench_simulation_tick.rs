use criterion::{
    black_box, criterion_group, criterion_main, AxisScale, BenchmarkId, Criterion,
    PlotConfiguration,
};
use std::fmt::Write;
use std::sync::Arc;

use trafficflowviz::simulation_engine::road_network::RoadNetwork;
use trafficflowviz::simulation_engine::simulation::TrafficSimulator;
use trafficflowviz::simulation_engine::vehicles::VehiclePopulation;
use trafficflowviz::SimConfig;

/// Three sides of a block of two-lane avenues, leaving through `Exit`.
const ROADS: &str = "id,geometry,lane_count,speed_limit,oneway\n\
North,0 0;1000 0,2,14,1\n\
East,1000 0;1000 1000,2,14,1\n\
South,1000 1000;0 1000,2,14,1\n\
Exit,0 1000;-1000 1000,2,14,1\n";

/// Spreads `count` vehicles evenly over the ring lanes.
fn vehicle_table(count: usize) -> String {
    let lanes = ["North:0", "North:1", "East:0", "East:1", "South:0", "South:1", "Exit:0", "Exit:1"];
    let per_lane = count.div_ceil(lanes.len()).max(1);
    let spacing = 990.0 / per_lane as f64;
    let mut table = String::from("id,lane_id,position,speed,length\n");
    for id in 0..count {
        let lane = lanes[id % lanes.len()];
        let slot = id / lanes.len();
        let position = 5.0 + slot as f64 * spacing;
        let _ = writeln!(table, "{id},{lane},{position:.2},8,4.5");
    }
    table
}

fn build(count: usize) -> TrafficSimulator {
    let config = SimConfig::default();
    let network = Arc::new(
        RoadNetwork::from_reader(ROADS.as_bytes(), &config).expect("bench road table"),
    );
    let population =
        VehiclePopulation::from_reader(vehicle_table(count).as_bytes(), &network, &config)
            .expect("bench vehicle table");
    TrafficSimulator::new(network, population, &config)
}

/// Measures one fixed step for growing populations.
fn bench_tick(c: &mut Criterion) {
    let populations = [50, 200, 800];

    let mut group = c.benchmark_group("Simulation_Tick");
    group.plot_config(PlotConfiguration::default().summary_scale(AxisScale::Linear));

    for &count in populations.iter() {
        group.bench_with_input(BenchmarkId::new("tick", count), &count, |b, &count| {
            let mut sim = build(count);
            b.iter(|| {
                sim.tick();
                black_box(sim.ticks());
            });
        });

        group.bench_with_input(BenchmarkId::new("snapshot", count), &count, |b, &count| {
            let mut sim = build(count);
            sim.run_for(1.0);
            b.iter(|| black_box(sim.snapshot()));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_tick);
criterion_main!(benches);
