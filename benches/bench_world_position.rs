use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::fmt::Write;

use trafficflowviz::simulation_engine::road_network::RoadNetwork;
use trafficflowviz::SimConfig;

/// One two-way road whose polyline has `points` vertices.
fn winding_road(points: usize) -> String {
    let mut geometry = String::new();
    for i in 0..points {
        if i > 0 {
            geometry.push(';');
        }
        let y = if i % 2 == 0 { 0.0 } else { 5.0 };
        let _ = write!(geometry, "{} {}", i * 10, y);
    }
    format!("id,geometry,lane_count,speed_limit,oneway\nW,{geometry},2,14,0\n")
}

fn bench_world_position(c: &mut Criterion) {
    let config = SimConfig::default();
    let mut group = c.benchmark_group("World_Position");

    for &points in [2usize, 50, 500].iter() {
        let network = RoadNetwork::from_reader(winding_road(points).as_bytes(), &config)
            .expect("bench road table");
        let forward = network.lane_by_key("W:0").expect("lane W:0");
        let reverse = network.lane_by_key("W:r1").expect("lane W:r1");
        let length = network.lane(forward).map_or(0.0, |lane| lane.length());

        group.bench_with_input(BenchmarkId::new("forward", points), &points, |b, _| {
            let mut s = 0.0;
            b.iter(|| {
                s = (s + 3.7) % length;
                black_box(network.world_position(forward, black_box(s)))
            });
        });
        group.bench_with_input(BenchmarkId::new("reverse_offset", points), &points, |b, _| {
            let mut s = 0.0;
            b.iter(|| {
                s = (s + 3.7) % length;
                black_box(network.world_position(reverse, black_box(s)))
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_world_position);
criterion_main!(benches);
