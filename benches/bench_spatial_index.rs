use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use trafficflowviz::simulation_engine::lanes::LaneId;
use trafficflowviz::simulation_engine::road_network::RoadNetwork;
use trafficflowviz::simulation_engine::spatial_index::SpatialIndex;
use trafficflowviz::SimConfig;

const ROADS: &str = "id,geometry,lane_count,speed_limit,oneway\n\
A,0 0;2000 0,1,14,1\n\
B,2000 0;4000 0,1,14,1\n";

/// Fills lane `A` with `count` vehicles spaced 7 m apart.
fn populated(network: &RoadNetwork, count: usize) -> SpatialIndex {
    let mut index = SpatialIndex::new(network.lanes().len());
    let lane = network.lane_by_key("A:0").expect("lane A:0");
    for id in 0..count {
        index.insert(id as u64, lane, 5.0 + id as f64 * 7.0, 4.5);
    }
    index
}

fn bench_queries(c: &mut Criterion) {
    let config = SimConfig::default();
    let network = RoadNetwork::from_reader(ROADS.as_bytes(), &config).expect("bench road table");
    let a = network.lane_by_key("A:0").expect("lane A:0");
    let b = network.lane_by_key("B:0").expect("lane B:0");
    let path: [LaneId; 2] = [a, b];

    let mut group = c.benchmark_group("Spatial_Index");
    for &count in [10usize, 100, 280].iter() {
        let index = populated(&network, count);
        group.bench_with_input(BenchmarkId::new("leader_ahead", count), &count, |bench, _| {
            bench.iter(|| {
                black_box(index.leader_ahead(&network, &path, black_box(3.0), None, 500.0))
            });
        });

        group.bench_with_input(BenchmarkId::new("update", count), &count, |bench, &count| {
            let mut index = populated(&network, count);
            let mut position = 0.5;
            bench.iter(|| {
                position = (position + 0.1) % 4.0;
                index.update(0, a, black_box(position));
            });
        });

        group.bench_with_input(BenchmarkId::new("is_clear", count), &count, |bench, _| {
            bench.iter(|| black_box(index.is_clear(&network, a, 1990.0, 4.5, 2.0)));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_queries);
criterion_main!(benches);
