// route_generation.rs
//
// Routes are sequences of lane ids. Vehicles without an explicit route get
// the shortest one (by lane length) from their current lane to any sink
// lane, searched with Dijkstra. Ties between equal-length routes go to the
// lower lane id so repeated runs pick the same path.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use crate::simulation_engine::lanes::LaneId;
use crate::simulation_engine::road_network::RoadNetwork;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Frontier {
    cost: f64,
    lane: LaneId,
}

impl Eq for Frontier {}

impl Ord for Frontier {
    // Reversed so the max-heap pops the cheapest entry first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.lane.cmp(&self.lane))
    }
}

impl PartialOrd for Frontier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Shortest route from `start` to a sink lane (see [`RoadNetwork::is_sink`]),
/// `start` included. Returns `None` when no sink is reachable.
pub fn shortest_route_to_sink(network: &RoadNetwork, start: LaneId) -> Option<Vec<LaneId>> {
    network.lane(start)?;

    let mut best: HashMap<LaneId, f64> = HashMap::new();
    let mut came_from: HashMap<LaneId, LaneId> = HashMap::new();
    let mut heap = BinaryHeap::new();
    best.insert(start, 0.0);
    heap.push(Frontier {
        cost: 0.0,
        lane: start,
    });

    while let Some(Frontier { cost, lane }) = heap.pop() {
        if best.get(&lane).is_some_and(|&known| cost > known) {
            continue;
        }
        if network.is_sink(lane) {
            return Some(reconstruct(&came_from, start, lane));
        }
        for &next in network.successors(lane) {
            let Some(next_lane) = network.lane(next) else {
                continue;
            };
            let next_cost = cost + next_lane.length();
            let improves = best.get(&next).map_or(true, |&known| next_cost < known);
            if improves {
                best.insert(next, next_cost);
                came_from.insert(next, lane);
                heap.push(Frontier {
                    cost: next_cost,
                    lane: next,
                });
            }
        }
    }
    None
}

fn reconstruct(came_from: &HashMap<LaneId, LaneId>, start: LaneId, end: LaneId) -> Vec<LaneId> {
    let mut path = vec![end];
    let mut current = end;
    while current != start {
        match came_from.get(&current) {
            Some(&previous) => {
                path.push(previous);
                current = previous;
            }
            None => break,
        }
    }
    path.reverse();
    path
}
