// simulation_engine/mod.rs
pub mod intersections;
pub mod lanes;
pub mod movement;
pub mod road_network;
pub mod route_generation;
pub mod simulation;
pub mod spatial_index;
pub mod vehicles;
