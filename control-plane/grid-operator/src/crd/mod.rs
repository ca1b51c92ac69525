pub mod grid_cluster;

pub use grid_cluster::*;
