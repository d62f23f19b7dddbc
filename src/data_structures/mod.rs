//! Engine data structures: transforms, geometry buffers and scene graphs.
//!
//! - `transform` holds per-node position, rotation and scale
//! - `model` contains ledger-tracked geometry buffers and assembled parts
//! - `scene_graph` enables hierarchical scene organization and finalization

pub mod model;
pub mod scene_graph;
pub mod transform;
