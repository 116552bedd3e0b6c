//! Density graph evaluation for procedural terrain previews.
//!
//! A graph of noise, arithmetic and shape nodes is compiled once into an
//! [`EvalGraph`](eval::graph::EvalGraph) and sampled through an
//! [`EvalContext`](eval::nodes::EvalContext). The grid and volume drivers
//! sweep a graph over 2D heatmaps and Y-major 3D buffers, and the
//! [`worker`] module runs those sweeps on a background thread with
//! single-flight cancellation and a synchronous fallback.

pub mod error;
pub mod eval;
pub mod worker;

pub use error::{EvalError, GraphError, CANCELLED};
pub use eval::graph::{EvalGraph, GraphEdge, GraphNode, NodeData};
pub use eval::grid::{evaluate_density_grid, GridParams, GridResult};
pub use eval::nodes::EvalContext;
pub use eval::volume::{evaluate_density_volume, VolumeParams, VolumeResult};
pub use eval::EvaluationOptions;
pub use worker::{
    cancel_evaluation, cancel_volume_evaluation, evaluate_in_worker, evaluate_volume_in_worker,
    Pending, WorkerClient, WorkerConfig,
};
