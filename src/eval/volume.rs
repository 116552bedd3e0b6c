// eval/volume.rs — 3D volume evaluation with rayon parallelism
//
// Evaluates a density graph over an NxN XZ grid repeated across Y slices.
// Slices are evaluated in parallel, one `EvalContext` per rayon job.
// Downstream voxelization reads the buffer Y-major and treats >= 0 as solid.

use crate::eval::graph::{EvalGraph, GraphEdge, GraphNode};
use crate::eval::grid::Extent;
use crate::eval::nodes::EvalContext;
use crate::eval::EvaluationOptions;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// One volume sweep request. This is also the worker message shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeParams {
    pub nodes: Vec<GraphNode>,
    #[serde(default)]
    pub edges: Vec<GraphEdge>,
    pub resolution: u32,
    pub range_min: f64,
    pub range_max: f64,
    pub y_min: f64,
    pub y_max: f64,
    pub y_slices: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_node_id: Option<String>,
    #[serde(default)]
    pub options: EvaluationOptions,
}

/// Result of evaluating a density graph over a 3D volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeResult {
    /// Y-major layout: `densities[y * n * n + z * n + x]`.
    pub densities: Vec<f32>,
    pub resolution: u32,
    pub y_slices: u32,
    pub min_value: f64,
    pub max_value: f64,
}

impl VolumeResult {
    pub fn zeroed(resolution: u32, y_slices: u32) -> Self {
        let n = resolution.max(1);
        let ys = y_slices.max(1);
        VolumeResult {
            densities: vec![0.0; n as usize * n as usize * ys as usize],
            resolution: n,
            y_slices: ys,
            min_value: 0.0,
            max_value: 0.0,
        }
    }

    /// Linear index of sample `(x, y, z)`.
    #[inline]
    pub fn index(&self, x: usize, y: usize, z: usize) -> usize {
        let n = self.resolution as usize;
        y * n * n + z * n + x
    }
}

/// Evaluate a compiled graph over a 3D volume.
///
/// X and Z step by `(range_max - range_min) / n` from `range_min`; Y steps
/// from `y_min` to `y_max` inclusive across `y_slices` (a single slice sits
/// at `y_min`).
#[allow(clippy::too_many_arguments)]
pub fn evaluate_volume(
    graph: &EvalGraph,
    options: &EvaluationOptions,
    resolution: u32,
    range_min: f64,
    range_max: f64,
    y_min: f64,
    y_max: f64,
    y_slices: u32,
) -> VolumeResult {
    let resolution = resolution.max(1);
    let y_slices = y_slices.max(1);
    let n = resolution as usize;
    let ys = y_slices as usize;
    let step_xz = (range_max - range_min) / n as f64;
    let step_y = if ys > 1 {
        (y_max - y_min) / (ys as f64 - 1.0)
    } else {
        0.0
    };

    let slices: Vec<(Vec<f32>, Extent)> = (0..ys)
        .into_par_iter()
        .map_init(
            || EvalContext::new(graph, options),
            |ctx, yi| {
                let wy = y_min + yi as f64 * step_y;
                let mut slice = Vec::with_capacity(n * n);
                let mut extent = Extent::new();
                for zi in 0..n {
                    let wz = range_min + zi as f64 * step_xz;
                    for xi in 0..n {
                        let wx = range_min + xi as f64 * step_xz;
                        ctx.clear_memo();
                        let val = ctx.evaluate_root(wx, wy, wz);
                        extent.push(val);
                        slice.push(val as f32);
                    }
                }
                (slice, extent)
            },
        )
        .collect();

    let mut densities = Vec::with_capacity(n * n * ys);
    let mut extent = Extent::new();
    for (slice, slice_extent) in slices {
        extent = extent.merge(slice_extent);
        densities.extend(slice);
    }
    let (min_value, max_value) = extent.bounds();

    VolumeResult {
        densities,
        resolution,
        y_slices,
        min_value,
        max_value,
    }
}

/// Build a graph from raw nodes/edges and sweep the volume. Structural
/// failures yield an all-zero volume.
pub fn evaluate_density_volume(params: &VolumeParams) -> VolumeResult {
    let graph = match EvalGraph::from_raw(
        params.nodes.clone(),
        params.edges.clone(),
        params.root_node_id.as_deref(),
    ) {
        Ok(g) => g,
        Err(e) => {
            log::debug!("volume sweep skipped: {e}");
            return VolumeResult::zeroed(params.resolution, params.y_slices);
        }
    };
    evaluate_volume(
        &graph,
        &params.options,
        params.resolution,
        params.range_min,
        params.range_max,
        params.y_min,
        params.y_max,
        params.y_slices,
    )
}
