// eval/grid.rs — 2D grid evaluation with rayon parallelism
//
// Evaluates a density graph over an NxN grid of world-space positions at a
// fixed Y level. Rows are evaluated in parallel; every rayon job owns its own
// `EvalContext` over the shared immutable graph, and the memo is cleared
// before each cell so the output matches a sequential sweep exactly.

use crate::eval::graph::{EvalGraph, GraphEdge, GraphNode};
use crate::eval::nodes::EvalContext;
use crate::eval::EvaluationOptions;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// One grid sweep request. This is also the worker message shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridParams {
    pub nodes: Vec<GraphNode>,
    #[serde(default)]
    pub edges: Vec<GraphEdge>,
    pub resolution: u32,
    pub range_min: f64,
    pub range_max: f64,
    pub y_level: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_node_id: Option<String>,
    #[serde(default)]
    pub options: EvaluationOptions,
}

/// Result of evaluating a density graph over a 2D grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridResult {
    /// Row-major: `values[row * n + col]`, row along Z, col along X.
    pub values: Vec<f32>,
    pub resolution: u32,
    pub min_value: f64,
    pub max_value: f64,
}

impl GridResult {
    /// All-zero buffer reported when the graph cannot be evaluated.
    pub fn zeroed(resolution: u32) -> Self {
        let n = resolution.max(1);
        GridResult {
            values: vec![0.0; n as usize * n as usize],
            resolution: n,
            min_value: 0.0,
            max_value: 0.0,
        }
    }
}

/// Running min/max over sampled values. NaN samples are ignored; an extent
/// that saw no finite bound reports 0.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Extent {
    min: f64,
    max: f64,
}

impl Extent {
    pub(crate) fn new() -> Self {
        Extent {
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    #[inline]
    pub(crate) fn push(&mut self, v: f64) {
        if v < self.min {
            self.min = v;
        }
        if v > self.max {
            self.max = v;
        }
    }

    /// Combine two extents. An extent that saw no finite sample is a no-op.
    pub(crate) fn merge(self, other: Extent) -> Self {
        Extent {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    pub(crate) fn bounds(self) -> (f64, f64) {
        let finite = |v: f64| if v.is_finite() { v } else { 0.0 };
        (finite(self.min), finite(self.max))
    }
}

/// Evaluate a compiled graph over an NxN grid.
///
/// Cell `(col, row)` samples `(min + col * step, y_level, min + row * step)`
/// with `step = (max - min) / n`, so the grid covers `[range_min, range_max)`.
pub fn evaluate_grid(
    graph: &EvalGraph,
    options: &EvaluationOptions,
    resolution: u32,
    range_min: f64,
    range_max: f64,
    y_level: f64,
) -> GridResult {
    let resolution = resolution.max(1);
    let n = resolution as usize;
    let step = (range_max - range_min) / n as f64;

    let rows: Vec<(Vec<f32>, Extent)> = (0..n)
        .into_par_iter()
        .map_init(
            || EvalContext::new(graph, options),
            |ctx, row| {
                let sz = range_min + row as f64 * step;
                let mut values = Vec::with_capacity(n);
                let mut extent = Extent::new();
                for col in 0..n {
                    let sx = range_min + col as f64 * step;
                    ctx.clear_memo();
                    let val = ctx.evaluate_root(sx, y_level, sz);
                    extent.push(val);
                    values.push(val as f32);
                }
                (values, extent)
            },
        )
        .collect();

    let mut values = Vec::with_capacity(n * n);
    let mut extent = Extent::new();
    for (row, row_extent) in rows {
        extent = extent.merge(row_extent);
        values.extend(row);
    }
    let (min_value, max_value) = extent.bounds();

    GridResult {
        values,
        resolution,
        min_value,
        max_value,
    }
}

/// Build a graph from raw nodes/edges and sweep it. An empty graph or one
/// without a usable root yields an all-zero grid.
pub fn evaluate_density_grid(params: &GridParams) -> GridResult {
    let graph = match EvalGraph::from_raw(
        params.nodes.clone(),
        params.edges.clone(),
        params.root_node_id.as_deref(),
    ) {
        Ok(g) => g,
        Err(e) => {
            log::debug!("grid sweep skipped: {e}");
            return GridResult::zeroed(params.resolution);
        }
    };
    evaluate_grid(
        &graph,
        &params.options,
        params.resolution,
        params.range_min,
        params.range_max,
        params.y_level,
    )
}
