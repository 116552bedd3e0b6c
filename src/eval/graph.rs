// eval/graph.rs — Node/edge graph → indexed, evaluable graph
//
// Parses the flat { nodes, edges } format produced by the graph editor into
// dense per-node vectors: resolved input slots, type tags and precompiled
// curve tables. The graph is immutable once built and shared by every
// evaluation context that samples it.

use crate::error::GraphError;
use crate::eval::compiled::{classify_handle, HandleKind, ResolvedInputs};
use crate::eval::curves::{curve_kind, SampledCurve};
use crate::eval::node_type::DensityType;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Field map of a node: parameter name → JSON value.
pub type Fields = HashMap<String, Value>;

/// A node as sent by the editor. Only `id` and `data` are interpreted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub data: NodeData,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub node_type: Option<String>,
}

/// The `data` payload of a node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeData {
    /// Density function type, e.g. "SimplexNoise2D", "Constant", "Sum"
    #[serde(rename = "type", default)]
    pub density_type: Option<String>,

    #[serde(default)]
    pub fields: Fields,

    /// User-designated output node flag
    #[serde(rename = "_outputNode", default)]
    pub is_output: bool,

    /// Output slot tag (e.g. "Terrain")
    #[serde(rename = "_biomeField", default, skip_serializing_if = "Option::is_none")]
    pub biome_field: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    #[serde(rename = "targetHandle", default)]
    pub target_handle: Option<String>,
}

impl GraphNode {
    pub fn type_name(&self) -> &str {
        self.data.density_type.as_deref().unwrap_or("")
    }
}

// ── Field access ────────────────────────────────────────────────────

/// Numeric coercion of a field value: numbers as-is, booleans as 0/1,
/// numeric strings parsed (blank is 0), everything else NaN.
pub fn coerce_number(v: &Value) -> f64 {
    match v {
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        Value::String(s) => {
            let t = s.trim();
            if t.is_empty() {
                0.0
            } else {
                t.parse().unwrap_or(f64::NAN)
            }
        }
        _ => f64::NAN,
    }
}

fn present(v: Option<&Value>) -> Option<&Value> {
    v.filter(|v| !v.is_null())
}

/// `fields[key]` as a number, `default` when missing or null.
pub fn field_number(fields: &Fields, key: &str, default: f64) -> f64 {
    present(fields.get(key)).map_or(default, coerce_number)
}

/// Like [`field_number`] but a zero (or NaN) result also yields `default`.
pub fn field_nonzero(fields: &Fields, key: &str, default: f64) -> f64 {
    nonzero_or(field_number(fields, key, default), default)
}

/// `fields[key][sub]` as a number, `default` when any level is missing.
pub fn nested_number(fields: &Fields, key: &str, sub: &str, default: f64) -> f64 {
    present(fields.get(key))
        .and_then(|obj| present(obj.get(sub)))
        .map_or(default, coerce_number)
}

/// Three components `x`/`y`/`z` of a vector field.
pub fn field_vec3(fields: &Fields, key: &str, default: [f64; 3]) -> [f64; 3] {
    [
        nested_number(fields, key, "x", default[0]),
        nested_number(fields, key, "y", default[1]),
        nested_number(fields, key, "z", default[2]),
    ]
}

/// `(Min, Max)` of a range object field.
pub fn field_range(fields: &Fields, key: &str, default: (f64, f64)) -> (f64, f64) {
    (
        nested_number(fields, key, "Min", default.0),
        nested_number(fields, key, "Max", default.1),
    )
}

pub fn field_str<'a>(fields: &'a Fields, key: &str) -> Option<&'a str> {
    fields.get(key).and_then(Value::as_str)
}

#[inline]
pub fn nonzero_or(v: f64, default: f64) -> f64 {
    if v == 0.0 || v.is_nan() {
        default
    } else {
        v
    }
}

// ── Root resolution ─────────────────────────────────────────────────

/// Pick the node evaluation starts from. Returns an index into `nodes`.
///
/// Order:
///   0. `explicit` id, when it names an existing node
///   1. the first node flagged `_outputNode`
///   2. the first node tagged `_biomeField == "Terrain"`
///   3. the first terminal node (no outgoing edges) accepted by `is_candidate`
///   4. the first node anywhere accepted by `is_candidate`
///
/// Shared by every evaluator that sweeps a graph; `is_candidate` decides which
/// node types belong to that evaluator.
pub fn resolve_root(
    nodes: &[GraphNode],
    edges: &[GraphEdge],
    explicit: Option<&str>,
    is_candidate: impl Fn(&GraphNode) -> bool,
) -> Option<usize> {
    if let Some(id) = explicit {
        if let Some(i) = nodes.iter().position(|n| n.id == id) {
            return Some(i);
        }
    }
    if let Some(i) = nodes.iter().position(|n| n.data.is_output) {
        return Some(i);
    }
    if let Some(i) = nodes
        .iter()
        .position(|n| n.data.biome_field.as_deref() == Some("Terrain"))
    {
        return Some(i);
    }
    let has_outgoing: FxHashSet<&str> = edges.iter().map(|e| e.source.as_str()).collect();
    nodes
        .iter()
        .position(|n| !has_outgoing.contains(n.id.as_str()) && is_candidate(n))
        .or_else(|| nodes.iter().position(&is_candidate))
}

// ── EvalGraph ───────────────────────────────────────────────────────

/// Parsed, indexed graph ready for evaluation. Per-node data lives in
/// parallel vectors indexed by the node's position in `nodes`.
pub struct EvalGraph {
    pub nodes: Vec<GraphNode>,
    id_to_idx: FxHashMap<String, usize>,
    /// Per-node input slots.
    pub resolved: Vec<ResolvedInputs>,
    /// Per-node type tag.
    pub kinds: Vec<DensityType>,
    /// Per-node compiled control-point curve (manual curve nodes and
    /// SplineFunction).
    pub curves: Vec<Option<SampledCurve>>,
    pub root_idx: usize,
    pub root_id: String,
}

impl EvalGraph {
    /// Build an `EvalGraph` from raw nodes and edges.
    ///
    /// When several nodes share an id, the last one is the one edges and the
    /// root refer to. Edges naming unknown nodes or handles are dropped.
    pub fn from_raw(
        nodes: Vec<GraphNode>,
        edges: Vec<GraphEdge>,
        root_node_id: Option<&str>,
    ) -> Result<Self, GraphError> {
        if nodes.is_empty() {
            return Err(GraphError::EmptyGraph);
        }

        let root_pos = resolve_root(&nodes, &edges, root_node_id, |n| {
            DensityType::parse(n.type_name()).is_density()
        })
        .ok_or(GraphError::NoRoot)?;
        let root_id = nodes[root_pos].id.clone();

        let mut id_to_idx = FxHashMap::default();
        for (i, node) in nodes.iter().enumerate() {
            id_to_idx.insert(node.id.clone(), i);
        }
        let root_idx = id_to_idx.get(&root_id).copied().unwrap_or(root_pos);

        let mut resolved = vec![ResolvedInputs::new(); nodes.len()];
        for edge in &edges {
            let (Some(&src), Some(&dst)) =
                (id_to_idx.get(&edge.source), id_to_idx.get(&edge.target))
            else {
                log::trace!("dropping dangling edge {} -> {}", edge.source, edge.target);
                continue;
            };
            let handle = edge.target_handle.as_deref().unwrap_or("Input");
            if !resolved[dst].connect(classify_handle(handle), src) {
                log::trace!("ignoring unrecognised handle {handle:?} on node {}", edge.target);
            }
        }

        let kinds = nodes
            .iter()
            .map(|n| DensityType::parse(n.type_name()))
            .collect();

        let curves = nodes
            .iter()
            .map(|n| {
                let compiles =
                    n.type_name() == "SplineFunction" || curve_kind(n.type_name()) == "Manual";
                if compiles {
                    SampledCurve::from_points(n.data.fields.get("Points"))
                } else {
                    None
                }
            })
            .collect();

        Ok(EvalGraph {
            nodes,
            id_to_idx,
            resolved,
            kinds,
            curves,
            root_idx,
            root_id,
        })
    }

    #[inline]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Dense index for a node id.
    #[inline]
    pub fn idx_of(&self, id: &str) -> Option<usize> {
        self.id_to_idx.get(id).copied()
    }

    #[inline]
    pub fn fields(&self, idx: usize) -> &Fields {
        &self.nodes[idx].data.fields
    }
}
