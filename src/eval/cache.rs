// eval/cache.rs — LRU result cache with deterministic request hashing
//
// Caches sweep results keyed by a hash of the graph structure plus the sweep
// parameters. Results are stored behind `Arc` so a hit is a reference-count
// bump rather than a copy of a multi-megabyte buffer.

use crate::eval::graph::{GraphEdge, GraphNode};
use crate::eval::grid::GridParams;
use crate::eval::volume::VolumeParams;
use crate::eval::EvaluationOptions;
use lru::LruCache;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Content-addressed cache for one kind of sweep result.
pub struct ResultCache<T> {
    entries: Mutex<LruCache<u64, Arc<T>>>,
}

impl<T> ResultCache<T> {
    /// A capacity of 0 is treated as 1.
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(cap)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<u64, Arc<T>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: u64) -> Option<Arc<T>> {
        self.lock().get(&key).cloned()
    }

    pub fn put(&self, key: u64, result: T) {
        self.put_arc(key, Arc::new(result));
    }

    pub fn put_arc(&self, key: u64, result: Arc<T>) {
        self.lock().put(key, result);
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── Request hashing ────────────────────────────────────────────────

pub fn hash_grid_request(params: &GridParams) -> u64 {
    let mut hasher = DefaultHasher::new();
    // Discriminant so grid and volume keys never collide.
    "grid".hash(&mut hasher);
    hash_graph(&mut hasher, &params.nodes, &params.edges);
    params.resolution.hash(&mut hasher);
    params.range_min.to_bits().hash(&mut hasher);
    params.range_max.to_bits().hash(&mut hasher);
    params.y_level.to_bits().hash(&mut hasher);
    params.root_node_id.hash(&mut hasher);
    hash_options(&mut hasher, &params.options);
    hasher.finish()
}

pub fn hash_volume_request(params: &VolumeParams) -> u64 {
    let mut hasher = DefaultHasher::new();
    "volume".hash(&mut hasher);
    hash_graph(&mut hasher, &params.nodes, &params.edges);
    params.resolution.hash(&mut hasher);
    params.range_min.to_bits().hash(&mut hasher);
    params.range_max.to_bits().hash(&mut hasher);
    params.y_min.to_bits().hash(&mut hasher);
    params.y_max.to_bits().hash(&mut hasher);
    params.y_slices.hash(&mut hasher);
    params.root_node_id.hash(&mut hasher);
    hash_options(&mut hasher, &params.options);
    hasher.finish()
}

/// Nodes are visited sorted by id (stable, so duplicate ids keep their
/// relative order) with fields sorted by key; edges are sorted.
fn hash_graph(hasher: &mut DefaultHasher, nodes: &[GraphNode], edges: &[GraphEdge]) {
    let mut order: Vec<&GraphNode> = nodes.iter().collect();
    order.sort_by(|a, b| a.id.cmp(&b.id));

    order.len().hash(hasher);
    for node in order {
        node.id.hash(hasher);
        node.data.density_type.hash(hasher);

        let mut keys: Vec<&String> = node.data.fields.keys().collect();
        keys.sort();
        keys.len().hash(hasher);
        for key in keys {
            key.hash(hasher);
            // serde_json keeps object keys ordered, so this is canonical.
            node.data.fields[key].to_string().hash(hasher);
        }

        node.data.is_output.hash(hasher);
        node.data.biome_field.hash(hasher);
    }

    let mut sorted: Vec<(&str, &str, Option<&str>)> = edges
        .iter()
        .map(|e| (e.source.as_str(), e.target.as_str(), e.target_handle.as_deref()))
        .collect();
    sorted.sort();
    sorted.hash(hasher);
}

fn hash_options(hasher: &mut DefaultHasher, options: &EvaluationOptions) {
    let mut keys: Vec<&String> = options.content_fields.keys().collect();
    keys.sort();
    keys.len().hash(hasher);
    for key in keys {
        key.hash(hasher);
        options.content_fields[key].to_bits().hash(hasher);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::graph::NodeData;
    use crate::eval::grid::GridResult;
    use serde_json::{json, Value};

    fn make_node(id: &str, density_type: &str, fields: Value) -> GraphNode {
        GraphNode {
            id: id.to_string(),
            data: NodeData {
                density_type: Some(density_type.to_string()),
                fields: match fields {
                    Value::Object(m) => m.into_iter().collect(),
                    _ => Default::default(),
                },
                ..NodeData::default()
            },
            node_type: None,
        }
    }

    fn make_edge(source: &str, target: &str, handle: &str) -> GraphEdge {
        GraphEdge {
            source: source.to_string(),
            target: target.to_string(),
            target_handle: Some(handle.to_string()),
        }
    }

    fn grid(nodes: Vec<GraphNode>, edges: Vec<GraphEdge>) -> GridParams {
        GridParams {
            nodes,
            edges,
            resolution: 64,
            range_min: -64.0,
            range_max: 64.0,
            y_level: 64.0,
            root_node_id: Some("s".into()),
            options: EvaluationOptions::default(),
        }
    }

    fn sum_nodes() -> Vec<GraphNode> {
        vec![
            make_node("a", "Constant", json!({ "Value": 10 })),
            make_node("b", "Constant", json!({ "Value": 20 })),
            make_node("s", "Sum", json!({})),
        ]
    }

    fn sum_edges() -> Vec<GraphEdge> {
        vec![make_edge("a", "s", "Inputs[0]"), make_edge("b", "s", "Inputs[1]")]
    }

    fn result(v: f32) -> GridResult {
        GridResult {
            values: vec![v],
            resolution: 1,
            min_value: v as f64,
            max_value: v as f64,
        }
    }

    #[test]
    fn same_request_same_hash() {
        let a = grid(sum_nodes(), sum_edges());
        let b = grid(sum_nodes(), sum_edges());
        assert_eq!(hash_grid_request(&a), hash_grid_request(&b));
    }

    #[test]
    fn field_and_param_changes_change_hash() {
        let base = grid(sum_nodes(), sum_edges());
        let mut nodes = sum_nodes();
        nodes[0] = make_node("a", "Constant", json!({ "Value": 11 }));
        assert_ne!(hash_grid_request(&base), hash_grid_request(&grid(nodes, sum_edges())));

        let mut finer = base.clone();
        finer.resolution = 128;
        assert_ne!(hash_grid_request(&base), hash_grid_request(&finer));

        let mut other_root = base.clone();
        other_root.root_node_id = None;
        assert_ne!(hash_grid_request(&base), hash_grid_request(&other_root));
    }

    #[test]
    fn order_independent() {
        let mut nodes = sum_nodes();
        nodes.reverse();
        let mut edges = sum_edges();
        edges.reverse();
        assert_eq!(
            hash_grid_request(&grid(sum_nodes(), sum_edges())),
            hash_grid_request(&grid(nodes, edges))
        );
    }

    #[test]
    fn content_fields_affect_hash() {
        let mut a = grid(sum_nodes(), sum_edges());
        let mut b = a.clone();
        a.options.content_fields.insert("Base".into(), 1.0);
        b.options.content_fields.insert("Base".into(), 2.0);
        assert_ne!(hash_grid_request(&a), hash_grid_request(&b));
    }

    #[test]
    fn grid_and_volume_keys_differ() {
        let g = grid(sum_nodes(), sum_edges());
        let v = VolumeParams {
            nodes: g.nodes.clone(),
            edges: g.edges.clone(),
            resolution: g.resolution,
            range_min: g.range_min,
            range_max: g.range_max,
            y_min: 0.0,
            y_max: 128.0,
            y_slices: 32,
            root_node_id: g.root_node_id.clone(),
            options: EvaluationOptions::default(),
        };
        assert_ne!(hash_grid_request(&g), hash_volume_request(&v));
    }

    #[test]
    fn lru_eviction() {
        let cache = ResultCache::new(2);
        cache.put(1, result(1.0));
        cache.put(2, result(2.0));
        cache.put(3, result(3.0));
        assert!(cache.get(1).is_none());
        assert!(cache.get(2).is_some());
        assert_eq!(cache.get(3).map(|r| r.values[0]), Some(3.0));
    }

    #[test]
    fn hits_share_the_allocation() {
        let cache = ResultCache::new(4);
        let stored = Arc::new(result(42.0));
        cache.put_arc(55, stored.clone());
        let a = cache.get(55).unwrap();
        let b = cache.get(55).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&a, &stored));
    }

    #[test]
    fn clear_and_zero_capacity() {
        let cache = ResultCache::new(0);
        cache.put(1, result(1.0));
        cache.put(2, result(2.0));
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}
