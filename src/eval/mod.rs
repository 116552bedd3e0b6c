// eval/mod.rs — Density graph evaluation engine

pub mod cache;
pub mod compiled;
pub mod curves;
pub mod graph;
pub mod grid;
pub mod node_type;
pub mod nodes;
pub mod noise;
pub mod volume;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Host-supplied evaluation inputs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationOptions {
    /// Named world heights ("Base", "Water", ...) read by BaseHeight nodes.
    #[serde(default)]
    pub content_fields: HashMap<String, f64>,
}

impl EvaluationOptions {
    pub fn with_content_field(mut self, name: impl Into<String>, height: f64) -> Self {
        self.content_fields.insert(name.into(), height);
        self
    }
}
