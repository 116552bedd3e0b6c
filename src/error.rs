// error.rs — Error taxonomy for graph construction and background evaluation
//
// Numeric edge cases (division by zero, degenerate ranges, unknown node
// types) never surface here: the evaluator degrades them to local defaults.
// Only structural failures and transport outcomes are represented.

use thiserror::Error;

/// Literal value carried by a cancelled request.
pub const CANCELLED: &str = "cancelled";

/// Structural failure while building an evaluable graph.
///
/// Drivers never propagate this: they turn it into an all-zero result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("graph has no nodes")]
    EmptyGraph,

    #[error("no evaluable root node found in graph")]
    NoRoot,
}

/// Outcome of a background evaluation that did not produce a result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    /// The request was superseded or explicitly cancelled. This is a control
    /// signal, not a failure: compare it against [`CANCELLED`].
    #[error("cancelled")]
    Cancelled,

    /// The synchronous fallback itself failed.
    #[error("evaluation failed: {0}")]
    Failed(String),
}

impl EvalError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, EvalError::Cancelled)
    }
}

impl PartialEq<&str> for EvalError {
    fn eq(&self, other: &&str) -> bool {
        match self {
            EvalError::Cancelled => *other == CANCELLED,
            EvalError::Failed(msg) => msg == other,
        }
    }
}

/// Render a caught panic payload as a message string.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
