// worker/mod.rs — Background sweep worker: message contract and defaults
//
// A request is a `GridParams` or `VolumeParams`; the response is the sweep
// result or `{ "error": "..." }`. The `Sweep` trait ties each request type to
// its driver, its result and its cache key so one client implementation
// serves both.

pub mod client;
pub mod entry;

pub use client::{Pending, WorkerClient, WorkerConfig};
pub use entry::{handle_message, respond};

use crate::eval::cache::{hash_grid_request, hash_volume_request};
use crate::eval::grid::{evaluate_density_grid, GridParams, GridResult};
use crate::eval::volume::{evaluate_density_volume, VolumeParams, VolumeResult};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

/// A request a worker knows how to run.
pub trait Sweep: Clone + Send + 'static {
    type Output: Send + Sync + 'static;

    /// Worker kind, used for thread names and log lines.
    const KIND: &'static str;

    fn run(&self) -> Self::Output;

    /// Deterministic content hash of the request.
    fn cache_key(&self) -> u64;

    fn node_count(&self) -> usize;

    fn resolution(&self) -> u32;
}

impl Sweep for GridParams {
    type Output = GridResult;
    const KIND: &'static str = "density";

    fn run(&self) -> GridResult {
        evaluate_density_grid(self)
    }

    fn cache_key(&self) -> u64 {
        hash_grid_request(self)
    }

    fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn resolution(&self) -> u32 {
        self.resolution
    }
}

impl Sweep for VolumeParams {
    type Output = VolumeResult;
    const KIND: &'static str = "volume";

    fn run(&self) -> VolumeResult {
        evaluate_density_volume(self)
    }

    fn cache_key(&self) -> u64 {
        hash_volume_request(self)
    }

    fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn resolution(&self) -> u32 {
        self.resolution
    }
}

/// Worker reply: the result, or an error message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WorkerResponse<T> {
    Failed { error: String },
    Done(T),
}

/// Shared flag for cooperative cancellation.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

// ── Default instances ──────────────────────────────────────────────

fn density_worker() -> &'static WorkerClient<GridParams> {
    static CLIENT: OnceLock<WorkerClient<GridParams>> = OnceLock::new();
    CLIENT.get_or_init(WorkerClient::default)
}

fn volume_worker() -> &'static WorkerClient<VolumeParams> {
    static CLIENT: OnceLock<WorkerClient<VolumeParams>> = OnceLock::new();
    CLIENT.get_or_init(WorkerClient::default)
}

/// Evaluate a grid on the shared preview worker. Any earlier request from
/// this function is cancelled.
pub fn evaluate_in_worker(params: GridParams) -> Pending<GridParams> {
    density_worker().evaluate(params)
}

/// Cancel the shared preview worker's in-flight request, if any.
pub fn cancel_evaluation() {
    density_worker().cancel();
}

pub fn evaluate_volume_in_worker(params: VolumeParams) -> Pending<VolumeParams> {
    volume_worker().evaluate(params)
}

pub fn cancel_volume_evaluation() {
    volume_worker().cancel();
}
