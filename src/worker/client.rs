// worker/client.rs — Single-flight client for a background sweep worker
//
// Each client lazily spawns one worker thread. A new request cancels the
// previous one; cancelled requests settle with `EvalError::Cancelled` right
// away while the worker, if it already started, finishes and its reply is
// discarded. A worker error, a dead worker or a timeout recompute the request
// synchronously on the waiting thread. If the thread cannot be spawned the
// client evaluates synchronously from then on.

use crate::error::EvalError;
use crate::eval::cache::ResultCache;
use crate::worker::entry::{self, Job, Reply};
use crate::worker::{CancellationToken, Sweep, WorkerResponse};
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

/// Worker client settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WorkerConfig {
    /// How long to wait for the worker before evaluating synchronously.
    pub timeout_ms: u64,
    /// Worker thread name; the sweep kind is used when unset.
    pub thread_name: Option<String>,
    pub stack_size: usize,
    /// `false` evaluates every request on the calling thread.
    pub use_worker: bool,
    /// Result cache entries; 0 disables the cache.
    pub cache_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            timeout_ms: 30_000,
            thread_name: None,
            stack_size: 16 * 1024 * 1024,
            use_worker: true,
            cache_capacity: 0,
        }
    }
}

impl WorkerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

enum WorkerSlot<S: Sweep> {
    NotStarted,
    Running(Sender<Job<S>>),
    /// Spawning failed; evaluate synchronously forever.
    Unavailable,
}

/// The one request a client still honours.
struct Inflight<T> {
    id: u64,
    token: CancellationToken,
    settle: Sender<Reply<T>>,
}

impl<T> Inflight<T> {
    /// Settle the request as cancelled; returns its id.
    fn cancel(self) -> u64 {
        self.token.cancel();
        let _ = self.settle.send(Err(EvalError::Cancelled));
        self.id
    }
}

struct Shared<S: Sweep> {
    inflight: Mutex<Option<Inflight<S::Output>>>,
    cache: Option<ResultCache<S::Output>>,
}

impl<S: Sweep> Shared<S> {
    /// Forget request `id` if it is still the in-flight one.
    fn release(&self, id: u64) {
        let mut slot = lock(&self.inflight);
        if slot.as_ref().is_some_and(|f| f.id == id) {
            *slot = None;
        }
    }
}

/// Background evaluator for one sweep kind.
pub struct WorkerClient<S: Sweep> {
    config: WorkerConfig,
    worker: Mutex<WorkerSlot<S>>,
    shared: Arc<Shared<S>>,
    next_id: AtomicU64,
}

impl<S: Sweep> Default for WorkerClient<S> {
    fn default() -> Self {
        Self::new(WorkerConfig::default())
    }
}

impl<S: Sweep> WorkerClient<S> {
    pub fn new(config: WorkerConfig) -> Self {
        let cache = (config.cache_capacity > 0).then(|| ResultCache::new(config.cache_capacity));
        let worker = if config.use_worker {
            WorkerSlot::NotStarted
        } else {
            WorkerSlot::Unavailable
        };
        WorkerClient {
            config,
            worker: Mutex::new(worker),
            shared: Arc::new(Shared {
                inflight: Mutex::new(None),
                cache,
            }),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Whether requests currently go to a background thread.
    pub fn has_worker(&self) -> bool {
        matches!(*lock(&self.worker), WorkerSlot::Running(_))
    }

    /// Cancel the in-flight request. Its [`Pending`] settles with
    /// [`EvalError::Cancelled`]; the worker is not interrupted.
    pub fn cancel(&self) {
        let previous = lock(&self.shared.inflight).take();
        if let Some(inflight) = previous {
            log::debug!("[{}Worker] cancelled request {}", S::KIND, inflight.cancel());
        }
    }

    /// Submit `params`, cancelling any earlier request from this client.
    pub fn evaluate(&self, params: S) -> Pending<S> {
        let key = self.shared.cache.as_ref().map(|_| params.cache_key());
        let hit = match (&self.shared.cache, key) {
            (Some(cache), Some(key)) => cache.get(key),
            _ => None,
        };
        if let Some(hit) = hit {
            self.cancel();
            log::trace!("[{}Worker] cache hit", S::KIND);
            return Pending::ready(Ok(hit));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let (settle, rx) = mpsc::channel();
        // Install and evict in one critical section: one request in flight.
        let previous = lock(&self.shared.inflight).replace(Inflight {
            id,
            token: token.clone(),
            settle: settle.clone(),
        });
        if let Some(inflight) = previous {
            log::debug!("[{}Worker] cancelled request {}", S::KIND, inflight.cancel());
        }

        let state = match self.job_sender() {
            Some(jobs) => {
                let job = Job {
                    params: params.clone(),
                    token: token.clone(),
                    reply: settle,
                };
                if jobs.send(job).is_ok() {
                    PendingState::Waiting(rx)
                } else {
                    log::debug!("[{}Worker] worker gone; respawning on next request", S::KIND);
                    *lock(&self.worker) = WorkerSlot::NotStarted;
                    PendingState::Fallback
                }
            }
            None => PendingState::Fallback,
        };

        Pending {
            state,
            params: Some(params),
            token,
            id,
            key,
            timeout: self.config.timeout(),
            shared: Some(self.shared.clone()),
        }
    }

    /// Sender for the worker queue, spawning the thread on first use.
    fn job_sender(&self) -> Option<Sender<Job<S>>> {
        let mut slot = lock(&self.worker);
        match &*slot {
            WorkerSlot::Running(tx) => return Some(tx.clone()),
            WorkerSlot::Unavailable => return None,
            WorkerSlot::NotStarted => {}
        }
        let (tx, rx) = mpsc::channel::<Job<S>>();
        let name = self
            .config
            .thread_name
            .clone()
            .unwrap_or_else(|| format!("{}-worker", S::KIND));
        let spawned = thread::Builder::new()
            .name(name)
            .stack_size(self.config.stack_size)
            .spawn(move || entry::run(rx));
        match spawned {
            Ok(_) => {
                *slot = WorkerSlot::Running(tx.clone());
                Some(tx)
            }
            Err(e) => {
                log::warn!("[{}Worker] failed to start, evaluating synchronously: {e}", S::KIND);
                *slot = WorkerSlot::Unavailable;
                None
            }
        }
    }

    /// Drop cached results.
    pub fn clear_cache(&self) {
        if let Some(cache) = &self.shared.cache {
            cache.clear();
        }
    }
}

enum PendingState<T> {
    Waiting(Receiver<Reply<T>>),
    /// Evaluate on the waiting thread.
    Fallback,
    Ready(Result<Arc<T>, EvalError>),
}

/// Handle to a submitted request.
pub struct Pending<S: Sweep> {
    state: PendingState<S::Output>,
    params: Option<S>,
    token: CancellationToken,
    id: u64,
    key: Option<u64>,
    timeout: Duration,
    shared: Option<Arc<Shared<S>>>,
}

impl<S: Sweep> Pending<S> {
    fn ready(result: Result<Arc<S::Output>, EvalError>) -> Self {
        Pending {
            state: PendingState::Ready(result),
            params: None,
            token: CancellationToken::new(),
            id: 0,
            key: None,
            timeout: Duration::ZERO,
            shared: None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Block until the request settles.
    pub fn wait(mut self) -> Result<Arc<S::Output>, EvalError> {
        let state = std::mem::replace(&mut self.state, PendingState::Fallback);
        let result = match state {
            PendingState::Ready(result) => return result,
            PendingState::Fallback => self.run_sync(),
            PendingState::Waiting(rx) => match rx.recv_timeout(self.timeout) {
                Ok(Err(e)) => Err(e),
                Ok(Ok(WorkerResponse::Done(out))) => Ok(Arc::new(out)),
                Ok(Ok(WorkerResponse::Failed { error })) => {
                    log::debug!(
                        "[{}Worker] worker error ({error}), evaluating synchronously",
                        S::KIND
                    );
                    self.run_sync()
                }
                Err(RecvTimeoutError::Timeout) => {
                    log::debug!(
                        "[{}Worker] no reply after {:?}, evaluating synchronously",
                        S::KIND,
                        self.timeout
                    );
                    self.run_sync()
                }
                Err(RecvTimeoutError::Disconnected) => {
                    log::debug!(
                        "[{}Worker] worker dropped the request, evaluating synchronously",
                        S::KIND
                    );
                    self.run_sync()
                }
            },
        };
        // A cancel that raced with the reply still wins.
        let result = if self.token.is_cancelled() {
            Err(EvalError::Cancelled)
        } else {
            result
        };
        if let Some(shared) = &self.shared {
            shared.release(self.id);
            if let (Ok(out), Some(cache), Some(key)) = (&result, &shared.cache, self.key) {
                cache.put_arc(key, out.clone());
            }
        }
        result
    }

    fn run_sync(&self) -> Result<Arc<S::Output>, EvalError> {
        if self.token.is_cancelled() {
            return Err(EvalError::Cancelled);
        }
        let Some(params) = &self.params else {
            return Err(EvalError::Failed("request has no parameters".into()));
        };
        match entry::respond(params) {
            WorkerResponse::Done(out) => Ok(Arc::new(out)),
            WorkerResponse::Failed { error } => Err(EvalError::Failed(error)),
        }
    }
}
