// worker/entry.rs — Worker thread entry point
//
// The thread owns a job queue. Each job runs one sweep and posts the response
// back on the job's own reply channel. A job whose token was cancelled while
// it sat in the queue is dropped unrun; a job that has started always runs to
// completion and its reply is simply ignored if nobody is listening.

use crate::error::{panic_message, EvalError};
use crate::worker::{CancellationToken, Sweep, WorkerResponse};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{Receiver, Sender};

/// Message on a request's reply channel: a worker response, or the
/// cancellation signal from the client.
pub(crate) type Reply<T> = Result<WorkerResponse<T>, EvalError>;

pub(crate) struct Job<S: Sweep> {
    pub params: S,
    pub token: CancellationToken,
    pub reply: Sender<Reply<S::Output>>,
}

/// Run one sweep, turning a panic into an error response.
pub fn respond<S: Sweep>(params: &S) -> WorkerResponse<S::Output> {
    match catch_unwind(AssertUnwindSafe(|| params.run())) {
        Ok(out) => WorkerResponse::Done(out),
        Err(payload) => WorkerResponse::Failed {
            error: panic_message(payload.as_ref()),
        },
    }
}

/// Serialized entry point: a JSON request in, a JSON response out.
pub fn handle_message<S>(message: &str) -> String
where
    S: Sweep + DeserializeOwned,
    S::Output: Serialize,
{
    let response = match serde_json::from_str::<S>(message) {
        Ok(params) => {
            log::debug!(
                "[{}Worker] received message, nodes: {} resolution: {}",
                S::KIND,
                params.node_count(),
                params.resolution()
            );
            respond(&params)
        }
        Err(e) => WorkerResponse::Failed {
            error: e.to_string(),
        },
    };
    serde_json::to_string(&response).unwrap_or_else(|e| {
        serde_json::json!({ "error": e.to_string() }).to_string()
    })
}

/// Worker thread body. Returns when every job sender is gone.
pub(crate) fn run<S: Sweep>(jobs: Receiver<Job<S>>) {
    log::debug!("[{}Worker] initialized", S::KIND);
    for job in jobs {
        if job.token.is_cancelled() {
            log::trace!("[{}Worker] skipping cancelled request", S::KIND);
            continue;
        }
        log::debug!(
            "[{}Worker] received request, nodes: {} resolution: {}",
            S::KIND,
            job.params.node_count(),
            job.params.resolution()
        );
        let response = respond(&job.params);
        // The receiver is gone once the request was settled elsewhere.
        let _ = job.reply.send(Ok(response));
    }
    log::debug!("[{}Worker] shutting down", S::KIND);
}
