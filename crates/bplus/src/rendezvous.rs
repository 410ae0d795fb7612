//! Decision rendezvous between a blocked worker and the consumer
//!
//! A worker that needs an answer from a caller-supplied callback copies the
//! candidate out of engine memory, hands it to the consumer and blocks until
//! the reply arrives. A request that is dropped unanswered counts as a
//! reject, so a worker can never wait on a consumer that has gone away.

use bplus_core::{observe, Decision, Key, Value};
use std::fmt;
use tokio::sync::{mpsc, oneshot};

/// The data a decision callback is asked about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Candidate {
    /// Existing value about to be replaced
    Update { previous: Value, current: Value },
    /// Stored value about to be removed
    Remove { value: Value },
    /// Key about to be visited by a filtered scan
    Filter { key: Key },
}

/// A pending question from a worker
pub struct DecisionRequest {
    candidate: Candidate,
    reply: oneshot::Sender<Decision>,
}

impl fmt::Debug for DecisionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecisionRequest")
            .field("candidate", &self.candidate)
            .finish()
    }
}

impl DecisionRequest {
    pub(crate) fn new(candidate: Candidate) -> (Self, PendingDecision) {
        let (reply, rx) = oneshot::channel();
        (Self { candidate, reply }, PendingDecision(rx))
    }

    pub fn candidate(&self) -> &Candidate {
        &self.candidate
    }

    /// Release the worker with `decision`
    pub fn answer(self, decision: impl Into<Decision>) {
        let decision = decision.into();
        observe::record_decision(decision.is_accept());
        // Worker gone means the task already ended; nothing to release
        let _ = self.reply.send(decision);
    }
}

/// Worker side of a single request
pub(crate) struct PendingDecision(oneshot::Receiver<Decision>);

impl PendingDecision {
    /// Block the calling worker thread until the consumer answers
    pub(crate) fn wait(self) -> Decision {
        self.0.blocking_recv().unwrap_or(Decision::Reject)
    }
}

/// Create a request channel for a non-streaming decision task
pub(crate) fn channel() -> (Requester, Responder) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Requester { tx }, Responder { rx })
}

/// Worker handle: asks and blocks
#[derive(Clone)]
pub(crate) struct Requester {
    tx: mpsc::UnboundedSender<DecisionRequest>,
}

impl Requester {
    pub(crate) fn ask(&self, candidate: Candidate) -> Decision {
        let (request, pending) = DecisionRequest::new(candidate);
        if self.tx.send(request).is_err() {
            return Decision::Reject;
        }
        pending.wait()
    }
}

/// Consumer handle: receives requests to answer
pub(crate) struct Responder {
    rx: mpsc::UnboundedReceiver<DecisionRequest>,
}

impl Responder {
    pub(crate) async fn next(&mut self) -> Option<DecisionRequest> {
        self.rx.recv().await
    }
}
