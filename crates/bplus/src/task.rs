//! Units of work handed to the blocking worker pool
//!
//! A [`Task`] carries everything an engine call needs as owned data so it can
//! cross to a worker thread, plus the slots the worker fills in: status code
//! and output. Mutating operations run under the store's write gate; reads do
//! not.

use crate::queue::{Message, StreamQueue};
use crate::rendezvous::{Candidate, DecisionRequest, Requester};
use crate::store::OpenStore;
use bplus_core::{
    observe, BplusError, Decision, Engine, EngineError, EngineResult, Key, Record, Result, Status,
    Value, ValueRecord, ValueRef,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Operation kind and its owned inputs
pub(crate) enum Operation {
    Set {
        key: Key,
        value: Value,
    },
    BulkSet {
        pairs: Vec<(Key, Value)>,
    },
    Update {
        key: Key,
        value: Value,
        decisions: Requester,
    },
    BulkUpdate {
        pairs: Vec<(Key, Value)>,
        decisions: Requester,
    },
    Get {
        key: Key,
    },
    GetPrevious {
        reference: ValueRef,
    },
    GetRange {
        start: Key,
        end: Key,
        sink: RangeSink,
    },
    GetFilteredRange {
        start: Key,
        end: Key,
        sink: RangeSink,
    },
    Remove {
        key: Key,
    },
    RemoveConditional {
        key: Key,
        decisions: Requester,
    },
    Compact,
}

impl Operation {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Operation::Set { .. } => "set",
            Operation::BulkSet { .. } => "bulk_set",
            Operation::Update { .. } => "update",
            Operation::BulkUpdate { .. } => "bulk_update",
            Operation::Get { .. } => "get",
            Operation::GetPrevious { .. } => "get_previous",
            Operation::GetRange { .. } => "get_range",
            Operation::GetFilteredRange { .. } => "get_filtered_range",
            Operation::Remove { .. } => "remove",
            Operation::RemoveConditional { .. } => "remove_conditional",
            Operation::Compact => "compact",
        }
    }

    fn is_write(&self) -> bool {
        matches!(
            self,
            Operation::Set { .. }
                | Operation::BulkSet { .. }
                | Operation::Update { .. }
                | Operation::BulkUpdate { .. }
                | Operation::Remove { .. }
                | Operation::RemoveConditional { .. }
                | Operation::Compact
        )
    }
}

/// What the engine call produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TaskOutput {
    None,
    Value(ValueRecord),
    Compacted(u64),
}

pub(crate) struct Task {
    op: Operation,
    status: Status,
    error: Option<EngineError>,
    output: TaskOutput,
    elapsed: Duration,
}

impl Task {
    pub(crate) fn new(op: Operation) -> Self {
        Self {
            op,
            status: Status::OK,
            error: None,
            output: TaskOutput::None,
            elapsed: Duration::ZERO,
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        self.op.name()
    }

    pub(crate) fn status(&self) -> Status {
        self.status
    }

    /// Worker body: perform the engine call and record its outcome
    pub(crate) fn run<E: Engine>(&mut self, store: &OpenStore<E>, slow_task: Duration) {
        let started = Instant::now();
        let result = if self.op.is_write() {
            store.gate().run(|| execute(&self.op, store.engine()))
        } else {
            execute(&self.op, store.engine())
        };
        self.elapsed = started.elapsed();

        match result {
            Ok(output) => {
                self.status = Status::OK;
                self.output = output;
            }
            Err(e) => {
                self.status = e.status();
                self.error = Some(e);
            }
        }

        let op = self.name();
        observe::record_task(op, self.elapsed, self.status.is_ok());
        if self.elapsed >= slow_task {
            warn!(
                op,
                elapsed_ms = self.elapsed.as_millis() as u64,
                status = %self.status,
                "Slow engine call"
            );
        } else {
            debug!(
                op,
                elapsed_us = self.elapsed.as_micros() as u64,
                status = %self.status,
                "Engine call finished"
            );
        }
    }

    /// Consume the finished task, turning a failed status into an error
    pub(crate) fn into_output(self) -> Result<TaskOutput> {
        match self.error {
            Some(e) => Err(BplusError::Engine(e)),
            None => Ok(self.output),
        }
    }
}

fn execute<E: Engine>(op: &Operation, engine: &E) -> EngineResult<TaskOutput> {
    match op {
        Operation::Set { key, value } => engine.set(key, value).map(|_| TaskOutput::None),
        Operation::BulkSet { pairs } => engine.bulk_set(pairs).map(|_| TaskOutput::None),
        Operation::Update {
            key,
            value,
            decisions,
        } => engine
            .update(key, value, &mut |previous, current| {
                decisions.ask(Candidate::Update {
                    previous: Value::copy_from(previous),
                    current: Value::copy_from(current),
                })
            })
            .map(|_| TaskOutput::None),
        Operation::BulkUpdate { pairs, decisions } => engine
            .bulk_update(pairs, &mut |previous, current| {
                decisions.ask(Candidate::Update {
                    previous: Value::copy_from(previous),
                    current: Value::copy_from(current),
                })
            })
            .map(|_| TaskOutput::None),
        Operation::Get { key } => engine.get(key).map(TaskOutput::Value),
        Operation::GetPrevious { reference } => {
            engine.get_previous(*reference).map(TaskOutput::Value)
        }
        Operation::GetRange { start, end, sink } => {
            let terminal = sink.terminal();
            let result = engine.range(start, end, &mut |key, value, reference| {
                sink.deliver(key, value, reference)
            });
            terminal.finish(&result);
            result.map(|_| TaskOutput::None)
        }
        Operation::GetFilteredRange { start, end, sink } => {
            let terminal = sink.terminal();
            let result = engine.range(start, end, &mut |key, value, reference| {
                match sink.ask_filter(key) {
                    Some(Decision::Accept) => sink.deliver(key, value, reference),
                    Some(Decision::Reject) => true,
                    None => false,
                }
            });
            terminal.finish(&result);
            result.map(|_| TaskOutput::None)
        }
        Operation::Remove { key } => engine.remove(key).map(|_| TaskOutput::None),
        Operation::RemoveConditional { key, decisions } => engine
            .remove_conditional(key, &mut |value| {
                decisions.ask(Candidate::Remove {
                    value: Value::copy_from(value),
                })
            })
            .map(|_| TaskOutput::None),
        Operation::Compact => engine.compact().map(TaskOutput::Compacted),
    }
}

/// Worker end of a range stream
pub(crate) struct RangeSink {
    queue: Arc<StreamQueue>,
    cancelled: Arc<AtomicBool>,
}

impl RangeSink {
    pub(crate) fn new(queue: Arc<StreamQueue>, cancelled: Arc<AtomicBool>) -> Self {
        Self { queue, cancelled }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Copy one record out of engine memory and queue it. Returns whether
    /// the scan should continue.
    fn deliver(&self, key: &[u8], value: &[u8], reference: ValueRef) -> bool {
        if self.is_cancelled() {
            return false;
        }
        self.queue
            .send(Message::Record(Record::copy_from(key, value, reference)))
    }

    /// Ask the consumer whether to visit `key`. `None` means the consumer is
    /// gone and the scan should stop.
    fn ask_filter(&self, key: &[u8]) -> Option<Decision> {
        if self.is_cancelled() {
            return None;
        }
        let (request, pending) = DecisionRequest::new(Candidate::Filter {
            key: Key::copy_from(key),
        });
        if !self.queue.send(Message::Decide(request)) {
            return None;
        }
        Some(pending.wait())
    }

    fn terminal(&self) -> TerminalGuard {
        TerminalGuard {
            queue: Some(Arc::clone(&self.queue)),
        }
    }
}

/// Guarantees the stream gets a terminal message, even if the engine call
/// unwinds.
struct TerminalGuard {
    queue: Option<Arc<StreamQueue>>,
}

impl TerminalGuard {
    fn finish(mut self, result: &EngineResult<()>) {
        if let Some(queue) = self.queue.take() {
            let message = match result {
                Ok(()) => Message::End,
                Err(e) => Message::Failed(BplusError::Engine(e.clone())),
            };
            queue.send(message);
        }
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        if let Some(queue) = self.queue.take() {
            queue.send(Message::Failed(BplusError::Internal(
                "range worker stopped before finishing the scan".into(),
            )));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[test]
    fn test_terminal_guard_reports_unwind() {
        let queue = Arc::new(StreamQueue::new());
        let sink = RangeSink::new(Arc::clone(&queue), Arc::new(AtomicBool::new(false)));

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _terminal = sink.terminal();
            panic!("engine blew up");
        }));
        assert!(outcome.is_err());

        let mut out = VecDeque::new();
        queue.drain_into(&mut out);
        assert!(matches!(
            out.pop_front(),
            Some(Message::Failed(BplusError::Internal(_)))
        ));
    }

    #[test]
    fn test_cancelled_sink_stops_scan() {
        let queue = Arc::new(StreamQueue::new());
        let cancelled = Arc::new(AtomicBool::new(false));
        let sink = RangeSink::new(Arc::clone(&queue), Arc::clone(&cancelled));

        assert!(sink.deliver(b"a", b"1", ValueRef::new(1)));
        cancelled.store(true, Ordering::Release);
        assert!(!sink.deliver(b"b", b"2", ValueRef::new(2)));
        assert_eq!(sink.ask_filter(b"c"), None);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_operation_names() {
        assert_eq!(Operation::Compact.name(), "compact");
        assert!(Operation::Compact.is_write());
        assert!(!Operation::Get {
            key: Key::from("k")
        }
        .is_write());
    }
}
