//! Consumer end of a range scan
//!
//! A [`RangeStream`] delivers the records a worker produces, in key order,
//! followed by exactly one terminal event. The stream owns the queue, the
//! worker task and a reference keeping the store alive; all three are
//! released only after the terminal event has been handed out.

use crate::queue::{Message, StreamQueue};
use crate::rendezvous::Candidate;
use crate::task::Task;
use bplus_core::{observe, BplusError, Decision, Record};
use futures::Stream;
use std::any::Any;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Reference that keeps an opened store alive
pub(crate) type KeepAlive = Arc<dyn Any + Send + Sync>;

/// Filter answered on the consumer side of a filtered stream
pub(crate) type StreamFilter = Box<dyn FnMut(&[u8]) -> Decision + Send>;

/// One event of a range scan
#[derive(Debug)]
pub enum RangeEvent {
    /// Next record in key order
    Record(Record),
    /// Scan finished; no more events follow
    End,
    /// Scan failed; no more events follow
    Error(BplusError),
}

impl RangeEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RangeEvent::Record(_))
    }

    pub fn into_record(self) -> Option<Record> {
        match self {
            RangeEvent::Record(record) => Some(record),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    Streaming,
    /// Terminal event delivered; resources not yet released
    Finished,
    Released,
}

/// Ordered stream of records from a range scan
pub struct RangeStream {
    queue: Option<Arc<StreamQueue>>,
    worker: Option<JoinHandle<Task>>,
    keep_alive: Option<KeepAlive>,
    cancelled: Arc<AtomicBool>,
    filter: Option<StreamFilter>,
    pending: VecDeque<Message>,
    delivered: u64,
    state: StreamState,
}

impl RangeStream {
    pub(crate) fn new(
        queue: Arc<StreamQueue>,
        worker: JoinHandle<Task>,
        keep_alive: KeepAlive,
        cancelled: Arc<AtomicBool>,
        filter: Option<StreamFilter>,
    ) -> Self {
        Self {
            queue: Some(queue),
            worker: Some(worker),
            keep_alive: Some(keep_alive),
            cancelled,
            filter,
            pending: VecDeque::new(),
            delivered: 0,
            state: StreamState::Streaming,
        }
    }

    /// Next event, or `None` once the terminal event has been delivered.
    ///
    /// Filter questions from the worker are answered here, on the consuming
    /// task, and never show up as events.
    pub async fn next_event(&mut self) -> Option<RangeEvent> {
        loop {
            match self.state {
                StreamState::Streaming => {}
                StreamState::Finished => {
                    self.release();
                    return None;
                }
                StreamState::Released => return None,
            }

            if let Some(message) = self.pending.pop_front() {
                match message {
                    Message::Record(record) => {
                        self.delivered += 1;
                        return Some(RangeEvent::Record(record));
                    }
                    Message::Decide(request) => {
                        let decision = match self.filter.as_mut() {
                            Some(filter) => match request.candidate() {
                                Candidate::Filter { key } => filter(key.as_bytes()),
                                _ => Decision::Reject,
                            },
                            None => Decision::Accept,
                        };
                        request.answer(decision);
                        continue;
                    }
                    Message::End => {
                        self.finish("end");
                        return Some(RangeEvent::End);
                    }
                    Message::Failed(e) => {
                        self.finish("error");
                        return Some(RangeEvent::Error(e));
                    }
                }
            }

            let queue = match &self.queue {
                Some(queue) => Arc::clone(queue),
                None => return None,
            };
            if queue.drain_into(&mut self.pending) == 0 {
                queue.wait().await;
            }
        }
    }

    /// Deliver every remaining event to `on_event`, terminal included
    pub async fn drain(mut self, mut on_event: impl FnMut(RangeEvent)) {
        while let Some(event) = self.next_event().await {
            on_event(event);
        }
    }

    /// Collect the remaining records, failing on an error event
    pub async fn collect_records(mut self) -> Result<Vec<Record>, BplusError> {
        let mut records = Vec::new();
        while let Some(event) = self.next_event().await {
            match event {
                RangeEvent::Record(record) => records.push(record),
                RangeEvent::End => {}
                RangeEvent::Error(e) => return Err(e),
            }
        }
        Ok(records)
    }

    /// Adapt into a [`Stream`] of events
    pub fn into_stream(self) -> impl Stream<Item = RangeEvent> + Send {
        futures::stream::unfold(self, |mut stream| async move {
            stream.next_event().await.map(|event| (event, stream))
        })
    }

    /// Ask the worker to stop scanning. Events already queued are still
    /// delivered, followed by the terminal event.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Whether the terminal event has been delivered
    pub fn is_finished(&self) -> bool {
        self.state != StreamState::Streaming
    }

    /// Records handed out so far
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    fn finish(&mut self, outcome: &'static str) {
        self.state = StreamState::Finished;
        observe::record_stream(self.delivered, outcome);
        debug!(records = self.delivered, outcome, "Range stream finished");
    }

    /// Release queue, worker and store reference, in that order
    fn release(&mut self) {
        self.pending.clear();
        if let Some(queue) = self.queue.take() {
            queue.close();
        }
        self.worker.take();
        self.keep_alive.take();
        self.state = StreamState::Released;
    }
}

impl Drop for RangeStream {
    fn drop(&mut self) {
        if self.state == StreamState::Streaming {
            self.cancel();
            debug!(records = self.delivered, "Range stream dropped before completion");
        }
        self.release();
    }
}
