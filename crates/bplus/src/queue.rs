//! Worker to consumer message queue for range streams
//!
//! The worker pushes records, decision requests and exactly one terminal
//! message. Each push is followed by a wake signal. Signals coalesce: one
//! wake may cover many messages, so the consumer always drains everything
//! that is queued when it wakes.

use crate::rendezvous::DecisionRequest;
use bplus_core::{BplusError, Record};
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::Notify;

/// A message travelling from a range worker to its consumer
#[derive(Debug)]
pub enum Message {
    /// A record accepted by the scan
    Record(Record),
    /// The worker is blocked until this filter question is answered
    Decide(DecisionRequest),
    /// Scan finished
    End,
    /// Scan failed
    Failed(BplusError),
}

impl Message {
    /// Whether this message ends the stream
    pub fn is_terminal(&self) -> bool {
        matches!(self, Message::End | Message::Failed(_))
    }
}

#[derive(Default)]
struct QueueState {
    messages: VecDeque<Message>,
    terminated: bool,
}

/// Multi-producer FIFO with a coalescing wake signal
#[derive(Default)]
pub struct StreamQueue {
    state: Mutex<QueueState>,
    wake: Notify,
}

impl StreamQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message without waking the consumer.
    ///
    /// Returns false if the stream has already terminated; the message is
    /// discarded in that case.
    pub fn push(&self, message: Message) -> bool {
        let mut state = self.state.lock();
        if state.terminated {
            return false;
        }
        if message.is_terminal() {
            state.terminated = true;
        }
        state.messages.push_back(message);
        true
    }

    /// Wake the consumer. A signal sent while nobody waits is kept for the
    /// next wait.
    pub fn signal(&self) {
        self.wake.notify_one();
    }

    /// Push then signal
    pub fn send(&self, message: Message) -> bool {
        let pushed = self.push(message);
        if pushed {
            self.signal();
        }
        pushed
    }

    /// Move every queued message into `out`, returning how many were moved
    pub fn drain_into(&self, out: &mut VecDeque<Message>) -> usize {
        let mut state = self.state.lock();
        let drained = state.messages.len();
        out.extend(state.messages.drain(..));
        drained
    }

    /// Terminate the queue from the consumer side, discarding anything
    /// still queued. Unanswered decision requests are dropped, which
    /// releases their workers with a reject.
    pub fn close(&self) {
        // Dropped outside the lock: a dropped request wakes its worker
        let discarded: Vec<_> = {
            let mut state = self.state.lock();
            state.terminated = true;
            state.messages.drain(..).collect()
        };
        drop(discarded);
    }

    /// Wait for the next wake signal
    pub async fn wait(&self) {
        self.wake.notified().await;
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.state.lock().messages.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bplus_core::ValueRef;
    use std::sync::Arc;
    use std::time::Duration;

    fn record(key: &str) -> Message {
        Message::Record(Record::copy_from(key.as_bytes(), b"v", ValueRef::new(1)))
    }

    #[test]
    fn test_push_after_terminal_is_discarded() {
        let queue = StreamQueue::new();
        assert!(queue.push(record("a")));
        assert!(queue.push(Message::End));
        assert!(!queue.push(record("b")));
        assert!(!queue.push(Message::End));

        let mut out = VecDeque::new();
        assert_eq!(queue.drain_into(&mut out), 2);
        assert!(matches!(out.pop_front(), Some(Message::Record(_))));
        assert!(matches!(out.pop_front(), Some(Message::End)));
        assert!(queue.state.lock().terminated);
    }

    #[test]
    fn test_close_discards_and_rejects_pushes() {
        let queue = StreamQueue::new();
        queue.push(record("a"));
        queue.close();
        assert_eq!(queue.len(), 0);
        assert!(!queue.push(record("b")));
    }

    #[tokio::test]
    async fn test_signal_before_wait_is_not_lost() {
        let queue = StreamQueue::new();
        queue.send(record("a"));

        tokio::time::timeout(Duration::from_secs(1), queue.wait())
            .await
            .expect("stored wake permit");
    }

    #[tokio::test]
    async fn test_coalesced_signals_drain_everything() {
        let queue = Arc::new(StreamQueue::new());
        let producer = Arc::clone(&queue);

        std::thread::spawn(move || {
            for i in 0..100 {
                producer.send(record(&format!("k{:03}", i)));
            }
            producer.send(Message::End);
        })
        .join()
        .unwrap();

        let mut out = VecDeque::new();
        queue.wait().await;
        assert_eq!(queue.drain_into(&mut out), 101);
        assert_eq!(queue.len(), 0);
        assert!(out.back().map(Message::is_terminal).unwrap_or(false));
    }
}
