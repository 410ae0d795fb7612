//! Single-writer gate
//!
//! Every mutating engine call runs under the gate so that at most one write
//! reaches the engine at a time. Reads never touch it. Marshalling of input
//! and output buffers happens outside the critical section.

use bplus_core::observe;
use parking_lot::Mutex;
use std::time::Instant;

/// Mutual-exclusion barrier for mutating engine calls
///
/// No fairness is promised between queued writers, only exclusion.
#[derive(Default)]
pub struct WriteGate {
    lock: Mutex<()>,
}

impl WriteGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `write` while holding the gate
    pub fn run<R>(&self, write: impl FnOnce() -> R) -> R {
        let waiting_since = Instant::now();
        let _guard = self.lock.lock();
        observe::record_gate_wait(waiting_since.elapsed());
        write()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_writers_never_overlap() {
        let gate = Arc::new(WriteGate::new());
        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));
        let writes = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gate = Arc::clone(&gate);
                let active = Arc::clone(&active);
                let max_active = Arc::clone(&max_active);
                let writes = Arc::clone(&writes);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..20 {
                        gate.run(|| {
                            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                            max_active.fetch_max(now, Ordering::SeqCst);
                            thread::sleep(Duration::from_micros(50));
                            active.fetch_sub(1, Ordering::SeqCst);
                            writes.fetch_add(1, Ordering::SeqCst);
                        });
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(max_active.load(Ordering::SeqCst), 1);
        assert_eq!(writes.load(Ordering::SeqCst), 160);
        assert!(!gate.lock.is_locked());
    }

    #[test]
    fn test_gate_returns_closure_result() {
        let gate = WriteGate::new();
        assert_eq!(gate.run(|| 41 + 1), 42);
        assert!(!gate.lock.is_locked());
    }
}
