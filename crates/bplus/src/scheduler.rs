//! Task dispatch onto the blocking worker pool
//!
//! The scheduler hands each [`Task`] to tokio's blocking pool and returns a
//! [`Completion`] the caller awaits for the result. Dispatch-time problems
//! (no runtime to run on) surface synchronously, before any work is queued;
//! engine failures surface when the completion resolves.

use crate::rendezvous::{Candidate, Responder};
use crate::store::OpenStore;
use crate::task::{Task, TaskOutput};
use bplus_core::{observe, BplusError, Decision, Engine, Result};
use futures::future::{BoxFuture, FutureExt};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::debug;

/// Result of a dispatched operation
///
/// The operation runs whether or not the completion is awaited; dropping it
/// only discards the result.
#[must_use = "a Completion carries the operation's result and must be awaited"]
pub struct Completion<T> {
    future: BoxFuture<'static, Result<T>>,
}

impl<T> Completion<T> {
    pub(crate) fn new(future: impl Future<Output = Result<T>> + Send + 'static) -> Self {
        Self {
            future: future.boxed(),
        }
    }
}

impl<T> Future for Completion<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.future.as_mut().poll(cx)
    }
}

/// Counts a task as in flight until the worker body finishes
struct InFlightGuard {
    counter: Arc<AtomicUsize>,
}

impl InFlightGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        let count = counter.fetch_add(1, Ordering::SeqCst) + 1;
        observe::set_in_flight(count);
        Self {
            counter: Arc::clone(counter),
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let count = self.counter.fetch_sub(1, Ordering::SeqCst) - 1;
        observe::set_in_flight(count);
    }
}

pub(crate) struct Scheduler {
    runtime: Option<Handle>,
    in_flight: Arc<AtomicUsize>,
    slow_task: Duration,
}

impl Scheduler {
    pub(crate) fn new(slow_task: Duration) -> Self {
        Self {
            runtime: None,
            in_flight: Arc::new(AtomicUsize::new(0)),
            slow_task,
        }
    }

    pub(crate) fn set_runtime(&mut self, handle: Handle) {
        self.runtime = Some(handle);
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn handle(&self) -> Result<Handle> {
        match &self.runtime {
            Some(handle) => Ok(handle.clone()),
            None => Handle::try_current().map_err(|_| BplusError::NoRuntime),
        }
    }

    /// Queue `task` on the blocking pool. The worker keeps `store` alive
    /// until the engine call returns.
    pub(crate) fn dispatch<E: Engine>(
        &self,
        store: Arc<OpenStore<E>>,
        task: Task,
    ) -> Result<JoinHandle<Task>> {
        let handle = self.handle()?;
        let in_flight = InFlightGuard::enter(&self.in_flight);
        let slow_task = self.slow_task;

        debug!(op = task.name(), in_flight = self.in_flight(), "Task dispatched");

        Ok(handle.spawn_blocking(move || {
            let _in_flight = in_flight;
            let mut task = task;
            task.run(&store, slow_task);
            task
        }))
    }

    /// Dispatch `task` and map its output once it completes
    pub(crate) fn submit<E, T, F>(
        &self,
        store: Arc<OpenStore<E>>,
        task: Task,
        complete: F,
    ) -> Result<Completion<T>>
    where
        E: Engine,
        T: Send + 'static,
        F: FnOnce(TaskOutput) -> Result<T> + Send + 'static,
    {
        let keep_alive = Arc::clone(&store);
        let worker = self.dispatch(store, task)?;

        Ok(Completion::new(async move {
            let task = join(worker).await?;
            debug!(op = task.name(), status = %task.status(), "Task completed");
            let result = task.into_output().and_then(complete);
            drop(keep_alive);
            result
        }))
    }

    /// Dispatch a task whose worker asks decision questions. A runtime task
    /// answers them with `decide` until the worker finishes, so the write
    /// gate is released whether or not the completion is polled.
    pub(crate) fn submit_decided<E, D>(
        &self,
        store: Arc<OpenStore<E>>,
        task: Task,
        mut responder: Responder,
        mut decide: D,
    ) -> Result<Completion<()>>
    where
        E: Engine,
        D: FnMut(&Candidate) -> Decision + Send + 'static,
    {
        let handle = self.handle()?;
        let keep_alive = Arc::clone(&store);
        let mut worker = self.dispatch(store, task)?;

        let answering = handle.spawn(async move {
            let joined = loop {
                tokio::select! {
                    Some(request) = responder.next() => {
                        let decision = decide(request.candidate());
                        request.answer(decision);
                    }
                    joined = &mut worker => break joined,
                }
            };
            let task = joined.map_err(join_error)?;
            debug!(op = task.name(), status = %task.status(), "Task completed");
            let result = task.into_output().map(|_| ());
            drop(keep_alive);
            result
        });

        Ok(Completion::new(async move {
            answering.await.map_err(join_error)?
        }))
    }
}

pub(crate) async fn join(worker: JoinHandle<Task>) -> Result<Task> {
    worker.await.map_err(join_error)
}

fn join_error(e: tokio::task::JoinError) -> BplusError {
    BplusError::Internal(format!("Task join error: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_runtime_is_reported() {
        let scheduler = Scheduler::new(Duration::from_secs(1));
        assert!(matches!(scheduler.handle(), Err(BplusError::NoRuntime)));
    }

    #[test]
    fn test_explicit_runtime_is_used_outside_context() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let mut scheduler = Scheduler::new(Duration::from_secs(1));
        scheduler.set_runtime(runtime.handle().clone());
        assert!(scheduler.handle().is_ok());
    }

    #[test]
    fn test_in_flight_guard_counts() {
        let counter = Arc::new(AtomicUsize::new(0));
        let first = InFlightGuard::enter(&counter);
        let second = InFlightGuard::enter(&counter);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        drop(first);
        drop(second);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_completion_resolves() {
        let completion = Completion::new(async { Ok::<_, BplusError>(7) });
        assert_eq!(completion.await.unwrap(), 7);
    }
}
