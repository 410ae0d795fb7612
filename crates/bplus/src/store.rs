//! Store façade
//!
//! [`Store`] owns one engine handle at a time and turns every operation into
//! a task on the blocking pool. Operations that need a caller decision come
//! in two forms:
//! - inline (`update`, `remove_conditional`, ...): the engine call runs on
//!   the calling thread and the callback is invoked directly
//! - offloaded (`*_async`): the engine call runs on a worker, which blocks on
//!   each question while a runtime task answers it
//!
//! Decision callbacks must not call mutating operations on the same store:
//! they run while the write gate is held. Inline variants block the calling
//! thread, so async code should use the offloaded forms.

use crate::gate::WriteGate;
use crate::queue::StreamQueue;
use crate::rendezvous::{self, Candidate};
use crate::scheduler::{Completion, Scheduler};
use crate::stream::{KeepAlive, RangeEvent, RangeStream, StreamFilter};
use crate::task::{Operation, RangeSink, Task, TaskOutput};
use bplus_core::{
    BplusError, Decision, Engine, Key, Record, Result, StoreConfig, Value, ValueRecord, ValueRef,
};
use bplus_lmdb::LmdbEngine;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

/// An opened engine and its write gate.
///
/// Shared by the store and by every in-flight task; the engine is closed
/// when the last holder lets go, unless it was closed explicitly first.
pub(crate) struct OpenStore<E: Engine> {
    engine: E,
    gate: WriteGate,
    path: PathBuf,
    closed: bool,
}

impl<E: Engine> OpenStore<E> {
    fn new(engine: E, path: PathBuf) -> Self {
        Self {
            engine,
            gate: WriteGate::new(),
            path,
            closed: false,
        }
    }

    pub(crate) fn engine(&self) -> &E {
        &self.engine
    }

    pub(crate) fn gate(&self) -> &WriteGate {
        &self.gate
    }

    fn close(mut self) -> Result<()> {
        self.closed = true;
        self.engine.close()?;
        Ok(())
    }
}

impl<E: Engine> Drop for OpenStore<E> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        match self.engine.close() {
            Ok(()) => debug!(path = %self.path.display(), "Engine closed by last holder"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "Engine close failed"),
        }
    }
}

/// Asynchronous key/value store over a blocking engine
pub struct Store<E: Engine = LmdbEngine> {
    config: StoreConfig,
    scheduler: Scheduler,
    opened: RwLock<Option<Arc<OpenStore<E>>>>,
}

impl<E: Engine> Default for Store<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Engine> Store<E> {
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    pub fn with_config(config: StoreConfig) -> Self {
        let scheduler = Scheduler::new(Duration::from_millis(config.slow_task_ms));
        Self {
            config,
            scheduler,
            opened: RwLock::new(None),
        }
    }

    /// Run tasks on `handle` instead of the runtime current at call time
    pub fn with_runtime(mut self, handle: Handle) -> Self {
        self.scheduler.set_runtime(handle);
        self
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Open the engine at `path`
    pub fn open(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut opened = self.opened.write();
        if opened.is_some() {
            return Err(BplusError::AlreadyOpen);
        }

        if self.config.create_dir {
            std::fs::create_dir_all(path)?;
        }
        let engine = E::open(path, &self.config.engine)?;
        *opened = Some(Arc::new(OpenStore::new(engine, path.to_path_buf())));

        info!(path = %path.display(), "Store opened");
        Ok(())
    }

    /// Detach the engine handle.
    ///
    /// New operations fail with [`BplusError::NotOpen`] from here on. If no
    /// task still holds the engine it is closed now and its status returned;
    /// otherwise it is closed when the last in-flight task finishes.
    pub fn close(&self) -> Result<()> {
        let opened = self.opened.write().take().ok_or(BplusError::NotOpen)?;
        let path = opened.path.clone();

        match Arc::try_unwrap(opened) {
            Ok(opened) => {
                opened.close()?;
                info!(path = %path.display(), "Store closed");
            }
            Err(shared) => {
                info!(
                    path = %path.display(),
                    holders = Arc::strong_count(&shared) - 1,
                    "Store closed; engine released after in-flight tasks"
                );
            }
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.opened.read().is_some()
    }

    /// Path of the opened engine
    pub fn path(&self) -> Option<PathBuf> {
        self.opened.read().as_ref().map(|o| o.path.clone())
    }

    /// Tasks whose engine call has been dispatched but not yet returned
    pub fn in_flight(&self) -> usize {
        self.scheduler.in_flight()
    }

    /// Borrow the engine on the calling thread, outside the write gate
    pub fn with_engine<R>(&self, f: impl FnOnce(&E) -> R) -> Result<R> {
        let opened = self.opened()?;
        Ok(f(opened.engine()))
    }

    fn opened(&self) -> Result<Arc<OpenStore<E>>> {
        self.opened.read().clone().ok_or(BplusError::NotOpen)
    }

    fn submit<T, F>(&self, op: Operation, complete: F) -> Result<Completion<T>>
    where
        T: Send + 'static,
        F: FnOnce(TaskOutput) -> Result<T> + Send + 'static,
    {
        let opened = self.opened()?;
        self.scheduler.submit(opened, Task::new(op), complete)
    }

    pub fn set(&self, key: impl Into<Key>, value: impl Into<Value>) -> Result<Completion<()>> {
        let key = key.into();
        key.validate("key")?;
        let value = value.into();
        self.submit(Operation::Set { key, value }, |_| Ok(()))
    }

    /// Insert a batch in one engine call
    pub fn bulk_set<I, K, V>(&self, pairs: I) -> Result<Completion<()>>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Key>,
        V: Into<Value>,
    {
        let pairs = collect_pairs(pairs)?;
        self.submit(Operation::BulkSet { pairs }, |_| Ok(()))
    }

    pub fn get(&self, key: impl Into<Key>) -> Result<Completion<Value>> {
        let key = key.into();
        key.validate("key")?;
        self.submit(Operation::Get { key }, |output| match output {
            TaskOutput::Value(record) => Ok(record.value),
            other => Err(unexpected_output("get", other)),
        })
    }

    /// Like [`get`](Self::get), also returning the version ref
    pub fn get_with_ref(&self, key: impl Into<Key>) -> Result<Completion<ValueRecord>> {
        let key = key.into();
        key.validate("key")?;
        self.submit(Operation::Get { key }, |output| match output {
            TaskOutput::Value(record) => Ok(record),
            other => Err(unexpected_output("get", other)),
        })
    }

    /// Resolve the version that preceded `reference`
    pub fn get_previous(&self, reference: ValueRef) -> Result<Completion<ValueRecord>> {
        self.submit(Operation::GetPrevious { reference }, |output| match output {
            TaskOutput::Value(record) => Ok(record),
            other => Err(unexpected_output("get_previous", other)),
        })
    }

    pub fn remove(&self, key: impl Into<Key>) -> Result<Completion<()>> {
        let key = key.into();
        key.validate("key")?;
        self.submit(Operation::Remove { key }, |_| Ok(()))
    }

    /// Drop superseded versions; resolves to the number reclaimed
    pub fn compact(&self) -> Result<Completion<u64>> {
        self.submit(Operation::Compact, |output| match output {
            TaskOutput::Compacted(reclaimed) => Ok(reclaimed),
            other => Err(unexpected_output("compact", other)),
        })
    }

    /// Stream the records in `[start, end)` in key order.
    ///
    /// An empty `start` scans from the first key; an empty `end` scans to
    /// the last.
    pub fn get_range(&self, start: impl Into<Key>, end: impl Into<Key>) -> Result<RangeStream> {
        self.start_range(start.into(), end.into(), None)
    }

    fn start_range(&self, start: Key, end: Key, filter: Option<StreamFilter>) -> Result<RangeStream> {
        check_bounds(&start, &end)?;
        let opened = self.opened()?;

        let queue = Arc::new(StreamQueue::new());
        let cancelled = Arc::new(AtomicBool::new(false));
        let sink = RangeSink::new(Arc::clone(&queue), Arc::clone(&cancelled));
        let op = if filter.is_some() {
            Operation::GetFilteredRange { start, end, sink }
        } else {
            Operation::GetRange { start, end, sink }
        };

        let keep_alive: KeepAlive = opened.clone();
        let worker = self.scheduler.dispatch(opened, Task::new(op))?;
        Ok(RangeStream::new(queue, worker, keep_alive, cancelled, filter))
    }

    /// Insert or update `key`, consulting `decide(previous, current)` on the
    /// calling thread when the key already exists. A reject fails with an
    /// update conflict and leaves the stored value untouched.
    pub fn update<D>(
        &self,
        key: impl Into<Key>,
        value: impl Into<Value>,
        mut decide: impl FnMut(&[u8], &[u8]) -> D,
    ) -> Result<()>
    where
        D: Into<Decision>,
    {
        let key = key.into();
        key.validate("key")?;
        let value = value.into();
        let opened = self.opened()?;

        opened.gate().run(|| {
            opened
                .engine()
                .update(&key, &value, &mut |previous, current| {
                    decide(previous, current).into()
                })
        })?;
        Ok(())
    }

    /// Batch form of [`update`](Self::update); a reject rolls back the batch
    pub fn bulk_update<I, K, V, D>(
        &self,
        pairs: I,
        mut decide: impl FnMut(&[u8], &[u8]) -> D,
    ) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Key>,
        V: Into<Value>,
        D: Into<Decision>,
    {
        let pairs = collect_pairs(pairs)?;
        let opened = self.opened()?;

        opened.gate().run(|| {
            opened
                .engine()
                .bulk_update(&pairs, &mut |previous, current| {
                    decide(previous, current).into()
                })
        })?;
        Ok(())
    }

    /// Remove `key` if `decide(value)` accepts; a reject fails with a remove
    /// conflict
    pub fn remove_conditional<D>(
        &self,
        key: impl Into<Key>,
        mut decide: impl FnMut(&[u8]) -> D,
    ) -> Result<()>
    where
        D: Into<Decision>,
    {
        let key = key.into();
        key.validate("key")?;
        let opened = self.opened()?;

        opened.gate().run(|| {
            opened
                .engine()
                .remove_conditional(&key, &mut |value| decide(value).into())
        })?;
        Ok(())
    }

    /// Scan `[start, end)` on the calling thread.
    ///
    /// `filter` chooses which keys are visited; `visit` receives each
    /// accepted record and then exactly one terminal event. An engine error
    /// is both delivered to `visit` and returned.
    pub fn get_filtered_range<D>(
        &self,
        start: impl Into<Key>,
        end: impl Into<Key>,
        mut filter: impl FnMut(&[u8]) -> D,
        mut visit: impl FnMut(RangeEvent),
    ) -> Result<()>
    where
        D: Into<Decision>,
    {
        let (start, end) = (start.into(), end.into());
        check_bounds(&start, &end)?;
        let opened = self.opened()?;

        let result = opened.engine().filtered_range(
            &start,
            &end,
            &mut |key| filter(key).into(),
            &mut |key, value, reference| {
                visit(RangeEvent::Record(Record::copy_from(key, value, reference)));
                true
            },
        );

        match result {
            Ok(()) => {
                visit(RangeEvent::End);
                Ok(())
            }
            Err(e) => {
                visit(RangeEvent::Error(e.clone().into()));
                Err(e.into())
            }
        }
    }

    /// Offloaded [`update`](Self::update): the worker waits while a runtime
    /// task runs `decide`
    pub fn update_async<D>(
        &self,
        key: impl Into<Key>,
        value: impl Into<Value>,
        mut decide: impl FnMut(&[u8], &[u8]) -> D + Send + 'static,
    ) -> Result<Completion<()>>
    where
        D: Into<Decision>,
    {
        let key = key.into();
        key.validate("key")?;
        let value = value.into();
        let opened = self.opened()?;

        let (decisions, responder) = rendezvous::channel();
        let task = Task::new(Operation::Update {
            key,
            value,
            decisions,
        });
        self.scheduler
            .submit_decided(opened, task, responder, move |candidate| match candidate {
                Candidate::Update { previous, current } => {
                    decide(previous.as_bytes(), current.as_bytes()).into()
                }
                _ => Decision::Reject,
            })
    }

    /// Offloaded [`bulk_update`](Self::bulk_update)
    pub fn bulk_update_async<I, K, V, D>(
        &self,
        pairs: I,
        mut decide: impl FnMut(&[u8], &[u8]) -> D + Send + 'static,
    ) -> Result<Completion<()>>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Key>,
        V: Into<Value>,
        D: Into<Decision>,
    {
        let pairs = collect_pairs(pairs)?;
        let opened = self.opened()?;

        let (decisions, responder) = rendezvous::channel();
        let task = Task::new(Operation::BulkUpdate { pairs, decisions });
        self.scheduler
            .submit_decided(opened, task, responder, move |candidate| match candidate {
                Candidate::Update { previous, current } => {
                    decide(previous.as_bytes(), current.as_bytes()).into()
                }
                _ => Decision::Reject,
            })
    }

    /// Offloaded [`remove_conditional`](Self::remove_conditional)
    pub fn remove_conditional_async<D>(
        &self,
        key: impl Into<Key>,
        mut decide: impl FnMut(&[u8]) -> D + Send + 'static,
    ) -> Result<Completion<()>>
    where
        D: Into<Decision>,
    {
        let key = key.into();
        key.validate("key")?;
        let opened = self.opened()?;

        let (decisions, responder) = rendezvous::channel();
        let task = Task::new(Operation::RemoveConditional { key, decisions });
        self.scheduler
            .submit_decided(opened, task, responder, move |candidate| match candidate {
                Candidate::Remove { value } => decide(value.as_bytes()).into(),
                _ => Decision::Reject,
            })
    }

    /// Filtered scan on a worker. `filter` runs on the task consuming the
    /// stream, once per key, before that key's record is produced.
    pub fn get_filtered_range_async<D>(
        &self,
        start: impl Into<Key>,
        end: impl Into<Key>,
        mut filter: impl FnMut(&[u8]) -> D + Send + 'static,
    ) -> Result<RangeStream>
    where
        D: Into<Decision>,
    {
        let boxed: StreamFilter = Box::new(move |key: &[u8]| -> Decision { filter(key).into() });
        self.start_range(start.into(), end.into(), Some(boxed))
    }
}

impl<E: Engine> Drop for Store<E> {
    fn drop(&mut self) {
        if let Some(opened) = self.opened.get_mut().take() {
            debug!(path = %opened.path.display(), "Store dropped while open");
        }
    }
}

fn collect_pairs<I, K, V>(pairs: I) -> Result<Vec<(Key, Value)>>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<Key>,
    V: Into<Value>,
{
    pairs
        .into_iter()
        .map(|(k, v)| {
            let key = k.into();
            key.validate("key")?;
            Ok((key, v.into()))
        })
        .collect()
}

fn check_bounds(start: &Key, end: &Key) -> Result<()> {
    if !start.is_empty() && !end.is_empty() && start.as_bytes() > end.as_bytes() {
        return Err(BplusError::InvalidArgument(format!(
            "range start {:?} is past end {:?}",
            start, end
        )));
    }
    Ok(())
}

fn unexpected_output(op: &str, output: TaskOutput) -> BplusError {
    BplusError::Internal(format!("{} produced unexpected output {:?}", op, output))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store() -> (TempDir, Store) {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::with_config(StoreConfig::default().with_map_size(16 * 1024 * 1024));
        store.open(temp_dir.path()).unwrap();
        (temp_dir, store)
    }

    #[test]
    fn test_operations_require_open() {
        let store: Store = Store::new();
        assert!(matches!(store.set("k", "v"), Err(BplusError::NotOpen)));
        assert!(matches!(store.get_range("a", "z"), Err(BplusError::NotOpen)));
        assert!(matches!(store.close(), Err(BplusError::NotOpen)));
    }

    #[test]
    fn test_double_open_fails() {
        let (dir, store) = open_store();
        assert!(matches!(store.open(dir.path()), Err(BplusError::AlreadyOpen)));
        store.close().unwrap();
        assert!(!store.is_open());
    }

    #[test]
    fn test_missing_runtime_is_a_precondition_error() {
        let (_dir, store) = open_store();
        assert!(matches!(store.set("k", "v"), Err(BplusError::NoRuntime)));
        assert_eq!(store.in_flight(), 0);
    }

    #[test]
    fn test_empty_key_rejected() {
        let (_dir, store) = open_store();
        assert!(matches!(
            store.update("", "v", |_, _| true),
            Err(BplusError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_inverted_bounds_rejected() {
        let (_dir, store) = open_store();
        let err = store
            .get_filtered_range("z", "a", |_| true, |_| {})
            .unwrap_err();
        assert!(matches!(err, BplusError::InvalidArgument(_)));
    }

    #[test]
    fn test_inline_decisions() {
        let (_dir, store) = open_store();
        store.update("k", "v1", |_, _| ()).unwrap();

        let err = store.update("k", "v2", |_, _| false).unwrap_err();
        assert_eq!(err.status(), Some(bplus_core::Status::UPDATE_CONFLICT));

        store.update("k", "v2", |prev, _| prev == b"v1").unwrap();

        let err = store.remove_conditional("k", |_| false).unwrap_err();
        assert_eq!(err.status(), Some(bplus_core::Status::REMOVE_CONFLICT));
        store.remove_conditional("k", |_| None::<bool>).unwrap();

        let err = store.remove_conditional("k", |_| true).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_inline_filtered_range_events() {
        let (_dir, store) = open_store();
        store
            .bulk_update(vec![("a", "1"), ("b", "2"), ("c", "3")], |_, _| true)
            .unwrap();

        let mut keys = Vec::new();
        let mut terminals = 0;
        store
            .get_filtered_range(
                "a",
                "z",
                |key| key != b"b",
                |event| match event {
                    RangeEvent::Record(record) => keys.push(record.key.into_vec()),
                    RangeEvent::End => terminals += 1,
                    RangeEvent::Error(e) => panic!("unexpected error {}", e),
                },
            )
            .unwrap();

        assert_eq!(keys, vec![b"a".to_vec(), b"c".to_vec()]);
        assert_eq!(terminals, 1);
    }
}
