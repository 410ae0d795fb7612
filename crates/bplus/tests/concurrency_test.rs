//! Concurrency guarantees: single writer, keep-alive of the engine while
//! tasks are in flight, and deferred close

use bplus::prelude::*;
use bplus::{EngineError, EngineResult, UpdateDecider, ValueDecider, VisitFn};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tempfile::TempDir;

/// Counters shared between a probe engine and the test that opened it
#[derive(Default)]
struct Probe {
    active_writers: AtomicUsize,
    max_writers: AtomicUsize,
    writes: AtomicUsize,
    closes: AtomicUsize,
}

fn probes() -> &'static Mutex<HashMap<PathBuf, Arc<Probe>>> {
    static PROBES: OnceLock<Mutex<HashMap<PathBuf, Arc<Probe>>>> = OnceLock::new();
    PROBES.get_or_init(|| Mutex::new(HashMap::new()))
}

fn probe_for(path: &Path) -> Arc<Probe> {
    probes()
        .lock()
        .get(path)
        .cloned()
        .expect("probe engine opened at path")
}

/// In-memory engine that records how many writers overlap. Writing the key
/// `slow` takes 200ms.
struct ProbeEngine {
    data: Mutex<BTreeMap<Vec<u8>, (Vec<u8>, u64)>>,
    next_ref: AtomicU64,
    probe: Arc<Probe>,
}

impl ProbeEngine {
    fn write<R>(&self, key: &[u8], f: impl FnOnce() -> R) -> R {
        let now = self.probe.active_writers.fetch_add(1, Ordering::SeqCst) + 1;
        self.probe.max_writers.fetch_max(now, Ordering::SeqCst);

        let pause = if key == b"slow" {
            Duration::from_millis(200)
        } else {
            Duration::from_millis(1)
        };
        std::thread::sleep(pause);
        let result = f();

        self.probe.writes.fetch_add(1, Ordering::SeqCst);
        self.probe.active_writers.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn insert(&self, key: &[u8], value: &[u8]) {
        let reference = self.next_ref.fetch_add(1, Ordering::SeqCst);
        self.data
            .lock()
            .insert(key.to_vec(), (value.to_vec(), reference));
    }
}

impl Engine for ProbeEngine {
    fn open(path: &Path, _config: &EngineConfig) -> EngineResult<Self> {
        let probe = Arc::new(Probe::default());
        probes().lock().insert(path.to_path_buf(), Arc::clone(&probe));
        Ok(Self {
            data: Mutex::new(BTreeMap::new()),
            next_ref: AtomicU64::new(1),
            probe,
        })
    }

    fn close(&self) -> EngineResult<()> {
        self.probe.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn set(&self, key: &[u8], value: &[u8]) -> EngineResult<()> {
        self.write(key, || self.insert(key, value));
        Ok(())
    }

    fn bulk_set(&self, pairs: &[(Key, Value)]) -> EngineResult<()> {
        self.write(b"bulk", || {
            for (key, value) in pairs {
                self.insert(key, value);
            }
        });
        Ok(())
    }

    fn update(&self, key: &[u8], value: &[u8], decide: &mut UpdateDecider<'_>) -> EngineResult<()> {
        self.write(key, || {
            let previous = self.data.lock().get(key).map(|(v, _)| v.clone());
            if let Some(previous) = previous {
                if !decide(previous.as_slice(), value).is_accept() {
                    return Err(EngineError::new(Status::UPDATE_CONFLICT, "rejected"));
                }
            }
            self.insert(key, value);
            Ok(())
        })
    }

    fn bulk_update(
        &self,
        pairs: &[(Key, Value)],
        decide: &mut UpdateDecider<'_>,
    ) -> EngineResult<()> {
        for (key, value) in pairs {
            self.update(key, value, decide)?;
        }
        Ok(())
    }

    fn get_with(&self, key: &[u8], read: &mut dyn FnMut(&[u8], ValueRef)) -> EngineResult<()> {
        let data = self.data.lock();
        let (value, reference) = data.get(key).ok_or_else(EngineError::not_found)?;
        read(value, ValueRef::new(*reference));
        Ok(())
    }

    fn get_previous(&self, _reference: ValueRef) -> EngineResult<ValueRecord> {
        Err(EngineError::not_found())
    }

    fn remove(&self, key: &[u8]) -> EngineResult<()> {
        self.write(key, || {
            self.data
                .lock()
                .remove(key)
                .map(|_| ())
                .ok_or_else(EngineError::not_found)
        })
    }

    fn remove_conditional(&self, key: &[u8], decide: &mut ValueDecider<'_>) -> EngineResult<()> {
        self.write(key, || {
            let current = self.data.lock().get(key).map(|(v, _)| v.clone());
            match current {
                None => Err(EngineError::not_found()),
                Some(value) if !decide(value.as_slice()).is_accept() => {
                    Err(EngineError::new(Status::REMOVE_CONFLICT, "rejected"))
                }
                Some(_) => {
                    self.data.lock().remove(key);
                    Ok(())
                }
            }
        })
    }

    fn compact(&self) -> EngineResult<u64> {
        self.write(b"compact", || Ok(0))
    }

    fn range(&self, start: &[u8], end: &[u8], visit: &mut VisitFn<'_>) -> EngineResult<()> {
        let snapshot: Vec<_> = self
            .data
            .lock()
            .iter()
            .filter(|(k, _)| k.as_slice() >= start && (end.is_empty() || k.as_slice() < end))
            .map(|(k, (v, r))| (k.clone(), v.clone(), *r))
            .collect();
        for (key, value, reference) in snapshot {
            if !visit(&key, &value, ValueRef::new(reference)) {
                break;
            }
        }
        Ok(())
    }
}

fn open_probe_store() -> Result<(TempDir, Arc<Store<ProbeEngine>>, Arc<Probe>)> {
    let temp_dir = TempDir::new()?;
    let store = Store::<ProbeEngine>::new();
    store.open(temp_dir.path())?;
    let probe = probe_for(temp_dir.path());
    Ok((temp_dir, Arc::new(store), probe))
}

async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mutating_calls_never_overlap() -> Result<()> {
    let (_dir, store, probe) = open_probe_store()?;

    let mut handles = Vec::new();
    for i in 0..64 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            let key = format!("key{:02}", i);
            store.set(key.as_str(), "v")?.await?;
            store.update_async(key.as_str(), "w", |_, _| true)?.await?;
            store.update_async(key.as_str(), "x", |_, _| true)?.await
        }));
    }
    for handle in handles {
        handle
            .await
            .map_err(|e| BplusError::Internal(e.to_string()))??;
    }

    assert_eq!(probe.max_writers.load(Ordering::SeqCst), 1);
    assert_eq!(probe.writes.load(Ordering::SeqCst), 64 * 3);
    assert_eq!(store.get("key63")?.await?, b"x");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reads_do_not_wait_for_writer() -> Result<()> {
    let (_dir, store, _probe) = open_probe_store()?;
    store.set("k", "v")?.await?;

    let slow = store.set("slow", "v")?;
    // The slow write holds the gate for 200ms; a read completes meanwhile
    let value = tokio::time::timeout(Duration::from_millis(150), store.get("k")?)
        .await
        .map_err(|e| BplusError::Internal(e.to_string()))??;
    assert_eq!(value, b"v");

    slow.await?;
    Ok(())
}

#[tokio::test]
async fn test_close_defers_engine_until_tasks_finish() -> Result<()> {
    let (_dir, store, probe) = open_probe_store()?;

    let slow = store.set("slow", "v")?;
    assert_eq!(store.in_flight(), 1);

    store.close()?;
    assert!(!store.is_open());
    assert!(matches!(store.get("slow"), Err(BplusError::NotOpen)));
    assert_eq!(probe.closes.load(Ordering::SeqCst), 0);

    // The in-flight task still completes against the live engine
    slow.await?;
    assert!(wait_for(|| probe.closes.load(Ordering::SeqCst) == 1).await);
    assert_eq!(store.in_flight(), 0);
    Ok(())
}

#[tokio::test]
async fn test_close_without_tasks_is_immediate() -> Result<()> {
    let (_dir, store, probe) = open_probe_store()?;
    store.set("k", "v")?.await?;

    store.close()?;
    assert_eq!(probe.closes.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn test_dropped_handle_keeps_engine_alive() -> Result<()> {
    let (_dir, store, probe) = open_probe_store()?;

    let slow = store.set("slow", "v")?;
    let stream = store.get_range("", "")?;
    drop(store);

    assert_eq!(probe.closes.load(Ordering::SeqCst), 0);
    slow.await?;
    let records = stream.collect_records().await?;
    assert!(records.len() <= 1);

    assert!(wait_for(|| probe.closes.load(Ordering::SeqCst) == 1).await);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sets_on_lmdb() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let store: Arc<Store> = Arc::new(Store::with_config(
        StoreConfig::default().with_map_size(32 * 1024 * 1024),
    ));
    store.open(temp_dir.path())?;

    let completions: Vec<_> = (0..200)
        .map(|i| store.set(format!("key{:03}", i), format!("value{}", i)))
        .collect::<Result<_>>()?;
    for completion in futures::future::join_all(completions).await {
        completion?;
    }

    let records = store.get_range("", "")?.collect_records().await?;
    assert_eq!(records.len(), 200);
    assert_eq!(store.with_engine(|engine| engine.meta())??.keys, 200);
    Ok(())
}
