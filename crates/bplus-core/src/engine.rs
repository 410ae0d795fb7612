use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::types::{Decision, Key, Value, ValueRecord, ValueRef};
use std::path::Path;

/// Per-record scan callback: `(key, value, ref) -> continue?`
///
/// Slices point into engine-owned memory and are only valid for the duration
/// of the call.
pub type VisitFn<'a> = dyn FnMut(&[u8], &[u8], ValueRef) -> bool + 'a;

/// Key filter for filtered scans
pub type FilterFn<'a> = dyn FnMut(&[u8]) -> Decision + 'a;

/// Update conflict resolver: `(previous, current) -> decision`
pub type UpdateDecider<'a> = dyn FnMut(&[u8], &[u8]) -> Decision + 'a;

/// Conditional remove check on the stored value
pub type ValueDecider<'a> = dyn FnMut(&[u8]) -> Decision + 'a;

/// Ordered key/value engine (B+tree)
///
/// Every call is synchronous and may block on disk I/O. Implementations must
/// allow concurrent readers; callers serialize mutating calls themselves.
pub trait Engine: Send + Sync + 'static {
    /// Open the engine at `path`
    fn open(path: &Path, config: &EngineConfig) -> EngineResult<Self>
    where
        Self: Sized;

    /// Flush and release engine resources
    fn close(&self) -> EngineResult<()>;

    /// Insert or overwrite a key
    fn set(&self, key: &[u8], value: &[u8]) -> EngineResult<()>;

    /// Insert an ordered batch in one engine call
    fn bulk_set(&self, pairs: &[(Key, Value)]) -> EngineResult<()>;

    /// Insert or update a key.
    ///
    /// If the key exists, `decide(previous, current)` is consulted and a
    /// reject leaves the previous value in place with
    /// [`Status::UPDATE_CONFLICT`](crate::Status::UPDATE_CONFLICT).
    fn update(&self, key: &[u8], value: &[u8], decide: &mut UpdateDecider<'_>)
        -> EngineResult<()>;

    /// Batch form of [`update`](Self::update); a reject stops the batch
    fn bulk_update(&self, pairs: &[(Key, Value)], decide: &mut UpdateDecider<'_>)
        -> EngineResult<()>;

    /// Point lookup. `read` sees the engine-owned value bytes.
    fn get_with(&self, key: &[u8], read: &mut dyn FnMut(&[u8], ValueRef)) -> EngineResult<()>;

    /// Point lookup copying the value out of engine memory
    fn get(&self, key: &[u8]) -> EngineResult<ValueRecord> {
        let mut found = None;
        self.get_with(key, &mut |value, reference| {
            found = Some(ValueRecord {
                value: Value::copy_from(value),
                reference,
            });
        })?;
        found.ok_or_else(EngineError::not_found)
    }

    /// Resolve the version that preceded `reference`
    fn get_previous(&self, reference: ValueRef) -> EngineResult<ValueRecord>;

    /// Remove a key
    fn remove(&self, key: &[u8]) -> EngineResult<()>;

    /// Remove a key if `decide(current)` accepts; a reject reports
    /// [`Status::REMOVE_CONFLICT`](crate::Status::REMOVE_CONFLICT)
    fn remove_conditional(&self, key: &[u8], decide: &mut ValueDecider<'_>) -> EngineResult<()>;

    /// Reclaim space held by superseded versions. Returns the number of
    /// versions reclaimed.
    fn compact(&self) -> EngineResult<u64>;

    /// Scan `[start, end)` in key order until exhausted or `visit` returns false
    fn range(&self, start: &[u8], end: &[u8], visit: &mut VisitFn<'_>) -> EngineResult<()>;

    /// Scan `[start, end)`, visiting only keys the filter accepts
    fn filtered_range(
        &self,
        start: &[u8],
        end: &[u8],
        filter: &mut FilterFn<'_>,
        visit: &mut VisitFn<'_>,
    ) -> EngineResult<()> {
        self.range(start, end, &mut |key, value, reference| {
            if filter(key).is_accept() {
                visit(key, value, reference)
            } else {
                true
            }
        })
    }
}
