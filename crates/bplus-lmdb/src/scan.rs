use bplus_core::{EngineError, EngineResult, Status, VisitFn};
use lmdb::{Cursor, Database, Transaction};

use crate::error::map_lmdb_err;
use crate::keys::{decode_version, key_to_ref};

/// Walk `[start, end)` of the index under one read transaction.
///
/// Each index entry is resolved to its current version and handed to
/// `visit` with slices borrowed from the transaction. Stops early when
/// `visit` returns false.
pub(crate) fn scan_range<T: Transaction>(
    txn: &T,
    index_db: Database,
    values_db: Database,
    start: &[u8],
    end: &[u8],
    visit: &mut VisitFn<'_>,
) -> EngineResult<u64> {
    let mut cursor = txn.open_ro_cursor(index_db).map_err(map_lmdb_err)?;

    // LMDB rejects empty keys, so an empty start means "from the beginning"
    let iter = if !start.is_empty() {
        cursor.iter_from(start)
    } else {
        cursor.iter_start()
    };

    let mut visited = 0u64;
    for (key, ref_bytes) in iter {
        let key_bytes: &[u8] = key;
        if !end.is_empty() && key_bytes >= end {
            break;
        }

        let reference = key_to_ref(ref_bytes)
            .ok_or_else(|| EngineError::new(Status::FILE_READ, "malformed index entry"))?;
        let stored = txn
            .get(values_db, &reference.to_bytes())
            .map_err(map_lmdb_err)?;
        let (_, value) = decode_version(stored)
            .ok_or_else(|| EngineError::new(Status::FILE_READ, "malformed version record"))?;

        visited += 1;
        if !visit(key_bytes, value, reference) {
            break;
        }
    }

    Ok(visited)
}

/// Collect every ref reachable from the index
pub(crate) fn live_refs<T: Transaction>(
    txn: &T,
    index_db: Database,
) -> EngineResult<std::collections::HashSet<u64>> {
    let mut cursor = txn.open_ro_cursor(index_db).map_err(map_lmdb_err)?;
    let mut live = std::collections::HashSet::new();
    for (_, ref_bytes) in cursor.iter_start() {
        if let Some(reference) = key_to_ref(ref_bytes) {
            live.insert(reference.raw());
        }
    }
    Ok(live)
}

/// Collect version refs not present in `live`
pub(crate) fn dead_versions<T: Transaction>(
    txn: &T,
    values_db: Database,
    live: &std::collections::HashSet<u64>,
) -> EngineResult<Vec<[u8; 8]>> {
    let mut cursor = txn.open_ro_cursor(values_db).map_err(map_lmdb_err)?;
    let mut dead = Vec::new();
    for (ref_key, _) in cursor.iter_start() {
        if let Some(reference) = key_to_ref(ref_key) {
            if !live.contains(&reference.raw()) {
                dead.push(reference.to_bytes());
            }
        }
    }
    Ok(dead)
}
