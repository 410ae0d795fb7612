//! LMDB-backed engine for bplus
//!
//! Implements the append-only B+tree value model on top of LMDB:
//! - `index` maps each key to the ref of its current version
//! - `values` holds every version, linked to the one it replaced
//! - `meta` tracks the ref counter and timestamps
//!
//! Key features:
//! - Big-endian ref encoding for proper sort order
//! - History walk via `get_previous` until compaction
//! - Decision callbacks evaluated inside the write transaction, so a reject
//!   aborts without touching stored data
//! - Concurrent readers (LMDB MVCC); writers are serialized by the caller

mod error;
pub mod engine;
pub mod keys;
mod scan;

pub use engine::{EngineMeta, LmdbEngine};
