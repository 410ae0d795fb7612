//! bplus core: traits and types shared by the dispatch layer and its engines
//!
//! This crate defines the seam between the asynchronous store façade and a
//! blocking, ordered key/value engine (a B+tree):
//! - Engine: synchronous operation set returning numeric status codes
//! - Key / Value / ValueRef: owned payloads that move across thread boundaries
//! - Decision: accept/reject answers from caller-supplied callbacks
//! - Configuration for engines and the store
//!
//! Key properties:
//! - Engine calls are blocking and may be slow; callers run them off-thread
//! - Engine-owned bytes handed to scan callbacks are only valid during the call
//! - Every failure carries a stable numeric status

pub mod config;
pub mod engine;
pub mod error;
pub mod observe;
pub mod types;

pub use config::{EngineConfig, StoreConfig, SyncMode};
pub use engine::{Engine, FilterFn, UpdateDecider, ValueDecider, VisitFn};
pub use error::{BplusError, EngineError, EngineResult, Result, Status};
pub use types::{Decision, Key, Record, Value, ValueRecord, ValueRef};
