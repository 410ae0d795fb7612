//! bplus: asynchronous access to a blocking B+tree key/value engine
//!
//! Every engine call runs on tokio's blocking pool so the calling task never
//! waits on disk I/O:
//! - **Tasks**: each operation is a unit of owned work with a completion the
//!   caller awaits
//! - **Write gate**: at most one mutating engine call at a time; reads run
//!   concurrently
//! - **Range streams**: a worker scans in key order while the consumer
//!   receives records through a coalescing queue, ending in exactly one
//!   terminal event
//! - **Decisions**: update/remove/filter callbacks run either inline or on
//!   the runtime while the worker blocks for the answer
//!
//! # Quick Start
//!
//! ```no_run
//! use bplus::prelude::*;
//!
//! # async fn run() -> Result<()> {
//! let store: Store = Store::new();
//! store.open("./data")?;
//!
//! store.set("a", "1")?.await?;
//! store.set("b", "2")?.await?;
//! assert_eq!(store.get("a")?.await?, b"1");
//!
//! let mut range = store.get_range("a", "z")?;
//! while let Some(event) = range.next_event().await {
//!     if let RangeEvent::Record(record) = event {
//!         println!("{:?} => {:?}", record.key, record.value);
//!     }
//! }
//!
//! store.close()?;
//! # Ok(())
//! # }
//! ```

pub mod gate;
pub mod prelude;
pub mod queue;
pub mod rendezvous;
mod scheduler;
mod store;
pub mod stream;
mod task;

// Re-export core types
pub use bplus_core::{
    config::{EngineConfig, StoreConfig, SyncMode},
    engine::{Engine, FilterFn, UpdateDecider, ValueDecider, VisitFn},
    error::{BplusError, EngineError, EngineResult, Result, Status},
    types::{Decision, Key, Record, Value, ValueRecord, ValueRef},
};

// Re-export the default engine
pub use bplus_lmdb::{EngineMeta, LmdbEngine};

// Re-export main types from this crate
pub use rendezvous::{Candidate, DecisionRequest};
pub use scheduler::Completion;
pub use store::Store;
pub use stream::{RangeEvent, RangeStream};
