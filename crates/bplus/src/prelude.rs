//! bplus Prelude
//!
//! ```
//! use bplus::prelude::*;
//! ```

pub use crate::{
    BplusError, Completion, Decision, Key, RangeEvent, RangeStream, Record, Result, Status, Store,
    Value, ValueRecord, ValueRef,
};

pub use crate::{EngineConfig, StoreConfig, SyncMode};

pub use crate::{Engine, LmdbEngine};
