use serde::{Deserialize, Serialize};

/// Durability mode for engines that distinguish between them
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Sync data and metadata on every commit.
    ///
    /// Committed writes survive power loss at the cost of write latency.
    Full,

    /// Skip syncing metadata on each commit (default).
    ///
    /// Data pages are still synced. An OS crash may lose the last commit but
    /// leaves the store consistent.
    #[default]
    NoMetaSync,

    /// Never sync; the OS decides when to flush.
    ///
    /// **WARNING**: only for ephemeral or test workloads.
    NoSync,
}

/// Configuration handed to [`Engine::open`](crate::Engine::open)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum map size in bytes (default: 1GB)
    #[serde(default = "default_map_size")]
    pub map_size: usize,

    /// Maximum number of concurrent readers (default: 126)
    #[serde(default = "default_max_readers")]
    pub max_readers: u32,

    /// Sync mode for durability
    #[serde(default)]
    pub sync_mode: SyncMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            map_size: default_map_size(),
            max_readers: default_max_readers(),
            sync_mode: SyncMode::default(),
        }
    }
}

/// Configuration for a store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Engine options
    #[serde(default)]
    pub engine: EngineConfig,

    /// Create the store directory on open if it is missing (default: true)
    #[serde(default = "default_true")]
    pub create_dir: bool,

    /// Tasks whose engine call runs longer than this are logged at `warn`
    /// (default: 1000ms)
    #[serde(default = "default_slow_task_ms")]
    pub slow_task_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            create_dir: default_true(),
            slow_task_ms: default_slow_task_ms(),
        }
    }
}

fn default_map_size() -> usize {
    1024 * 1024 * 1024 // 1GB
}

fn default_max_readers() -> u32 {
    126
}

fn default_true() -> bool {
    true
}

fn default_slow_task_ms() -> u64 {
    1000
}

impl EngineConfig {
    pub fn with_map_size(mut self, map_size: usize) -> Self {
        self.map_size = map_size;
        self
    }

    pub fn with_max_readers(mut self, max_readers: u32) -> Self {
        self.max_readers = max_readers;
        self
    }

    pub fn with_sync_mode(mut self, sync_mode: SyncMode) -> Self {
        self.sync_mode = sync_mode;
        self
    }
}

impl StoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_sync_mode(mut self, sync_mode: SyncMode) -> Self {
        self.engine.sync_mode = sync_mode;
        self
    }

    pub fn with_map_size(mut self, map_size: usize) -> Self {
        self.engine.map_size = map_size;
        self
    }

    /// Control whether `open` creates a missing store directory
    pub fn with_create_dir(mut self, create_dir: bool) -> Self {
        self.create_dir = create_dir;
        self
    }

    /// Set the slow task warning threshold in milliseconds
    pub fn with_slow_task_ms(mut self, slow_task_ms: u64) -> Self {
        self.slow_task_ms = slow_task_ms;
        self
    }
}
