//! Dungeon Session Server Library
//!
//! This library provides the session-side modules for the dungeon generator:
//! - Per-session task scopes with fork/join/cancel and task metrics
//! - Ordering gate between task families and the cluster aggregation channel
//! - Level assembly with explicit missing-cluster and sibling-failure policies
//! - Level persistence (memory, LMDB, LRU tier) and level notifications
//!
//! Generation itself is synchronous and lives in `dungeon_core`.

pub mod assembler;
pub mod cancel;
pub mod config; // ServerConfig + DUNGEON_* env overrides
pub mod content; // Session item pools
pub mod error;
pub mod metrics; // Task metrics (Prometheus + JSON export)
pub mod notify;
pub mod orchestrator;
pub mod service; // End-to-end session flow
pub mod storage; // Level persistence (Memory / LMDB / LRU)
pub mod sync;

// Re-export commonly used types
pub use assembler::LevelAssembler;
pub use cancel::CancelToken;
pub use config::{MissingClusterPolicy, ServerConfig, SiblingFailurePolicy};
pub use error::{SessionError, TaskError};
pub use metrics::{MetricEvent, MetricsSink, TaskMetrics};
pub use notify::{LevelNotifier, LogNotifier, NullNotifier};
pub use orchestrator::{Scope, SessionId, TaskContext, TaskHandle, TaskKind, TaskOrchestrator};
pub use service::{LevelService, PlayerProfile};
pub use storage::{CachedLevelStore, LevelRepository, LmdbLevelStore, MemoryLevelStore, StorageError, StorageResult};
pub use sync::{ClusterPublisher, ClusterReceiver, OrderingGate, SessionSynchronizer};
