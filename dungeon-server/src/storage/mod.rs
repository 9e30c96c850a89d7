//! Storage Layer - level persistence keyed by session
//!
//! Implements the repository pattern with interchangeable tiers:
//! - **Memory**: `MemoryLevelStore`, process-local (tests, offline CLI)
//! - **LMDB**: `LmdbLevelStore`, embedded and crash-safe (bincode records)
//! - **LRU Cache**: `CachedLevelStore`, hot levels in RAM in front of any store
//!
//! ## Architecture
//! ```text
//! [LevelService / LevelAssembler]
//!       ↓
//! [LevelRepository trait]
//!       ↓
//! ┌──────────────┬───────────────┐
//! │ CachedLevel  │ → LmdbLevel   │
//! │ Store (LRU)  │   or Memory   │
//! └──────────────┴───────────────┘
//! ```
//!
//! Only complete, stitched levels are ever written. Room updates rewrite the
//! stored level in place so a later load reflects exploration progress.

pub mod cached;
pub mod lmdb;
pub mod memory;
pub mod repository;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use dungeon_core::Level;

use crate::config::ServerConfig;
use crate::orchestrator::SessionId;

pub use self::cached::{CacheStats, CachedLevelStore};
pub use self::lmdb::LmdbLevelStore;
pub use self::memory::MemoryLevelStore;
pub use self::repository::{LevelRepository, StorageResult};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("LMDB error: {0}")]
    Lmdb(#[from] heed::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("no level stored for session {0}")]
    NotFound(SessionId),

    #[error("stored level for session {session} failed validation (expected {expected})")]
    Corrupt { session: SessionId, expected: String },

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// On-disk envelope around a level
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredLevel {
    pub session: SessionId,
    pub saved_at: DateTime<Utc>,
    /// `Level::validation_hex` at save time
    pub validation: String,
    pub level: Level,
}

impl StoredLevel {
    pub fn new(session: SessionId, level: Level) -> Self {
        Self {
            session,
            saved_at: Utc::now(),
            validation: level.validation_hex(),
            level,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, StorageError> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode and check the grid still hashes to the recorded value
    pub fn decode(bytes: &[u8]) -> Result<Self, StorageError> {
        let stored: StoredLevel = bincode::deserialize(bytes)?;
        if stored.level.validation_hex() != stored.validation {
            return Err(StorageError::Corrupt {
                session: stored.session,
                expected: stored.validation,
            });
        }
        Ok(stored)
    }
}

/// Build the storage stack described by `config`.
///
/// LMDB when a path is configured, memory otherwise; wrapped in the LRU tier
/// when `cache_capacity > 0`.
pub fn init_storage(config: &ServerConfig) -> Result<Arc<dyn LevelRepository>, StorageError> {
    let backend: Arc<dyn LevelRepository> = match &config.lmdb_path {
        Some(path) => Arc::new(LmdbLevelStore::new(path, config.lmdb_max_size)?),
        None => Arc::new(MemoryLevelStore::new()),
    };

    let repo: Arc<dyn LevelRepository> = if config.cache_capacity > 0 {
        Arc::new(CachedLevelStore::new(backend, config.cache_capacity))
    } else {
        backend
    };

    info!(
        lmdb = config.lmdb_path.is_some(),
        cache_capacity = config.cache_capacity,
        "storage layer initialized"
    );
    Ok(repo)
}
