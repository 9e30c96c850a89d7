//! LMDB Level Store
//!
//! Embedded, memory-mapped persistence for finished levels. One record per
//! session: key is the session id (big-endian u64), value is a bincode
//! [`StoredLevel`] envelope carrying the level's validation hash.
//!
//! ## Usage
//! ```rust,ignore
//! use dungeon_server::storage::LmdbLevelStore;
//!
//! let store = LmdbLevelStore::new("./data/levels", 64 * 1024 * 1024)?;
//! store.save_level(SessionId(1), &level).await?;
//! ```

use async_trait::async_trait;
use heed::byteorder::BigEndian;
use heed::types::{Bytes, U64};
use heed::{Database, Env, EnvOpenOptions};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use dungeon_core::{Level, Room};

use super::repository::{apply_room, LevelRepository, StorageResult};
use super::{StorageError, StoredLevel};
use crate::orchestrator::SessionId;

type LevelDb = Database<U64<BigEndian>, Bytes>;

#[derive(Clone)]
pub struct LmdbLevelStore {
    env: Arc<Env>,
    levels: LevelDb,
}

impl std::fmt::Debug for LmdbLevelStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmdbLevelStore")
            .field("path", &self.env.path())
            .finish()
    }
}

impl LmdbLevelStore {
    /// Open (or create) the store at `path`.
    ///
    /// `max_size_bytes` must be a multiple of the OS page size;
    /// `ServerConfig` rounds it.
    pub fn new<P: AsRef<Path>>(path: P, max_size_bytes: usize) -> Result<Self, StorageError> {
        info!(
            path = %path.as_ref().display(),
            max_size_bytes,
            "opening LMDB level store"
        );
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_bytes)
                .max_dbs(1)
                .open(path)?
        };

        let mut wtxn = env.write_txn()?;
        let levels: LevelDb = env.create_database(&mut wtxn, Some("levels"))?;
        wtxn.commit()?;

        Ok(Self {
            env: Arc::new(env),
            levels,
        })
    }

    /// Full envelope, including saved-at timestamp and validation hash
    pub fn stored(&self, session: SessionId) -> StorageResult<Option<StoredLevel>> {
        let rtxn = self.env.read_txn()?;
        match self.levels.get(&rtxn, &session.0)? {
            Some(bytes) => Ok(Some(StoredLevel::decode(bytes)?)),
            None => Ok(None),
        }
    }

    pub fn delete(&self, session: SessionId) -> StorageResult<bool> {
        let mut wtxn = self.env.write_txn()?;
        let removed = self.levels.delete(&mut wtxn, &session.0)?;
        wtxn.commit()?;
        debug!(%session, removed, "LMDB level deleted");
        Ok(removed)
    }

    pub fn len(&self) -> StorageResult<u64> {
        let rtxn = self.env.read_txn()?;
        Ok(self.levels.len(&rtxn)?)
    }

    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Explicit fsync
    pub fn sync(&self) -> StorageResult<()> {
        self.env.force_sync()?;
        Ok(())
    }
}

#[async_trait]
impl LevelRepository for LmdbLevelStore {
    async fn save_level(&self, session: SessionId, level: &Level) -> StorageResult<()> {
        let bytes = StoredLevel::new(session, level.clone()).encode()?;
        let mut wtxn = self.env.write_txn()?;
        self.levels.put(&mut wtxn, &session.0, &bytes)?;
        wtxn.commit()?;
        debug!(%session, bytes = bytes.len(), "LMDB level saved");
        Ok(())
    }

    async fn load_level(&self, session: SessionId) -> StorageResult<Option<Level>> {
        match self.stored(session) {
            Ok(stored) => Ok(stored.map(|s| s.level)),
            Err(e) => {
                warn!(%session, error = %e, "LMDB level unreadable");
                Err(e)
            }
        }
    }

    async fn save_room(&self, session: SessionId, room: &Room) -> StorageResult<()> {
        // read-modify-write inside one write transaction
        let mut wtxn = self.env.write_txn()?;
        let mut stored = match self.levels.get(&wtxn, &session.0)? {
            Some(bytes) => StoredLevel::decode(bytes)?,
            None => return Err(StorageError::NotFound(session)),
        };
        apply_room(&mut stored.level, room);
        let bytes = stored.encode()?;
        self.levels.put(&mut wtxn, &session.0, &bytes)?;
        wtxn.commit()?;
        debug!(%session, x = room.point.x, y = room.point.y, "LMDB room saved");
        Ok(())
    }

    async fn exists(&self, session: SessionId) -> StorageResult<bool> {
        let rtxn = self.env.read_txn()?;
        Ok(self.levels.get(&rtxn, &session.0)?.is_some())
    }

    async fn delete_level(&self, session: SessionId) -> StorageResult<bool> {
        self.delete(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dungeon_core::{GenerationConfig, LevelPlan, LevelSeed, Point, WalkerIds};

    fn small_level(seed: u64) -> Level {
        let config = GenerationConfig {
            level_width: 8,
            level_height: 4,
            cluster_width: 4,
            cluster_height: 4,
            ..Default::default()
        };
        let plan = LevelPlan::partition(&config, LevelSeed::new(seed, 1)).unwrap();
        plan.generate_parallel(&config, &WalkerIds::new()).unwrap()
    }

    fn open(dir: &tempfile::TempDir) -> LmdbLevelStore {
        LmdbLevelStore::new(dir.path(), 16 * 1024 * 1024).unwrap()
    }

    #[tokio::test]
    async fn test_roundtrip_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let level = small_level(11);
        {
            let store = open(&dir);
            store.save_level(SessionId(5), &level).await.unwrap();
            store.sync().unwrap();
        }

        let store = open(&dir);
        assert!(store.exists(SessionId(5)).await.unwrap());
        assert!(!store.exists(SessionId(6)).await.unwrap());
        let loaded = store.load_level(SessionId(5)).await.unwrap().unwrap();
        assert_eq!(loaded, level);

        let stored = store.stored(SessionId(5)).unwrap().unwrap();
        assert_eq!(stored.validation, level.validation_hex());
        assert_eq!(store.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_save_room_persists_exploration() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir);
        let mut level = small_level(12);
        store.save_level(SessionId(1), &level).await.unwrap();

        let p = Point::new(0, 1);
        let room = level.visit(p).cloned().unwrap();
        store.save_room(SessionId(1), &room).await.unwrap();

        let loaded = store.load_level(SessionId(1)).await.unwrap().unwrap();
        assert!(loaded.room(p).unwrap().visited);
        assert_eq!(loaded.overlay.len(), level.overlay.len());
    }

    #[tokio::test]
    async fn test_missing_level_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir);
        let level = small_level(13);
        let room = level.room(level.end).cloned().unwrap();
        assert!(matches!(
            store.save_room(SessionId(3), &room).await,
            Err(StorageError::NotFound(SessionId(3)))
        ));

        store.save_level(SessionId(3), &level).await.unwrap();
        assert!(store.delete(SessionId(3)).unwrap());
        assert!(!store.delete(SessionId(3)).unwrap());
        assert!(store.is_empty().unwrap());
    }
}
