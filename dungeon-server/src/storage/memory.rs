//! In-process level store

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

use dungeon_core::{Level, Room};

use super::repository::{apply_room, LevelRepository, StorageResult};
use super::{StorageError, StoredLevel};
use crate::orchestrator::SessionId;

#[derive(Debug, Default)]
pub struct MemoryLevelStore {
    levels: RwLock<HashMap<SessionId, StoredLevel>>,
}

impl MemoryLevelStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.levels.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.read().is_empty()
    }

    pub fn sessions(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.levels.read().keys().copied().collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl LevelRepository for MemoryLevelStore {
    async fn save_level(&self, session: SessionId, level: &Level) -> StorageResult<()> {
        self.levels
            .write()
            .insert(session, StoredLevel::new(session, level.clone()));
        debug!(%session, rooms = level.rooms.len(), "level stored in memory");
        Ok(())
    }

    async fn load_level(&self, session: SessionId) -> StorageResult<Option<Level>> {
        Ok(self.levels.read().get(&session).map(|s| s.level.clone()))
    }

    async fn save_room(&self, session: SessionId, room: &Room) -> StorageResult<()> {
        let mut levels = self.levels.write();
        let stored = levels
            .get_mut(&session)
            .ok_or(StorageError::NotFound(session))?;
        apply_room(&mut stored.level, room);
        Ok(())
    }

    async fn exists(&self, session: SessionId) -> StorageResult<bool> {
        Ok(self.levels.read().contains_key(&session))
    }

    async fn delete_level(&self, session: SessionId) -> StorageResult<bool> {
        Ok(self.levels.write().remove(&session).is_some())
    }
}
