//! Repository trait - abstraction over level persistence
//!
//! The orchestration layer only talks to this trait, so the backing store
//! (memory, LMDB, cached) can be swapped without touching generation code.

use async_trait::async_trait;
use std::sync::Arc;

use dungeon_core::{Level, Room};

use super::StorageError;
use crate::orchestrator::SessionId;

pub type StorageResult<T> = Result<T, StorageError>;

/// Persistence collaborator for generated levels
#[async_trait]
pub trait LevelRepository: Send + Sync {
    /// Store a finished level, replacing any previous level of the session
    async fn save_level(&self, session: SessionId, level: &Level) -> StorageResult<()>;

    async fn load_level(&self, session: SessionId) -> StorageResult<Option<Level>>;

    /// Overwrite one room of the session's stored level.
    /// Fails with `StorageError::NotFound` if no level is stored.
    async fn save_room(&self, session: SessionId, room: &Room) -> StorageResult<()>;

    async fn exists(&self, session: SessionId) -> StorageResult<bool>;

    /// Remove the session's level; `false` if none was stored
    async fn delete_level(&self, session: SessionId) -> StorageResult<bool>;
}

#[async_trait]
impl<R: LevelRepository + ?Sized> LevelRepository for Arc<R> {
    async fn save_level(&self, session: SessionId, level: &Level) -> StorageResult<()> {
        (**self).save_level(session, level).await
    }

    async fn load_level(&self, session: SessionId) -> StorageResult<Option<Level>> {
        (**self).load_level(session).await
    }

    async fn save_room(&self, session: SessionId, room: &Room) -> StorageResult<()> {
        (**self).save_room(session, room).await
    }

    async fn exists(&self, session: SessionId) -> StorageResult<bool> {
        (**self).exists(session).await
    }

    async fn delete_level(&self, session: SessionId) -> StorageResult<bool> {
        (**self).delete_level(session).await
    }
}

/// Apply a room update to a level, keeping the overlay in step
pub(crate) fn apply_room(level: &mut Level, room: &Room) {
    if room.visited {
        level.overlay.visit(room.point);
    }
    level.rooms.insert(room.point, room.clone());
}
