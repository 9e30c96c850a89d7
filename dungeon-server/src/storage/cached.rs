//! LRU tier in front of any level repository.
//!
//! Reads hit RAM first and fall through to the backing store; writes go
//! through to the backing store before the cache is touched, so a failed
//! write never leaves a level visible only in memory.

use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use dungeon_core::{Level, Room};

use super::repository::{apply_room, LevelRepository, StorageResult};
use crate::orchestrator::SessionId;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub capacity: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

pub struct CachedLevelStore<R> {
    inner: R,
    cache: Mutex<LruCache<SessionId, Level>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<R: LevelRepository> CachedLevelStore<R> {
    /// A zero capacity is bumped to one entry
    pub fn new(inner: R, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    pub fn stats(&self) -> CacheStats {
        let cache = self.cache.lock();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: cache.len(),
            capacity: cache.cap().get(),
        }
    }

    pub fn summary(&self) -> String {
        let s = self.stats();
        format!(
            "Level cache: {}/{} entries, {} hits, {} misses ({:.1}% hit rate)",
            s.entries,
            s.capacity,
            s.hits,
            s.misses,
            s.hit_rate() * 100.0
        )
    }

    pub fn invalidate(&self, session: SessionId) {
        self.cache.lock().pop(&session);
    }
}

#[async_trait]
impl<R: LevelRepository> LevelRepository for CachedLevelStore<R> {
    async fn save_level(&self, session: SessionId, level: &Level) -> StorageResult<()> {
        self.inner.save_level(session, level).await?;
        self.cache.lock().put(session, level.clone());
        Ok(())
    }

    async fn load_level(&self, session: SessionId) -> StorageResult<Option<Level>> {
        if let Some(level) = self.cache.lock().get(&session) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(%session, "level cache HIT");
            return Ok(Some(level.clone()));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(%session, "level cache MISS");
        let loaded = self.inner.load_level(session).await?;
        if let Some(level) = &loaded {
            self.cache.lock().put(session, level.clone());
        }
        Ok(loaded)
    }

    async fn save_room(&self, session: SessionId, room: &Room) -> StorageResult<()> {
        if let Err(e) = self.inner.save_room(session, room).await {
            self.invalidate(session);
            return Err(e);
        }
        if let Some(level) = self.cache.lock().get_mut(&session) {
            apply_room(level, room);
        }
        Ok(())
    }

    async fn exists(&self, session: SessionId) -> StorageResult<bool> {
        if self.cache.lock().contains(&session) {
            return Ok(true);
        }
        self.inner.exists(session).await
    }

    async fn delete_level(&self, session: SessionId) -> StorageResult<bool> {
        self.invalidate(session);
        self.inner.delete_level(session).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryLevelStore, StorageError};
    use dungeon_core::{GenerationConfig, LevelPlan, LevelSeed, WalkerIds};

    fn small_level(seed: u64) -> Level {
        let config = GenerationConfig {
            level_width: 4,
            level_height: 8,
            cluster_width: 4,
            cluster_height: 4,
            ..Default::default()
        };
        let plan = LevelPlan::partition(&config, LevelSeed::new(seed, 1)).unwrap();
        plan.generate_parallel(&config, &WalkerIds::new()).unwrap()
    }

    #[tokio::test]
    async fn test_hits_and_misses() {
        let store = CachedLevelStore::new(MemoryLevelStore::new(), 2);
        let level = small_level(1);
        store.save_level(SessionId(1), &level).await.unwrap();

        assert_eq!(store.load_level(SessionId(1)).await.unwrap(), Some(level));
        assert!(store.load_level(SessionId(2)).await.unwrap().is_none());

        let stats = store.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
        assert!((stats.hit_rate() - 0.5).abs() < 1e-9);
        assert!(store.summary().contains("1 hits"));
    }

    #[tokio::test]
    async fn test_eviction_falls_through_to_backing_store() {
        let store = CachedLevelStore::new(MemoryLevelStore::new(), 1);
        let a = small_level(1);
        let b = small_level(2);
        store.save_level(SessionId(1), &a).await.unwrap();
        store.save_level(SessionId(2), &b).await.unwrap();
        assert_eq!(store.stats().entries, 1);

        // evicted from RAM, still on the backing store
        assert_eq!(store.load_level(SessionId(1)).await.unwrap(), Some(a));
        assert_eq!(store.stats().misses, 1);
        assert_eq!(store.inner().len(), 2);
    }

    #[tokio::test]
    async fn test_room_updates_reach_both_tiers() {
        let store = CachedLevelStore::new(MemoryLevelStore::new(), 4);
        let mut level = small_level(3);
        store.save_level(SessionId(7), &level).await.unwrap();

        let p = level.end;
        let room = level.visit(p).cloned().unwrap();
        store.save_room(SessionId(7), &room).await.unwrap();

        let cached = store.load_level(SessionId(7)).await.unwrap().unwrap();
        let backing = store.inner().load_level(SessionId(7)).await.unwrap().unwrap();
        assert!(cached.room(p).unwrap().visited);
        assert_eq!(cached, backing);

        let missing = store.save_room(SessionId(8), &room).await.unwrap_err();
        assert!(matches!(missing, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_drops_both_tiers() {
        let store = CachedLevelStore::new(MemoryLevelStore::new(), 4);
        store.save_level(SessionId(9), &small_level(4)).await.unwrap();

        assert!(store.delete_level(SessionId(9)).await.unwrap());
        assert!(!store.exists(SessionId(9)).await.unwrap(), "cache must not resurrect a deleted level");
        assert!(store.inner().is_empty());
    }
}
