//! End-to-end session flow.
//!
//! ```text
//! generate_items ──▶ OrderingGate ──▶ generate_level ─┬─▶ ClusterGeneration × N
//!                         │                           ├─▶ LevelGeneration (stitch)
//!                         └──────▶ generate_player    ├─▶ ContentGeneration
//!                                                     └─▶ LevelGeneration (save) + notify
//! ```
//!
//! Session-fatal errors cancel the session's scope, release its gate and
//! close its channel before they reach the caller.

use parking_lot::Mutex;
use serde::Serialize;
use sha3::{Digest, Sha3_256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use dungeon_core::{
    ClusterGenerator, ClusterSpec, ContentBalancer, Level, LevelPlan, LevelSeed, Point, Room, RoomContent,
};

use crate::assembler::LevelAssembler;
use crate::config::ServerConfig;
use crate::content::{build_item_pool, ItemPoolBalancer};
use crate::error::{SessionError, TaskError};
use crate::metrics::{TaskMetrics, TracingSink};
use crate::notify::LevelNotifier;
use crate::orchestrator::{join_error, Scope, SessionId, TaskHandle, TaskKind, TaskOrchestrator};
use crate::storage::LevelRepository;
use crate::sync::{ClusterPublisher, SessionSynchronizer};

/// Prerequisite families gating level and player generation
const ITEM_FAMILIES: usize = 1;
const ITEM_POOL_SIZE: usize = 24;
const STARTING_ITEMS: usize = 3;

/// Starting state handed to the player family
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerProfile {
    pub session: SessionId,
    pub seed: u64,
    pub loadout: Vec<RoomContent>,
}

pub struct LevelService {
    config: ServerConfig,
    orchestrator: Arc<TaskOrchestrator>,
    sync: Arc<SessionSynchronizer>,
    assembler: LevelAssembler,
    generator: ClusterGenerator,
    repo: Arc<dyn LevelRepository>,
    notifier: Arc<dyn LevelNotifier>,
    balancer: Arc<dyn ContentBalancer>,
    item_pools: Mutex<HashMap<SessionId, Arc<Vec<RoomContent>>>>,
}

impl LevelService {
    pub fn new(
        config: ServerConfig,
        repo: Arc<dyn LevelRepository>,
        notifier: Arc<dyn LevelNotifier>,
        balancer: Arc<dyn ContentBalancer>,
    ) -> Self {
        let metrics = TaskMetrics::with_sink(Arc::new(TracingSink));
        Self::with_metrics(config, repo, notifier, balancer, metrics)
    }

    pub fn with_metrics(
        config: ServerConfig,
        repo: Arc<dyn LevelRepository>,
        notifier: Arc<dyn LevelNotifier>,
        balancer: Arc<dyn ContentBalancer>,
        metrics: Arc<TaskMetrics>,
    ) -> Self {
        let orchestrator = Arc::new(TaskOrchestrator::new(metrics, config.cancel_grace()));
        Self {
            assembler: LevelAssembler::new(&config, repo.clone(), notifier.clone()),
            generator: ClusterGenerator::new(config.generation.clone()),
            orchestrator,
            sync: Arc::new(SessionSynchronizer::new()),
            repo,
            notifier,
            balancer,
            item_pools: Mutex::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn orchestrator(&self) -> &Arc<TaskOrchestrator> {
        &self.orchestrator
    }

    pub fn synchronizer(&self) -> &Arc<SessionSynchronizer> {
        &self.sync
    }

    pub fn metrics(&self) -> &Arc<TaskMetrics> {
        self.orchestrator.metrics()
    }

    pub fn repository(&self) -> &Arc<dyn LevelRepository> {
        &self.repo
    }

    /// SHA3-256 of world seed and session id, first 8 bytes
    pub fn session_seed(&self, session: SessionId) -> u64 {
        let mut hasher = Sha3_256::new();
        hasher.update(self.config.world_seed.to_le_bytes());
        hasher.update(session.0.to_le_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        u64::from_le_bytes(bytes)
    }

    // ------------------------------------------------------------------
    // Prerequisite family
    // ------------------------------------------------------------------

    /// Build the session's item pool and release its ordering gate
    pub async fn generate_items(&self, session: SessionId) -> Result<Arc<Vec<RoomContent>>, SessionError> {
        let scope = self.orchestrator.open_scope(session);
        self.sync.arm(session, ITEM_FAMILIES);

        let balancer = self.balancer.clone();
        let seed = self.session_seed(session);
        let handle = self
            .orchestrator
            .fork_task(&scope, TaskKind::ItemGeneration, None, move |_ctx| async move {
                tokio::task::spawn_blocking(move || build_item_pool(balancer.as_ref(), seed, ITEM_POOL_SIZE))
                    .await
                    .map_err(join_error)
            });

        match handle.join().await {
            Ok(pool) => {
                let pool = Arc::new(pool);
                self.item_pools.lock().insert(session, pool.clone());
                self.sync.complete_prerequisite(session);
                info!(%session, items = pool.len(), "item pool ready");
                Ok(pool)
            }
            Err(e) => Err(self.fail_session(session, task_failure(session, e)).await),
        }
    }

    pub fn item_pool(&self, session: SessionId) -> Option<Arc<Vec<RoomContent>>> {
        self.item_pools.lock().get(&session).cloned()
    }

    // ------------------------------------------------------------------
    // Dependent families
    // ------------------------------------------------------------------

    /// Generate, stitch, furnish and persist the level at `depth`.
    ///
    /// Waits for the session's item family first. At most one run per
    /// session may be in flight.
    pub async fn generate_level(&self, session: SessionId, depth: u32) -> Result<Level, SessionError> {
        let Some(_run) = self.orchestrator.try_begin_level_run(session) else {
            return Err(SessionError::GenerationInProgress(session));
        };
        let scope = self.orchestrator.open_scope(session);
        let started = Instant::now();

        match self.run_level(&scope, depth).await {
            Ok(level) => {
                info!(
                    %session,
                    depth,
                    rooms = level.rooms.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "level generation complete"
                );
                Ok(level)
            }
            Err(e) => Err(self.fail_session(session, e).await),
        }
    }

    async fn run_level(&self, scope: &Arc<Scope>, depth: u32) -> Result<Level, SessionError> {
        let session = scope.session();
        self.sync.await_dependent(session, scope.token()).await?;

        let plan = LevelPlan::partition(&self.config.generation, LevelSeed::new(self.session_seed(session), depth))?;
        debug!(%session, depth, clusters = plan.cluster_count(), "level planned");

        let publisher = self.sync.open_channel(session);
        let mut rx = self
            .sync
            .take_receiver(session)
            .ok_or_else(|| TaskError::failed("cluster channel already has a consumer"))?;
        for spec in &plan.clusters {
            // outcomes are recorded by the orchestrator; values travel on the channel
            let _ = self.fork_cluster(scope, spec.clone(), publisher.clone());
        }
        // once every producer is done the receiver sees the end of the stream
        drop(publisher);
        self.sync.close_channel(session);

        let received = self.assembler.collect(&plan, &mut rx, scope).await?;
        if received.len() < plan.cluster_count() {
            // the channel is closed; a unit still walking can only fail to publish
            let abandoned = scope.cancel_kind(TaskKind::ClusterGeneration);
            if abandoned > 0 {
                warn!(%session, abandoned, "cluster units outlived the drain, cancelling them");
            }
        }
        let clusters = self
            .assembler
            .fill_missing(&plan, received, scope, self.orchestrator.walker_ids())
            .await?;

        let level = self
            .orchestrator
            .fork_task(scope, TaskKind::LevelGeneration, None, move |_ctx| async move {
                tokio::task::spawn_blocking(move || LevelAssembler::stitch(&plan, clusters))
                    .await
                    .map_err(join_error)?
                    .map_err(TaskError::from)
            })
            .join()
            .await
            .map_err(|e| task_failure(session, e))?;

        let balancer = self.content_balancer(session);
        let level = self
            .orchestrator
            .fork_task(scope, TaskKind::ContentGeneration, None, move |_ctx| async move {
                tokio::task::spawn_blocking(move || {
                    let mut level = level;
                    level.attach_content(balancer.as_ref());
                    level
                })
                .await
                .map_err(join_error)
            })
            .join()
            .await
            .map_err(|e| task_failure(session, e))?;

        self.assembler.persist(&self.orchestrator, scope, &level).await?;
        Ok(level)
    }

    fn fork_cluster(&self, scope: &Arc<Scope>, spec: ClusterSpec, publisher: ClusterPublisher) -> TaskHandle<()> {
        let generator = self.generator.clone();
        self.orchestrator
            .fork_task(scope, TaskKind::ClusterGeneration, Some(spec.id), move |ctx| async move {
                let cancel = ctx.cancel.clone();
                let ids = ctx.walker_ids.clone();
                let cluster = tokio::task::spawn_blocking(move || {
                    generator.generate_until(&spec, &ids, || cancel.is_cancelled())
                })
                .await
                .map_err(join_error)??;
                publisher.publish(cluster)
            })
    }

    fn content_balancer(&self, session: SessionId) -> Arc<dyn ContentBalancer> {
        match self.item_pool(session) {
            Some(pool) => Arc::new(ItemPoolBalancer::new(pool.to_vec(), self.balancer.clone())),
            None => self.balancer.clone(),
        }
    }

    /// Starting loadout: the lightest items of the session's pool
    pub async fn generate_player(&self, session: SessionId) -> Result<PlayerProfile, SessionError> {
        let scope = self.orchestrator.open_scope(session);
        if let Err(e) = self.sync.await_dependent(session, scope.token()).await {
            return Err(self.fail_session(session, e).await);
        }

        let pool = self.item_pool(session).unwrap_or_default();
        let seed = self.session_seed(session);
        let handle = self
            .orchestrator
            .fork_task(&scope, TaskKind::PlayerGeneration, None, move |ctx| async move {
                let mut loadout = pool.to_vec();
                loadout.sort_by(|a, b| a.weight.balance().total_cmp(&b.weight.balance()));
                loadout.truncate(STARTING_ITEMS);
                Ok(PlayerProfile {
                    session: ctx.session,
                    seed,
                    loadout,
                })
            });

        match handle.join().await {
            Ok(profile) => Ok(profile),
            Err(e) => Err(self.fail_session(session, task_failure(session, e)).await),
        }
    }

    // ------------------------------------------------------------------
    // Exploration
    // ------------------------------------------------------------------

    pub async fn load_level(&self, session: SessionId) -> Result<Option<Level>, SessionError> {
        Ok(self.repo.load_level(session).await?)
    }

    /// Mark a room explored, persist it, then notify
    pub async fn visit_room(&self, session: SessionId, point: Point) -> Result<Room, SessionError> {
        match self.try_visit(session, point).await {
            Ok(room) => {
                self.notifier.room_updated(session, &room).await;
                Ok(room)
            }
            Err(e) => Err(self.fail_session(session, e).await),
        }
    }

    async fn try_visit(&self, session: SessionId, point: Point) -> Result<Room, SessionError> {
        let mut level = self
            .repo
            .load_level(session)
            .await?
            .ok_or(SessionError::LevelNotFound(session))?;
        let room = level.visit(point).cloned().ok_or(SessionError::RoomNotFound {
            session,
            x: point.x,
            y: point.y,
        })?;
        self.repo.save_room(session, &room).await?;
        Ok(room)
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Cancel everything the session has in flight. Idempotent.
    pub async fn cancel_session(&self, session: SessionId) -> usize {
        let outstanding = self.orchestrator.cancel_scope(session).await;
        self.sync.forget(session);
        self.item_pools.lock().remove(&session);
        outstanding
    }

    /// Close a session normally; running units are left to finish
    pub fn end_session(&self, session: SessionId) {
        self.orchestrator.remove_scope(session);
        self.sync.forget(session);
        self.item_pools.lock().remove(&session);
        debug!(%session, "session ended");
    }

    async fn fail_session(&self, session: SessionId, err: SessionError) -> SessionError {
        if err.is_session_fatal() {
            warn!(%session, error = %err, "session-fatal error, cancelling scope");
            self.cancel_session(session).await;
        }
        err
    }
}

fn task_failure(session: SessionId, err: TaskError) -> SessionError {
    if err.is_cancelled() {
        SessionError::Cancelled(session)
    } else {
        SessionError::Task(err)
    }
}
