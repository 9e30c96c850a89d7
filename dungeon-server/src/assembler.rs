//! Level assembly: drain the session's cluster channel, make up for missing
//! clusters, stitch, persist.
//!
//! ```text
//! [ClusterGeneration × N] ──publish──▶ channel ──▶ collect()
//!                                                    │ missing?
//!                                                    ▼
//!                                              fill_missing()  (policy)
//!                                                    │
//!                                                  stitch() ──▶ persist()
//! ```
//!
//! A level is persisted only when every planned cluster is present and the
//! stitched grid connects start to end.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use dungeon_core::{ClusterGenerator, ClusterId, GeneratedCluster, GenerationError, Level, LevelPlan, WalkerIds};

use crate::config::{MissingClusterPolicy, ServerConfig, SiblingFailurePolicy};
use crate::error::{SessionError, TaskError};
use crate::notify::LevelNotifier;
use crate::orchestrator::{join_error, Scope, SessionId, TaskKind, TaskOrchestrator};
use crate::storage::LevelRepository;
use crate::sync::ClusterReceiver;

pub struct LevelAssembler {
    generator: ClusterGenerator,
    missing: MissingClusterPolicy,
    sibling_failure: SiblingFailurePolicy,
    drain_timeout: Duration,
    repo: Arc<dyn LevelRepository>,
    notifier: Arc<dyn LevelNotifier>,
}

impl LevelAssembler {
    pub fn new(config: &ServerConfig, repo: Arc<dyn LevelRepository>, notifier: Arc<dyn LevelNotifier>) -> Self {
        Self {
            generator: ClusterGenerator::new(config.generation.clone()),
            missing: config.missing_clusters,
            sibling_failure: config.sibling_failure,
            drain_timeout: config.drain_timeout(),
            repo,
            notifier,
        }
    }

    pub fn repository(&self) -> &Arc<dyn LevelRepository> {
        &self.repo
    }

    /// Receive clusters until every planned id arrived, all producers are
    /// gone, or the drain timeout passes.
    ///
    /// A cancelled scope ends the drain with `SessionError::Cancelled`. Under
    /// `SiblingFailurePolicy::CancelSiblings` the first unit that fails
    /// during the drain ends it with an error, even if clusters are still
    /// buffered.
    pub async fn collect(
        &self,
        plan: &LevelPlan,
        rx: &mut ClusterReceiver,
        scope: &Scope,
    ) -> Result<BTreeMap<ClusterId, GeneratedCluster>, SessionError> {
        let session = scope.session();
        let expected = plan.cluster_count();
        let fail_fast = self.sibling_failure == SiblingFailurePolicy::CancelSiblings;
        let failures_before = scope.failure_count();
        let deadline = tokio::time::sleep(self.drain_timeout);
        tokio::pin!(deadline);

        let mut received = BTreeMap::new();
        while received.len() < expected {
            tokio::select! {
                biased;
                _ = scope.failed_since(failures_before), if fail_fast => {
                    return Err(abandoned(session, received.len(), expected));
                }
                next = rx.recv(scope.token()) => match next? {
                    Some(cluster) => accept(plan, session, &mut received, cluster),
                    None => {
                        debug!(%session, received = received.len(), expected, "all producers finished");
                        break;
                    }
                },
                _ = &mut deadline => {
                    warn!(%session, received = received.len(), expected, timeout_ms = self.drain_timeout.as_millis() as u64, "cluster drain timed out");
                    break;
                }
            }
        }

        // anything published after the loop ended still counts
        for cluster in rx.close_and_drain() {
            accept(plan, session, &mut received, cluster);
        }

        // the stream can end before a failed producer's outcome is recorded
        if fail_fast && received.len() < expected {
            tokio::select! {
                _ = scope.idle() => {}
                _ = &mut deadline => {}
            }
            if scope.failure_count() > failures_before {
                return Err(abandoned(session, received.len(), expected));
            }
        }
        Ok(received)
    }

    /// Apply the missing-cluster policy and return clusters in plan order
    pub async fn fill_missing(
        &self,
        plan: &LevelPlan,
        mut received: BTreeMap<ClusterId, GeneratedCluster>,
        scope: &Scope,
        ids: &WalkerIds,
    ) -> Result<Vec<GeneratedCluster>, SessionError> {
        let session = scope.session();
        let expected = plan.cluster_count();
        let missing: Vec<ClusterId> = plan
            .clusters
            .iter()
            .map(|spec| spec.id)
            .filter(|id| !received.contains_key(id))
            .collect();

        if !missing.is_empty() {
            let attempts = match self.missing {
                MissingClusterPolicy::FailFast => 0,
                MissingClusterPolicy::RetrySynchronously { attempts } => attempts,
            };
            if attempts == 0 {
                return Err(SessionError::MissingClusters {
                    expected,
                    received: received.len(),
                });
            }
            info!(%session, missing = missing.len(), attempts, "regenerating missing clusters");

            for id in missing {
                match self.regenerate(plan, id, attempts, scope, ids).await? {
                    Some(cluster) => {
                        received.insert(id, cluster);
                    }
                    None => {
                        return Err(SessionError::MissingClusters {
                            expected,
                            received: received.len(),
                        })
                    }
                }
            }
        }

        Ok(received.into_values().collect())
    }

    /// Inline retry of one cluster on the blocking pool with seeds past
    /// those the forked attempts used
    async fn regenerate(
        &self,
        plan: &LevelPlan,
        id: ClusterId,
        attempts: u32,
        scope: &Scope,
        ids: &WalkerIds,
    ) -> Result<Option<GeneratedCluster>, SessionError> {
        let session = scope.session();
        let Some(spec) = plan.spec(id).cloned() else {
            return Ok(None);
        };
        let generator = self.generator.clone();
        let token = scope.token().clone();
        let ids = ids.clone();
        let first = generator.config().cluster_retries + 1;

        let outcome = tokio::task::spawn_blocking(move || {
            let should_stop = || token.is_cancelled();
            let mut last = None;
            for attempt in first..first + attempts {
                match generator.generate_attempt(&spec, &ids, attempt, &should_stop) {
                    Ok(cluster) => return Ok(cluster),
                    Err(e @ GenerationError::Interrupted(_)) => return Err(e),
                    Err(e) => last = Some(e),
                }
            }
            Err(last.unwrap_or(GenerationError::MissingCluster(spec.id)))
        })
        .await
        .map_err(join_error)?;

        match outcome {
            Ok(cluster) => {
                debug!(%session, cluster = %id, attempts = cluster.attempts, "missing cluster regenerated");
                Ok(Some(cluster))
            }
            Err(GenerationError::Interrupted(_)) => Err(SessionError::Cancelled(session)),
            Err(e) => {
                warn!(%session, cluster = %id, error = %e, "missing cluster could not be regenerated");
                Ok(None)
            }
        }
    }

    /// Join cluster grids into one level (runs on the blocking pool)
    pub fn stitch(plan: &LevelPlan, clusters: Vec<GeneratedCluster>) -> Result<Level, GenerationError> {
        let level = Level::assemble(plan, clusters)?;
        debug!(
            depth = level.depth,
            rooms = level.rooms.len(),
            clusters = level.cluster_count,
            "level stitched"
        );
        Ok(level)
    }

    /// Hand a finished level to persistence, then to the notifier.
    ///
    /// The save runs as a unit of the session's scope, so cancelling the
    /// session reaches it. A save that lands after cancellation is rolled
    /// back to whatever the session had stored before.
    pub async fn persist(
        &self,
        orchestrator: &TaskOrchestrator,
        scope: &Arc<Scope>,
        level: &Level,
    ) -> Result<(), SessionError> {
        let session = scope.session();
        if scope.is_cancelled() {
            return Err(SessionError::Cancelled(session));
        }
        let previous = self.repo.load_level(session).await?;

        let repo = self.repo.clone();
        let stored = level.clone();
        let saved = orchestrator
            .fork_task(scope, TaskKind::LevelGeneration, None, move |_ctx| async move {
                repo.save_level(session, &stored).await.map_err(TaskError::failed)
            })
            .join()
            .await;
        match saved {
            Ok(()) if !scope.is_cancelled() => {}
            Ok(()) | Err(TaskError::Cancelled) => {
                self.roll_back(session, previous).await;
                return Err(SessionError::Cancelled(session));
            }
            Err(e) => return Err(SessionError::Task(e)),
        }

        info!(
            %session,
            depth = level.depth,
            rooms = level.rooms.len(),
            balance = format!("{:.1}", level.net_weight.balance()),
            "level persisted"
        );
        self.notifier.level_ready(session, level).await;
        Ok(())
    }

    async fn roll_back(&self, session: SessionId, previous: Option<Level>) {
        let restored = match &previous {
            Some(level) => self.repo.save_level(session, level).await.map(|_| true),
            None => self.repo.delete_level(session).await,
        };
        match restored {
            Ok(_) => debug!(%session, restored = previous.is_some(), "cancelled save rolled back"),
            Err(e) => warn!(%session, error = %e, "cancelled save could not be rolled back"),
        }
    }
}

fn abandoned(session: SessionId, received: usize, expected: usize) -> SessionError {
    warn!(%session, received, expected, "cluster failed, abandoning siblings");
    SessionError::Task(TaskError::failed(
        "a sibling cluster failed and the level was abandoned",
    ))
}

fn accept(
    plan: &LevelPlan,
    session: SessionId,
    received: &mut BTreeMap<ClusterId, GeneratedCluster>,
    cluster: GeneratedCluster,
) {
    let id = cluster.id;
    if plan.spec(id).is_none() {
        warn!(%session, cluster = %id, "dropping cluster outside the level plan");
        return;
    }
    if received.insert(id, cluster).is_some() {
        warn!(%session, cluster = %id, "duplicate cluster, keeping the latest");
    } else {
        debug!(%session, cluster = %id, received = received.len(), "cluster received");
    }
}
