//! Session-scoped task orchestration.
//!
//! Each active session owns one [`Scope`]: a fork/join/cancel unit holding the
//! session's cancellation token and the set of units currently running in it.
//!
//! ## Accounting
//! Every forked unit runs inside a small wrapper task that:
//! 1. races the unit against the scope's cancel token and its own,
//! 2. maps a panic to `TaskError::Panicked`,
//! 3. removes itself from the scope's active set and records exactly one
//!    terminal metric (completed, failed or cancelled).
//!
//! Whoever removes a unit from the active set records its outcome, so a unit
//! force-aborted by `cancel_scope` is still counted once. Outcomes are
//! recorded even if nobody ever joins the handle.
//!
//! A unit's `TaskContext::cancel` is its own token. It fires when the scope
//! is cancelled or when the unit's family is cancelled on its own through
//! [`Scope::cancel_kind`].

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinError, JoinHandle};
use tracing::{debug, info, warn};

use dungeon_core::{ClusterId, WalkerIds};

use crate::cancel::CancelToken;
use crate::error::TaskError;
use crate::metrics::TaskMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

/// Task families tracked per session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskKind {
    ItemGeneration,
    PlayerGeneration,
    LevelGeneration,
    ClusterGeneration,
    ContentGeneration,
}

impl TaskKind {
    pub const ALL: [TaskKind; 5] = [
        TaskKind::ItemGeneration,
        TaskKind::PlayerGeneration,
        TaskKind::LevelGeneration,
        TaskKind::ClusterGeneration,
        TaskKind::ContentGeneration,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::ItemGeneration => "item_generation",
            TaskKind::PlayerGeneration => "player_generation",
            TaskKind::LevelGeneration => "level_generation",
            TaskKind::ClusterGeneration => "cluster_generation",
            TaskKind::ContentGeneration => "content_generation",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one forked unit, handed to its closure explicitly
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub session: SessionId,
    pub cluster: Option<ClusterId>,
    pub kind: TaskKind,
    pub task: TaskId,
    /// This unit's own token, fired on scope or family cancel
    pub cancel: CancelToken,
    pub walker_ids: WalkerIds,
}

struct ActiveTask {
    kind: TaskKind,
    cancel: CancelToken,
    abort: AbortHandle,
}

/// Aborts the unit's inner task when its wrapper goes away
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[derive(Default)]
struct ScopeState {
    cancelled: bool,
    active: HashMap<TaskId, ActiveTask>,
}

/// One session's fork/join/cancel unit
pub struct Scope {
    session: SessionId,
    token: CancelToken,
    state: Mutex<ScopeState>,
    active_tx: watch::Sender<usize>,
    failures_tx: watch::Sender<u64>,
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("session", &self.session)
            .field("cancelled", &self.is_cancelled())
            .field("active", &self.active_count())
            .finish()
    }
}

impl Scope {
    fn new(session: SessionId) -> Self {
        Self {
            session,
            token: CancelToken::new(),
            state: Mutex::new(ScopeState::default()),
            active_tx: watch::channel(0).0,
            failures_tx: watch::channel(0).0,
        }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.lock().cancelled
    }

    pub fn active_count(&self) -> usize {
        *self.active_tx.borrow()
    }

    pub fn failure_count(&self) -> u64 {
        *self.failures_tx.borrow()
    }

    /// Running units of one family
    pub fn active_of(&self, kind: TaskKind) -> usize {
        self.state.lock().active.values().filter(|a| a.kind == kind).count()
    }

    /// Cancel the running units of one family, leaving the scope open.
    /// Returns how many were signalled; each still records its own outcome.
    pub fn cancel_kind(&self, kind: TaskKind) -> usize {
        let state = self.state.lock();
        let mut signalled = 0;
        for active in state.active.values().filter(|a| a.kind == kind) {
            active.cancel.cancel();
            signalled += 1;
        }
        if signalled > 0 {
            debug!(session = %self.session, %kind, signalled, "task family cancelled");
        }
        signalled
    }

    /// Resolves once more than `seen` units in this scope have failed
    pub async fn failed_since(&self, seen: u64) {
        let mut rx = self.failures_tx.subscribe();
        let _ = rx.wait_for(|n| *n > seen).await;
    }

    /// Resolves once no unit is running
    pub async fn idle(&self) {
        let mut rx = self.active_tx.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Remove a unit from the active set; `true` if this call removed it.
    /// A failure is counted before the active count drops, so anyone
    /// waiting on `idle` already sees it.
    fn finish(&self, task: TaskId, failed: bool) -> bool {
        let mut state = self.state.lock();
        let removed = state.active.remove(&task).is_some();
        if removed && failed {
            self.failures_tx.send_modify(|n| *n += 1);
        }
        self.active_tx.send_replace(state.active.len());
        removed
    }
}

/// Handle to a forked unit
pub struct TaskHandle<T> {
    pub session: SessionId,
    pub kind: TaskKind,
    pub cluster: Option<ClusterId>,
    pub task: TaskId,
    join: Option<JoinHandle<Result<T, TaskError>>>,
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("session", &self.session)
            .field("kind", &self.kind)
            .field("cluster", &self.cluster)
            .field("task", &self.task)
            .finish()
    }
}

impl<T> TaskHandle<T> {
    /// Wait for the unit; a cancelled scope wakes this with `TaskError::Cancelled`
    pub async fn join(self) -> Result<T, TaskError> {
        match self.join {
            None => Err(TaskError::Cancelled),
            Some(handle) => match handle.await {
                Ok(result) => result,
                Err(e) => Err(join_error(e)),
            },
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map(|h| h.is_finished()).unwrap_or(true)
    }
}

pub(crate) fn join_error(e: JoinError) -> TaskError {
    if e.is_panic() {
        let payload = e.into_panic();
        let msg = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        TaskError::Panicked(msg)
    } else {
        TaskError::Cancelled
    }
}

/// Marks a session as having a level generation run in flight
pub struct LevelRunGuard {
    session: SessionId,
    runs: Arc<Mutex<HashSet<SessionId>>>,
}

impl Drop for LevelRunGuard {
    fn drop(&mut self) {
        self.runs.lock().remove(&self.session);
    }
}

pub struct TaskOrchestrator {
    scopes: Mutex<HashMap<SessionId, Arc<Scope>>>,
    level_runs: Arc<Mutex<HashSet<SessionId>>>,
    metrics: Arc<TaskMetrics>,
    walker_ids: WalkerIds,
    next_task: AtomicU64,
    cancel_grace: Duration,
}

impl TaskOrchestrator {
    pub fn new(metrics: Arc<TaskMetrics>, cancel_grace: Duration) -> Self {
        Self {
            scopes: Mutex::new(HashMap::new()),
            level_runs: Arc::new(Mutex::new(HashSet::new())),
            metrics,
            walker_ids: WalkerIds::new(),
            next_task: AtomicU64::new(0),
            cancel_grace,
        }
    }

    pub fn metrics(&self) -> &Arc<TaskMetrics> {
        &self.metrics
    }

    pub fn walker_ids(&self) -> &WalkerIds {
        &self.walker_ids
    }

    /// Existing scope for `session`, or a fresh one
    pub fn open_scope(&self, session: SessionId) -> Arc<Scope> {
        let mut scopes = self.scopes.lock();
        scopes
            .entry(session)
            .or_insert_with(|| {
                debug!(%session, "scope opened");
                Arc::new(Scope::new(session))
            })
            .clone()
    }

    pub fn scope(&self, session: SessionId) -> Option<Arc<Scope>> {
        self.scopes.lock().get(&session).cloned()
    }

    pub fn sessions(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.scopes.lock().keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn active_tasks(&self, session: SessionId) -> usize {
        self.scope(session).map(|s| s.active_count()).unwrap_or(0)
    }

    pub fn active_tasks_of(&self, session: SessionId, kind: TaskKind) -> usize {
        self.scope(session).map(|s| s.active_of(kind)).unwrap_or(0)
    }

    /// Claim the single level generation slot for `session`
    pub fn try_begin_level_run(&self, session: SessionId) -> Option<LevelRunGuard> {
        if !self.level_runs.lock().insert(session) {
            return None;
        }
        Some(LevelRunGuard {
            session,
            runs: self.level_runs.clone(),
        })
    }

    /// Start `work` concurrently inside `scope`.
    ///
    /// Forking into a cancelled scope returns a handle that resolves to
    /// `TaskError::Cancelled` without running `work`.
    pub fn fork_task<T, F, Fut>(
        &self,
        scope: &Arc<Scope>,
        kind: TaskKind,
        cluster: Option<ClusterId>,
        work: F,
    ) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(TaskContext) -> Fut,
        Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
    {
        let task = TaskId(self.next_task.fetch_add(1, Ordering::Relaxed));
        let unit = CancelToken::new();
        let ctx = TaskContext {
            session: scope.session,
            cluster,
            kind,
            task,
            cancel: unit.clone(),
            walker_ids: self.walker_ids.clone(),
        };
        let mut handle = TaskHandle {
            session: scope.session,
            kind,
            cluster,
            task,
            join: None,
        };

        // built before locking so `work` may inspect the scope
        let fut = work(ctx);

        let mut state = scope.state.lock();
        self.metrics.record_started(kind);
        if state.cancelled {
            drop(state);
            self.metrics.record_cancelled(kind);
            debug!(session = %scope.session, %kind, "fork into cancelled scope");
            return handle;
        }

        let metrics = self.metrics.clone();
        let owner = scope.clone();
        let token = scope.token.clone();
        let own = unit.clone();
        let started = Instant::now();
        let join = tokio::spawn(async move {
            let mut inner = tokio::spawn(fut);
            let _stop_inner = AbortOnDrop(inner.abort_handle());
            // a unit that already finished keeps its result
            let finished = tokio::select! {
                biased;
                joined = &mut inner => Some(joined),
                _ = token.cancelled() => None,
                _ = own.cancelled() => None,
            };
            let outcome = match finished {
                Some(Ok(result)) => result,
                Some(Err(e)) => Err(join_error(e)),
                None => {
                    own.cancel();
                    inner.abort();
                    let _ = (&mut inner).await;
                    Err(TaskError::Cancelled)
                }
            };

            let failed = matches!(&outcome, Err(e) if !e.is_cancelled());
            if owner.finish(task, failed) {
                match &outcome {
                    Ok(_) => metrics.record_completed(kind, started.elapsed()),
                    Err(TaskError::Cancelled) => metrics.record_cancelled(kind),
                    Err(e) => {
                        metrics.record_failed(kind);
                        warn!(session = %owner.session, %kind, cluster = ?cluster, error = %e, "task failed");
                    }
                }
            }
            outcome
        });

        state.active.insert(
            task,
            ActiveTask {
                kind,
                cancel: unit,
                abort: join.abort_handle(),
            },
        );
        scope.active_tx.send_replace(state.active.len());
        drop(state);

        handle.join = Some(join);
        handle
    }

    /// Cancel every outstanding unit of `session` and release its scope.
    ///
    /// Waits up to the grace period for units to acknowledge, then aborts the
    /// rest. Idempotent; returns the number of units that were outstanding.
    pub async fn cancel_scope(&self, session: SessionId) -> usize {
        let Some(scope) = self.scope(session) else {
            return 0;
        };

        let outstanding = {
            let mut state = scope.state.lock();
            state.cancelled = true;
            state.active.len()
        };
        scope.token.cancel();

        if tokio::time::timeout(self.cancel_grace, scope.idle()).await.is_err() {
            let stragglers: Vec<(TaskId, ActiveTask)> = {
                let mut state = scope.state.lock();
                let drained = state.active.drain().collect();
                scope.active_tx.send_replace(0);
                drained
            };
            for (task, active) in stragglers {
                warn!(%session, task = task.0, kind = %active.kind, "task ignored cancellation, aborting");
                active.cancel.cancel();
                active.abort.abort();
                self.metrics.record_cancelled(active.kind);
            }
        }

        self.detach(session, &scope);
        info!(%session, outstanding, "scope cancelled");
        outstanding
    }

    /// Drop bookkeeping for `session` without cancelling anything
    pub fn remove_scope(&self, session: SessionId) -> Option<Arc<Scope>> {
        let removed = self.scopes.lock().remove(&session);
        if removed.is_some() {
            debug!(%session, "scope removed");
        }
        removed
    }

    fn detach(&self, session: SessionId, scope: &Arc<Scope>) {
        let mut scopes = self.scopes.lock();
        // a fresh scope may already have been opened for the session
        if scopes.get(&session).is_some_and(|s| Arc::ptr_eq(s, scope)) {
            scopes.remove(&session);
        }
    }
}
