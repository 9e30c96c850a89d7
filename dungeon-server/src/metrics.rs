//! Task Metrics — per-kind counters with Prometheus + JSON export
//!
//! Uses lock-free atomics for all counters. An optional `MetricsSink` receives
//! every event as well; it is for observability only and never affects
//! orchestration.
//!
//! ## Exports
//! - `render_prometheus()` — Prometheus text exposition format
//! - `snapshot()` — serde-serializable snapshot (JSON for dashboards/tests)

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::orchestrator::TaskKind;

/// Event forwarded to an external metrics sink
#[derive(Debug, Clone, PartialEq)]
pub enum MetricEvent {
    TaskStarted { kind: TaskKind },
    TaskCompleted { kind: TaskKind, duration: Duration },
    TaskFailed { kind: TaskKind },
    TaskCancelled { kind: TaskKind },
    ActiveTasks(u64),
}

/// Receiver for named counters, timers and gauges
pub trait MetricsSink: Send + Sync {
    fn record(&self, event: &MetricEvent);
}

/// Sink that writes every event to the `tracing` log at DEBUG
#[derive(Debug, Default, Clone)]
pub struct TracingSink;

impl MetricsSink for TracingSink {
    fn record(&self, event: &MetricEvent) {
        debug!(target: "dungeon_server::metrics", ?event, "metric");
    }
}

#[derive(Debug, Default)]
struct KindCounters {
    started: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    /// Cumulative duration of completed tasks in microseconds
    total_duration_us: AtomicU64,
}

/// Shared task metrics (all lock-free atomics)
pub struct TaskMetrics {
    kinds: [KindCounters; TaskKind::ALL.len()],
    active: AtomicU64,
    start_time: Instant,
    sink: Option<Arc<dyn MetricsSink>>,
}

impl std::fmt::Debug for TaskMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskMetrics")
            .field("active", &self.active())
            .field("has_sink", &self.sink.is_some())
            .finish()
    }
}

impl Default for TaskMetrics {
    fn default() -> Self {
        Self {
            kinds: Default::default(),
            active: AtomicU64::new(0),
            start_time: Instant::now(),
            sink: None,
        }
    }
}

impl TaskMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_sink(sink: Arc<dyn MetricsSink>) -> Arc<Self> {
        Arc::new(Self {
            sink: Some(sink),
            ..Default::default()
        })
    }

    fn counters(&self, kind: TaskKind) -> &KindCounters {
        &self.kinds[kind.index()]
    }

    fn emit(&self, event: MetricEvent) {
        if let Some(sink) = &self.sink {
            sink.record(&event);
        }
    }

    fn leave_active(&self) {
        // saturating: a late terminal record must not wrap the gauge
        let _ = self
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| Some(v.saturating_sub(1)));
        self.emit(MetricEvent::ActiveTasks(self.active()));
    }

    pub fn record_started(&self, kind: TaskKind) {
        self.counters(kind).started.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_add(1, Ordering::AcqRel);
        self.emit(MetricEvent::TaskStarted { kind });
        self.emit(MetricEvent::ActiveTasks(self.active()));
    }

    pub fn record_completed(&self, kind: TaskKind, duration: Duration) {
        let c = self.counters(kind);
        c.completed.fetch_add(1, Ordering::Relaxed);
        c.total_duration_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        self.emit(MetricEvent::TaskCompleted { kind, duration });
        self.leave_active();
    }

    pub fn record_failed(&self, kind: TaskKind) {
        self.counters(kind).failed.fetch_add(1, Ordering::Relaxed);
        self.emit(MetricEvent::TaskFailed { kind });
        self.leave_active();
    }

    /// Cancellation is tracked apart from failures
    pub fn record_cancelled(&self, kind: TaskKind) {
        self.counters(kind).cancelled.fetch_add(1, Ordering::Relaxed);
        self.emit(MetricEvent::TaskCancelled { kind });
        self.leave_active();
    }

    pub fn active(&self) -> u64 {
        self.active.load(Ordering::Acquire)
    }

    pub fn uptime_secs(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }

    pub fn kind(&self, kind: TaskKind) -> KindSnapshot {
        let c = self.counters(kind);
        let completed = c.completed.load(Ordering::Relaxed);
        let total_us = c.total_duration_us.load(Ordering::Relaxed);
        KindSnapshot {
            kind: kind.as_str(),
            started: c.started.load(Ordering::Relaxed),
            completed,
            failed: c.failed.load(Ordering::Relaxed),
            cancelled: c.cancelled.load(Ordering::Relaxed),
            avg_duration_ms: if completed > 0 {
                (total_us as f64 / completed as f64) / 1000.0
            } else {
                0.0
            },
            total_duration_us: total_us,
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            captured_at: Utc::now(),
            uptime_secs: self.uptime_secs(),
            active_tasks: self.active(),
            kinds: TaskKind::ALL.iter().map(|k| self.kind(*k)).collect(),
        }
    }

    pub fn render_prometheus(&self) -> String {
        let mut out = String::new();
        let series: [(&str, &str, &str, fn(&KindSnapshot) -> u64); 4] = [
            ("dungeon_tasks_started_total", "counter", "Tasks forked", |k| k.started),
            ("dungeon_tasks_completed_total", "counter", "Tasks completed successfully", |k| k.completed),
            ("dungeon_tasks_failed_total", "counter", "Tasks that failed or panicked", |k| k.failed),
            ("dungeon_tasks_cancelled_total", "counter", "Tasks cancelled with their session", |k| k.cancelled),
        ];
        let kinds: Vec<KindSnapshot> = TaskKind::ALL.iter().map(|k| self.kind(*k)).collect();

        for (name, ty, help, get) in series {
            let _ = writeln!(out, "# HELP {name} {help}");
            let _ = writeln!(out, "# TYPE {name} {ty}");
            for k in &kinds {
                let _ = writeln!(out, "{name}{{kind=\"{}\"}} {}", k.kind, get(k));
            }
            out.push('\n');
        }

        let _ = writeln!(out, "# HELP dungeon_task_duration_seconds Average completed task duration");
        let _ = writeln!(out, "# TYPE dungeon_task_duration_seconds gauge");
        for k in &kinds {
            let _ = writeln!(
                out,
                "dungeon_task_duration_seconds{{kind=\"{}\"}} {:.6}",
                k.kind,
                k.avg_duration_ms / 1000.0
            );
        }
        out.push('\n');

        let _ = writeln!(out, "# HELP dungeon_tasks_active Tasks currently running");
        let _ = writeln!(out, "# TYPE dungeon_tasks_active gauge");
        let _ = writeln!(out, "dungeon_tasks_active {}", self.active());
        out.push('\n');
        let _ = writeln!(out, "# HELP dungeon_uptime_seconds Orchestrator uptime");
        let _ = writeln!(out, "# TYPE dungeon_uptime_seconds gauge");
        let _ = writeln!(out, "dungeon_uptime_seconds {:.2}", self.uptime_secs());
        out
    }

    pub fn summary(&self) -> String {
        let mut s = format!("Tasks active: {}\n", self.active());
        for k in TaskKind::ALL {
            let snap = self.kind(k);
            if snap.started == 0 {
                continue;
            }
            let _ = writeln!(
                s,
                "  {:<20} started {:>4}  ok {:>4}  failed {:>3}  cancelled {:>3}  avg {:.2}ms",
                snap.kind, snap.started, snap.completed, snap.failed, snap.cancelled, snap.avg_duration_ms
            );
        }
        s
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct KindSnapshot {
    pub kind: &'static str,
    pub started: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub total_duration_us: u64,
    pub avg_duration_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub captured_at: DateTime<Utc>,
    pub uptime_secs: f64,
    pub active_tasks: u64,
    pub kinds: Vec<KindSnapshot>,
}

impl MetricsSnapshot {
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

// ============================================================================
// Tests
// ============================================================================
