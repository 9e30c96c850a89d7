//! Per-session coordination between task families.
//!
//! - `OrderingGate`: countdown of prerequisite families (item generation) that
//!   must finish before a dependent family (level/player generation) starts.
//!   Drained at most once; later dependents pass straight through.
//! - Cluster channel: unbounded FIFO from any number of cluster producers to a
//!   single assembler. FIFO per producer, no order across producers.
//!
//! Every wait here also observes the session's `CancelToken`.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use dungeon_core::GeneratedCluster;

use crate::cancel::CancelToken;
use crate::error::{SessionError, TaskError};
use crate::orchestrator::SessionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct GateState {
    remaining: usize,
    released: bool,
}

/// Countdown latch over prerequisite completions.
///
/// A gate can open two ways: counted down to zero, or released on session
/// teardown. Only the first lets a dependent through.
#[derive(Debug)]
pub struct OrderingGate {
    state: watch::Sender<GateState>,
}

impl OrderingGate {
    pub fn new(prerequisites: usize) -> Self {
        Self {
            state: watch::channel(GateState {
                remaining: prerequisites,
                released: false,
            })
            .0,
        }
    }

    pub fn remaining(&self) -> usize {
        self.state.borrow().remaining
    }

    pub fn is_released(&self) -> bool {
        self.state.borrow().released
    }

    /// Count one prerequisite down; returns what is left
    pub fn complete_one(&self) -> usize {
        let mut left = 0;
        self.state.send_modify(|s| {
            s.remaining = s.remaining.saturating_sub(1);
            left = s.remaining;
        });
        left
    }

    /// Wake every waiter without counting down (session teardown)
    pub fn release(&self) {
        self.state.send_modify(|s| s.released = true);
    }

    pub async fn wait(&self, token: &CancelToken) -> Result<(), TaskError> {
        let mut rx = self.state.subscribe();
        let opened = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(TaskError::Cancelled),
            state = rx.wait_for(|s| s.released || s.remaining == 0) => state.map(|s| *s),
        };
        match opened {
            Ok(GateState { released: false, .. }) if !token.is_cancelled() => Ok(()),
            _ => Err(TaskError::Cancelled),
        }
    }
}

/// Producer side of a session's cluster channel
#[derive(Debug, Clone)]
pub struct ClusterPublisher {
    session: SessionId,
    tx: mpsc::UnboundedSender<GeneratedCluster>,
}

impl ClusterPublisher {
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Never blocks; fails only once the session's channel is closed
    pub fn publish(&self, cluster: GeneratedCluster) -> Result<(), TaskError> {
        let id = cluster.id;
        self.tx.send(cluster).map_err(|_| TaskError::Cancelled)?;
        debug!(session = %self.session, cluster = %id, "cluster published");
        Ok(())
    }
}

/// Consumer side; exactly one exists per session channel
#[derive(Debug)]
pub struct ClusterReceiver {
    session: SessionId,
    rx: mpsc::UnboundedReceiver<GeneratedCluster>,
}

impl ClusterReceiver {
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Next cluster, `Ok(None)` once every publisher is gone
    pub async fn recv(&mut self, token: &CancelToken) -> Result<Option<GeneratedCluster>, SessionError> {
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(SessionError::Cancelled(self.session)),
            next = self.rx.recv() => Ok(next),
        }
    }

    /// Stop accepting new clusters and hand back what is buffered
    pub fn close_and_drain(&mut self) -> Vec<GeneratedCluster> {
        self.rx.close();
        let mut buffered = Vec::new();
        while let Ok(cluster) = self.rx.try_recv() {
            buffered.push(cluster);
        }
        buffered
    }
}

#[derive(Debug, Default)]
struct ChannelSlot {
    tx: Option<mpsc::UnboundedSender<GeneratedCluster>>,
    rx: Option<mpsc::UnboundedReceiver<GeneratedCluster>>,
}

#[derive(Debug, Default)]
pub struct SessionSynchronizer {
    gates: Mutex<HashMap<SessionId, Arc<OrderingGate>>>,
    drained: Mutex<HashSet<SessionId>>,
    channels: Mutex<HashMap<SessionId, ChannelSlot>>,
}

impl SessionSynchronizer {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Ordering gate
    // ------------------------------------------------------------------

    /// Create the session's gate with `prerequisites` outstanding families.
    /// Re-arming an undrained gate keeps the existing one.
    pub fn arm(&self, session: SessionId, prerequisites: usize) -> Arc<OrderingGate> {
        self.drained.lock().remove(&session);
        let mut gates = self.gates.lock();
        gates
            .entry(session)
            .or_insert_with(|| {
                debug!(%session, prerequisites, "ordering gate armed");
                Arc::new(OrderingGate::new(prerequisites))
            })
            .clone()
    }

    pub fn gate(&self, session: SessionId) -> Option<Arc<OrderingGate>> {
        self.gates.lock().get(&session).cloned()
    }

    /// Returns the remaining count, or `None` if no gate is armed
    pub fn complete_prerequisite(&self, session: SessionId) -> Option<usize> {
        let gate = self.gate(session);
        match gate {
            Some(gate) => {
                let left = gate.complete_one();
                debug!(%session, remaining = left, "prerequisite completed");
                Some(left)
            }
            None => {
                warn!(%session, "prerequisite completed with no armed gate");
                None
            }
        }
    }

    /// Block a dependent family until the gate drains.
    ///
    /// Fails with `GateNotArmed` if the gate was never set up for this
    /// session; passes immediately once a previous dependent drained it.
    pub async fn await_dependent(&self, session: SessionId, token: &CancelToken) -> Result<(), SessionError> {
        let Some(gate) = self.gate(session) else {
            if self.drained.lock().contains(&session) {
                return Ok(());
            }
            return Err(SessionError::GateNotArmed(session));
        };

        gate.wait(token).await.map_err(|_| SessionError::Cancelled(session))?;

        {
            let mut gates = self.gates.lock();
            if gates.get(&session).is_some_and(|g| Arc::ptr_eq(g, &gate)) {
                gates.remove(&session);
            }
        }
        self.drained.lock().insert(session);
        debug!(%session, "ordering gate drained");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Cluster channel
    // ------------------------------------------------------------------

    /// Create (or reuse) the session's channel and return a publisher
    pub fn open_channel(&self, session: SessionId) -> ClusterPublisher {
        let mut channels = self.channels.lock();
        let slot = channels.entry(session).or_default();
        let tx = match &slot.tx {
            Some(tx) => tx.clone(),
            None => {
                let (tx, rx) = mpsc::unbounded_channel();
                slot.tx = Some(tx.clone());
                slot.rx = Some(rx);
                tx
            }
        };
        ClusterPublisher { session, tx }
    }

    pub fn publisher(&self, session: SessionId) -> Option<ClusterPublisher> {
        let channels = self.channels.lock();
        channels
            .get(&session)
            .and_then(|slot| slot.tx.clone())
            .map(|tx| ClusterPublisher { session, tx })
    }

    /// The single consumer; `None` if already taken or never opened
    pub fn take_receiver(&self, session: SessionId) -> Option<ClusterReceiver> {
        let mut channels = self.channels.lock();
        channels
            .get_mut(&session)
            .and_then(|slot| slot.rx.take())
            .map(|rx| ClusterReceiver { session, rx })
    }

    /// Drop the synchronizer's own sender so the receiver sees the end of
    /// the stream once every outstanding publisher is dropped
    pub fn close_channel(&self, session: SessionId) {
        self.channels.lock().remove(&session);
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Wake gate waiters and close the channel. Idempotent.
    pub fn cancel(&self, session: SessionId) {
        if let Some(gate) = self.gates.lock().remove(&session) {
            gate.release();
        }
        if let Some(mut slot) = self.channels.lock().remove(&session) {
            if let Some(mut rx) = slot.rx.take() {
                rx.close();
            }
        }
        debug!(%session, "synchronizer released");
    }

    /// Forget everything about a finished session
    pub fn forget(&self, session: SessionId) {
        self.cancel(session);
        self.drained.lock().remove(&session);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dungeon_core::{ClusterGenerator, ClusterId, ClusterSpec, GenerationConfig, Point, Rect, WalkerIds, WeightVector};
    use std::time::Duration;

    fn tiny_cluster(id: u32) -> GeneratedCluster {
        let spec = ClusterSpec {
            id: ClusterId(id),
            rect: Rect::new(0, 0, 2, 2),
            start: Point::new(0, 0),
            end: Point::new(1, 1),
            expected_weight: WeightVector::ZERO,
            depth: 1,
            seed: id as u64,
        };
        ClusterGenerator::new(GenerationConfig::default())
            .generate(&spec, &WalkerIds::new())
            .unwrap()
    }

    #[tokio::test]
    async fn test_zero_prerequisites_never_blocks() {
        let sync = SessionSynchronizer::new();
        let token = CancelToken::new();
        sync.arm(SessionId(1), 0);
        tokio::time::timeout(Duration::from_millis(100), sync.await_dependent(SessionId(1), &token))
            .await
            .expect("zero-count gate must not block")
            .unwrap();
    }

    #[tokio::test]
    async fn test_unarmed_gate_is_an_error() {
        let sync = SessionSynchronizer::new();
        let err = sync
            .await_dependent(SessionId(2), &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::GateNotArmed(SessionId(2))));
    }

    #[tokio::test]
    async fn test_dependent_waits_for_prerequisites() {
        let sync = Arc::new(SessionSynchronizer::new());
        let token = CancelToken::new();
        sync.arm(SessionId(3), 2);

        let waiter = {
            let (sync, token) = (sync.clone(), token.clone());
            tokio::spawn(async move { sync.await_dependent(SessionId(3), &token).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        assert_eq!(sync.complete_prerequisite(SessionId(3)), Some(1));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        assert_eq!(sync.complete_prerequisite(SessionId(3)), Some(0));
        waiter.await.unwrap().unwrap();

        // drained: a second dependent passes and the gate is gone
        assert!(sync.gate(SessionId(3)).is_none());
        sync.await_dependent(SessionId(3), &token).await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_wakes_gate_waiter() {
        let sync = Arc::new(SessionSynchronizer::new());
        let token = CancelToken::new();
        sync.arm(SessionId(4), 1);
        let waiter = {
            let (sync, token) = (sync.clone(), token.clone());
            tokio::spawn(async move { sync.await_dependent(SessionId(4), &token).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
        sync.cancel(SessionId(4));
        let result = tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert!(matches!(result, Err(SessionError::Cancelled(_))));
    }

    #[tokio::test]
    async fn test_released_gate_does_not_count_as_drained() {
        let gate = OrderingGate::new(2);
        gate.release();
        assert!(gate.is_released());
        assert_eq!(gate.remaining(), 2);
        assert_eq!(gate.wait(&CancelToken::new()).await, Err(TaskError::Cancelled));
    }

    #[tokio::test]
    async fn test_channel_single_consumer_sees_everything() {
        let sync = SessionSynchronizer::new();
        let token = CancelToken::new();
        let publisher = sync.open_channel(SessionId(5));
        let mut rx = sync.take_receiver(SessionId(5)).unwrap();
        assert!(sync.take_receiver(SessionId(5)).is_none(), "only one consumer");

        for id in 0..3 {
            publisher.publish(tiny_cluster(id)).unwrap();
        }
        drop(publisher);
        sync.close_channel(SessionId(5));

        let mut seen = Vec::new();
        while let Some(c) = rx.recv(&token).await.unwrap() {
            seen.push(c.id.0);
        }
        assert_eq!(seen, vec![0, 1, 2], "FIFO for one producer");
    }

    #[tokio::test]
    async fn test_cancel_closes_channel() {
        let sync = SessionSynchronizer::new();
        let token = CancelToken::new();
        let publisher = sync.open_channel(SessionId(6));
        let mut rx = sync.take_receiver(SessionId(6)).unwrap();

        token.cancel();
        sync.cancel(SessionId(6));
        assert!(matches!(rx.recv(&token).await, Err(SessionError::Cancelled(_))));

        // receiver closed by the consumer: publishing now fails instead of leaking
        rx.close_and_drain();
        assert_eq!(publisher.publish(tiny_cluster(9)), Err(TaskError::Cancelled));
    }
}
