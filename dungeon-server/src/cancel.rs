//! Cooperative cancellation shared by every wait inside a session scope.

use std::sync::Arc;
use tokio::sync::watch;

/// Broadcast cancellation flag.
///
/// Clones share one flag. Async code awaits [`CancelToken::cancelled`];
/// blocking code (cluster walkers on the blocking pool) polls
/// [`CancelToken::is_cancelled`]. Once set the flag never clears.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Idempotent
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the token is cancelled; cancel-safe in `select!`
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // the sender lives as long as `self`, so this only returns on cancel
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}
