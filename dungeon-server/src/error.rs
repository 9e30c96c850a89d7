use dungeon_core::GenerationError;
use thiserror::Error;

use crate::orchestrator::SessionId;
use crate::storage::StorageError;

/// Outcome of a single forked unit that did not produce a value
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("task failed: {0}")]
    Failed(String),

    /// Not an application error; never counted as a failure
    #[error("task was cancelled")]
    Cancelled,

    #[error("task panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    pub fn failed(err: impl std::fmt::Display) -> Self {
        TaskError::Failed(err.to_string())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskError::Cancelled)
    }
}

impl From<GenerationError> for TaskError {
    fn from(err: GenerationError) -> Self {
        match err {
            GenerationError::Interrupted(_) => TaskError::Cancelled,
            other => TaskError::Failed(other.to_string()),
        }
    }
}

/// Terminal error surfaced to whoever asked for a level
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("a level generation run is already active for session {0}")]
    GenerationInProgress(SessionId),

    #[error("ordering gate for session {0} was never armed")]
    GateNotArmed(SessionId),

    #[error("session {0} was cancelled")]
    Cancelled(SessionId),

    #[error("expected {expected} clusters, received {received}")]
    MissingClusters { expected: usize, received: usize },

    #[error("no level stored for session {0}")]
    LevelNotFound(SessionId),

    #[error("session {session} has no room at ({x}, {y})")]
    RoomNotFound { session: SessionId, x: i32, y: i32 },

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Task(#[from] TaskError),
}

impl SessionError {
    /// Errors that tear down the whole session scope
    pub fn is_session_fatal(&self) -> bool {
        !matches!(
            self,
            SessionError::GenerationInProgress(_)
                | SessionError::LevelNotFound(_)
                | SessionError::RoomNotFound { .. }
        )
    }
}
