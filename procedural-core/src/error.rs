use thiserror::Error;

use crate::cluster::ClusterId;

/// Errors raised while planning, filling or stitching a level
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("cluster {id} is invalid: {reason}")]
    InvalidCluster { id: ClusterId, reason: String },

    #[error("cluster {id} exhausted its step budget of {budget}")]
    StepBudgetExhausted { id: ClusterId, budget: usize },

    #[error("cluster {id} weight did not converge: balance {actual:.1}, expected {expected:.1}")]
    WeightDiverged {
        id: ClusterId,
        actual: f64,
        expected: f64,
    },

    #[error("cluster {id} left {unvisited} cells unvisited")]
    IncompleteCoverage { id: ClusterId, unvisited: usize },

    #[error("generation of cluster {0} was interrupted")]
    Interrupted(ClusterId),

    #[error("invalid level plan: {0}")]
    InvalidPlan(String),

    #[error("level is missing cluster {0}")]
    MissingCluster(ClusterId),

    #[error("end room is unreachable from the start room")]
    Disconnected,

    #[error("config error: {0}")]
    Config(String),
}

impl GenerationError {
    /// Errors worth retrying with a fresh seed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GenerationError::StepBudgetExhausted { .. }
                | GenerationError::WeightDiverged { .. }
                | GenerationError::IncompleteCoverage { .. }
        )
    }
}
