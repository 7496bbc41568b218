//! CK-007: Pipeline error taxonomy.

use crate::store::StoreError;
use std::fmt;

/// Errors surfaced by the planner, executor and runner.
#[derive(Debug)]
pub enum PipelineError {
    /// Service call or structural parse failed during planning.
    /// No chunk records were created or replaced.
    PlanningFailure(String),

    /// Attempted to execute a chunk whose dependencies are not all completed.
    DependencyNotSatisfied { chunk_id: String, unmet: Vec<String> },

    /// Service call failed, returned no usable files, or could not be parsed.
    /// Already persisted onto the chunk by the time the caller sees it.
    ChunkExecutionFailure { chunk_id: String, reason: String },

    /// Unknown project or chunk id.
    NotFound(String),

    /// The durable store rejected a read or write.
    Persistence(StoreError),
}

impl PipelineError {
    /// Whether a multi-chunk run may continue past this error.
    pub fn is_chunk_local(&self) -> bool {
        matches!(
            self,
            Self::DependencyNotSatisfied { .. } | Self::ChunkExecutionFailure { .. }
        )
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PlanningFailure(msg) => write!(f, "planning failed: {msg}"),
            Self::DependencyNotSatisfied { chunk_id, unmet } => write!(
                f,
                "dependency not satisfied for '{chunk_id}': {}",
                unmet.join(", ")
            ),
            Self::ChunkExecutionFailure { chunk_id, reason } => {
                write!(f, "chunk '{chunk_id}' failed: {reason}")
            }
            Self::NotFound(what) => write!(f, "not found: {what}"),
            Self::Persistence(err) => write!(f, "persistence failure: {err}"),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Persistence(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for PipelineError {
    fn from(value: StoreError) -> Self {
        Self::Persistence(value)
    }
}
