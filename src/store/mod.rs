//! CK-013: Persisted store — projects, manifests, chunk records.
//!
//! Every chunk transition is one transaction that also recomputes the
//! project's `total_chunks` / `completed_chunks` from the chunk rows, so the
//! aggregate can never drift from the record set.

pub mod sqlite;

pub use sqlite::SqliteStore;

use crate::core::types::{ChunkRecord, GeneratedFile, Manifest, ProjectRow, ProjectStatus};
use std::fmt;

#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Sql(rusqlite::Error),
    Serde(serde_json::Error),
    NotFound(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "io: {err}"),
            Self::Sql(err) => write!(f, "sqlite: {err}"),
            Self::Serde(err) => write!(f, "json: {err}"),
            Self::NotFound(what) => write!(f, "unknown {what}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Sql(err) => Some(err),
            Self::Serde(err) => Some(err),
            Self::NotFound(_) => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql(value)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serde(value)
    }
}

/// Fields written when a chunk completes.
#[derive(Debug, Clone)]
pub struct Completion<'a> {
    pub files: &'a [GeneratedFile],
    pub tokens_used: Option<u64>,
    pub generation_time_ms: u64,
    pub generated_at: &'a str,
}

/// Durable storage for manifests and chunk records, keyed by project id.
pub trait ChunkStore {
    /// Create a project (status `draft`) or replace its design document.
    fn register_project(&self, project_id: &str, design_document: &str) -> Result<(), StoreError>;

    fn project(&self, project_id: &str) -> Result<Option<ProjectRow>, StoreError>;

    fn list_projects(&self) -> Result<Vec<ProjectRow>, StoreError>;

    fn set_project_status(
        &self,
        project_id: &str,
        status: ProjectStatus,
        last_error: Option<&str>,
    ) -> Result<(), StoreError>;

    fn manifest(&self, project_id: &str) -> Result<Option<Manifest>, StoreError>;

    /// The planner reply the current manifest was decoded from, as received.
    fn plan_reply(&self, project_id: &str) -> Result<Option<String>, StoreError>;

    /// Atomically persist a new manifest (with its source reply) and replace
    /// every chunk record.
    fn replace_plan(
        &self,
        project_id: &str,
        design_document: &str,
        plan_reply: &str,
        manifest: &Manifest,
        records: &[ChunkRecord],
    ) -> Result<(), StoreError>;

    fn chunk(&self, project_id: &str, chunk_id: &str) -> Result<Option<ChunkRecord>, StoreError>;

    /// All records, ordered by `(generation_order, seq)`.
    fn chunks(&self, project_id: &str) -> Result<Vec<ChunkRecord>, StoreError>;

    fn mark_generating(&self, project_id: &str, chunk_id: &str) -> Result<(), StoreError>;

    fn record_completion(
        &self,
        project_id: &str,
        chunk_id: &str,
        completion: &Completion<'_>,
    ) -> Result<(), StoreError>;

    /// Set `failed` + error message; other fields keep their values.
    fn record_failure(&self, project_id: &str, chunk_id: &str, error: &str)
        -> Result<(), StoreError>;
}
