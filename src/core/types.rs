//! CK-001: Manifest model — chunk definitions, manifests, chunk records, generated files.
//!
//! Wire shapes use camelCase (the generation service speaks JSON); everything
//! derives Serialize/Deserialize so manifests round-trip through the store.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Chunk categories
// ============================================================================

/// Category tag of a chunk. Unknown tags are preserved verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ChunkType {
    Infrastructure,
    Database,
    BackendModule,
    Core,
    FrontendModule,
    SeedData,
    Other(String),
}

impl From<String> for ChunkType {
    fn from(raw: String) -> Self {
        let norm = raw.trim().to_ascii_lowercase().replace(['_', ' '], "-");
        match norm.as_str() {
            "infrastructure" | "infra" => Self::Infrastructure,
            "database" | "schema" | "db" => Self::Database,
            "backend-module" | "backend" => Self::BackendModule,
            "core" | "core-wiring" => Self::Core,
            "frontend-module" | "frontend" => Self::FrontendModule,
            "seed-data" | "seed" | "mock-data" => Self::SeedData,
            _ => Self::Other(raw),
        }
    }
}

impl From<ChunkType> for String {
    fn from(t: ChunkType) -> Self {
        t.to_string()
    }
}

impl fmt::Display for ChunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Database => write!(f, "database"),
            Self::BackendModule => write!(f, "backend-module"),
            Self::Core => write!(f, "core"),
            Self::FrontendModule => write!(f, "frontend-module"),
            Self::SeedData => write!(f, "seed-data"),
            Self::Other(s) => write!(f, "{}", s),
        }
    }
}

// ============================================================================
// Manifest (the plan)
// ============================================================================

/// Planned file priority — the planner emits either a rank or a label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Priority {
    Rank(i64),
    Label(String),
}

/// A file the planner expects a chunk to produce. Plan only, no content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedFile {
    pub path: String,

    #[serde(rename = "type", default)]
    pub file_type: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub priority: Option<Priority>,
}

/// One independently generated slice of the target codebase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkDefinition {
    /// Unique within the project
    pub chunk_id: String,

    pub chunk_type: ChunkType,

    pub description: String,

    /// Ascending execution order; ties broken by declaration order
    pub generation_order: i64,

    /// Chunk ids that must be completed first
    #[serde(default)]
    pub dependencies: Vec<String>,

    #[serde(default)]
    pub files: Vec<PlannedFile>,
}

/// A column extracted from the design document's schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlColumn {
    pub name: String,

    #[serde(default)]
    pub data_type: String,

    #[serde(default)]
    pub primary_key: bool,

    /// `table(column)` or bare `table`
    #[serde(default)]
    pub references: Option<String>,
}

/// A table extracted from the design document's schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlTable {
    pub name: String,

    #[serde(default)]
    pub columns: Vec<SqlColumn>,
}

/// A functional module extracted from the design document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionalModule {
    pub title: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub inputs: Vec<String>,

    #[serde(default)]
    pub outputs: Vec<String>,
}

/// The full plan for a project. Read-only once persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub project_name: String,

    pub target_language: String,

    /// May be a placeholder
    #[serde(default)]
    pub publish_url: String,

    pub chunks: Vec<ChunkDefinition>,

    /// Intended global sequence of chunk ids
    #[serde(default)]
    pub generation_order: Vec<String>,

    #[serde(default)]
    pub sql_tables: Vec<SqlTable>,

    #[serde(default)]
    pub modules: Vec<FunctionalModule>,
}

impl Manifest {
    /// Look up a chunk definition by id.
    pub fn chunk(&self, chunk_id: &str) -> Option<&ChunkDefinition> {
        self.chunks.iter().find(|c| c.chunk_id == chunk_id)
    }
}

// ============================================================================
// Chunk records (mutable, persisted)
// ============================================================================

/// Chunk lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    Pending,
    Generating,
    Completed,
    Failed,
}

impl ChunkStatus {
    pub const ALL: [ChunkStatus; 4] = [
        Self::Pending,
        Self::Generating,
        Self::Completed,
        Self::Failed,
    ];

    /// Whether execution may (re)start from this status. A leftover
    /// `Generating` means a crashed run and counts as retryable.
    pub fn is_runnable(self) -> bool {
        !matches!(self, Self::Completed)
    }
}

impl fmt::Display for ChunkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Generating => write!(f, "generating"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for ChunkStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "generating" => Ok(Self::Generating),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown chunk status: {}", other)),
        }
    }
}

/// A generated source file — the payload of a completed chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedFile {
    /// Project-relative path
    pub path: String,

    /// Coarse category tag, reporting only
    #[serde(rename = "type", default)]
    pub file_type: String,

    /// Complete file text
    pub content: String,

    #[serde(default)]
    pub description: String,
}

/// Persisted per-chunk state, one per ChunkDefinition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkRecord {
    pub project_id: String,
    pub chunk_id: String,
    pub chunk_type: ChunkType,
    pub description: String,
    pub generation_order: i64,

    /// Declaration index within the manifest (tie-breaker)
    pub seq: i64,

    pub dependencies: Vec<String>,
    pub status: ChunkStatus,

    /// Present only when completed
    #[serde(default)]
    pub files_payload: Vec<GeneratedFile>,

    pub files_count: usize,
    pub tokens_used: Option<u64>,
    pub generation_time_ms: Option<u64>,
    pub error_message: Option<String>,
    pub generated_at: Option<String>,
}

impl ChunkRecord {
    /// A fresh `pending` record for a planned chunk.
    pub fn pending(project_id: &str, seq: i64, def: &ChunkDefinition) -> Self {
        Self {
            project_id: project_id.to_string(),
            chunk_id: def.chunk_id.clone(),
            chunk_type: def.chunk_type.clone(),
            description: def.description.clone(),
            generation_order: def.generation_order,
            seq,
            dependencies: def.dependencies.clone(),
            status: ChunkStatus::Pending,
            files_payload: Vec::new(),
            files_count: 0,
            tokens_used: None,
            generation_time_ms: None,
            error_message: None,
            generated_at: None,
        }
    }
}

// ============================================================================
// Projects
// ============================================================================

/// Project-level status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    /// Registered, never planned
    Draft,
    Planned,
    Running,
    Completed,
    Partial,
    Failed,
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Draft => write!(f, "draft"),
            Self::Planned => write!(f, "planned"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Partial => write!(f, "partial"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for ProjectStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "planned" => Ok(Self::Planned),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "partial" => Ok(Self::Partial),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown project status: {}", other)),
        }
    }
}

/// Persisted project row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectRow {
    pub project_id: String,
    pub design_document: String,
    pub status: ProjectStatus,
    pub total_chunks: usize,
    pub completed_chunks: usize,
    pub last_error: Option<String>,
    pub updated_at: String,
}

// ============================================================================
// Results and reports
// ============================================================================

/// Result of executing (or skipping) one chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutcome {
    pub chunk_id: String,
    pub files_generated: usize,
    pub tokens_used: Option<u64>,
    pub duration_ms: u64,

    /// Already completed; no service call was made
    pub skipped: bool,
}

/// A chunk that failed during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkError {
    pub chunk_id: String,
    pub error: String,
}

/// Terminal report of a `run_all` pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub project_id: String,
    pub run_id: String,
    pub total_chunks: usize,

    /// Includes chunks that were already completed
    pub completed: usize,
    pub failed: usize,

    /// Completed before this run started
    pub skipped: usize,

    /// Service calls actually made
    pub calls: usize,

    pub per_chunk_errors: Vec<ChunkError>,
    pub status: ProjectStatus,
}

/// Per-chunk line in a progress report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkSummary {
    pub chunk_id: String,
    pub chunk_type: ChunkType,
    pub generation_order: i64,
    pub status: ChunkStatus,
    pub dependencies: Vec<String>,
    pub files_count: usize,
    pub tokens_used: Option<u64>,
    pub generation_time_ms: Option<u64>,
    pub error_message: Option<String>,
    pub generated_at: Option<String>,
}

/// Project progress, derived from the chunk record set on every read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectProgress {
    pub project_id: String,
    pub overall_status: ProjectStatus,
    pub total_chunks: usize,
    pub completed_chunks: usize,
    pub per_status_counts: IndexMap<ChunkStatus, usize>,
    pub total_tokens: u64,
    pub total_time_ms: u64,
    pub last_error: Option<String>,
    pub chunks: Vec<ChunkSummary>,
}

/// A generated file tagged with the chunk that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub chunk_id: String,
    pub chunk_type: ChunkType,
    pub content_hash: String,
    #[serde(flatten)]
    pub file: GeneratedFile,
}

// ============================================================================
// Provenance events
// ============================================================================

/// Provenance event for the JSONL event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    PlanCreated {
        project: String,
        chunks: usize,
        manifest_hash: String,
    },
    PlanFailed {
        project: String,
        error: String,
    },
    RunStarted {
        project: String,
        run_id: String,
        chunkforge_version: String,
    },
    ChunkStarted {
        project: String,
        chunk: String,
        prompt_hash: String,
    },
    ChunkCompleted {
        project: String,
        chunk: String,
        files: usize,
        tokens: Option<u64>,
        duration_ms: u64,
        payload_hash: String,
    },
    ChunkFailed {
        project: String,
        chunk: String,
        error: String,
    },
    RunCompleted {
        project: String,
        run_id: String,
        completed: usize,
        failed: usize,
        total_seconds: f64,
    },
}

/// Timestamped event wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub ts: String,
    #[serde(flatten)]
    pub event: PipelineEvent,
}

// ============================================================================
// Tests
// ============================================================================
