//! CK-015: Progress reporting — pure reads over the persisted records.
//!
//! Counts and totals are recomputed from the chunk rows on every call.

use super::error::PipelineError;
use super::types::{
    ChunkRecord, ChunkStatus, ChunkSummary, FileEntry, ProjectProgress, ProjectStatus,
};
use crate::store::ChunkStore;
use crate::tripwire::hasher::hash_string;
use indexmap::IndexMap;

pub struct ProgressReporter<'a> {
    store: &'a dyn ChunkStore,
}

impl<'a> ProgressReporter<'a> {
    pub fn new(store: &'a dyn ChunkStore) -> Self {
        Self { store }
    }

    pub fn status(&self, project_id: &str) -> Result<ProjectProgress, PipelineError> {
        let project = self
            .store
            .project(project_id)?
            .ok_or_else(|| PipelineError::NotFound(format!("project {}", project_id)))?;
        let records = self.store.chunks(project_id)?;

        let mut per_status_counts: IndexMap<ChunkStatus, usize> =
            ChunkStatus::ALL.iter().map(|s| (*s, 0)).collect();
        for r in &records {
            *per_status_counts.entry(r.status).or_insert(0) += 1;
        }

        let total_chunks = records.len();
        let completed_chunks = per_status_counts[&ChunkStatus::Completed];
        let failed_chunks = per_status_counts[&ChunkStatus::Failed];

        let last_error = project.last_error.clone().or_else(|| {
            records
                .iter()
                .filter(|r| r.status == ChunkStatus::Failed)
                .find_map(|r| r.error_message.clone())
        });

        Ok(ProjectProgress {
            project_id: project_id.to_string(),
            overall_status: overall_status(
                project.status,
                total_chunks,
                completed_chunks,
                failed_chunks,
            ),
            total_chunks,
            completed_chunks,
            per_status_counts,
            total_tokens: records.iter().filter_map(|r| r.tokens_used).sum(),
            total_time_ms: records.iter().filter_map(|r| r.generation_time_ms).sum(),
            last_error,
            chunks: records.iter().map(summarize).collect(),
        })
    }

    /// Every completed chunk's files, in generation order.
    pub fn list_files(&self, project_id: &str) -> Result<Vec<FileEntry>, PipelineError> {
        if self.store.project(project_id)?.is_none() {
            return Err(PipelineError::NotFound(format!("project {}", project_id)));
        }
        let records = self.store.chunks(project_id)?;
        Ok(records
            .into_iter()
            .filter(|r| r.status == ChunkStatus::Completed)
            .flat_map(|r| {
                let chunk_id = r.chunk_id;
                let chunk_type = r.chunk_type;
                r.files_payload.into_iter().map(move |file| FileEntry {
                    chunk_id: chunk_id.clone(),
                    chunk_type: chunk_type.clone(),
                    content_hash: hash_string(&file.content),
                    file,
                })
            })
            .collect())
    }
}

/// Overall status from the stored status and the live record counts.
/// A run in progress and a failed plan win over the counts.
pub fn overall_status(
    stored: ProjectStatus,
    total: usize,
    completed: usize,
    failed: usize,
) -> ProjectStatus {
    match stored {
        ProjectStatus::Running | ProjectStatus::Failed => stored,
        _ if total == 0 => stored,
        _ if completed == total => ProjectStatus::Completed,
        _ if completed > 0 || failed > 0 => ProjectStatus::Partial,
        _ => ProjectStatus::Planned,
    }
}

fn summarize(r: &ChunkRecord) -> ChunkSummary {
    ChunkSummary {
        chunk_id: r.chunk_id.clone(),
        chunk_type: r.chunk_type.clone(),
        generation_order: r.generation_order,
        status: r.status,
        dependencies: r.dependencies.clone(),
        files_count: r.files_count,
        tokens_used: r.tokens_used,
        generation_time_ms: r.generation_time_ms,
        error_message: r.error_message.clone(),
        generated_at: r.generated_at.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::executor::ChunkExecutor;
    use crate::core::testkit::{self, chunk_needle, files_reply, THREE};
    use crate::generation::fake::FakeGeneration;
    use crate::store::SqliteStore;

    #[test]
    fn test_ck015_overall_status_rules() {
        use ProjectStatus::*;
        assert_eq!(overall_status(Draft, 0, 0, 0), Draft);
        assert_eq!(overall_status(Planned, 3, 0, 0), Planned);
        assert_eq!(overall_status(Planned, 3, 1, 0), Partial);
        assert_eq!(overall_status(Planned, 3, 0, 1), Partial);
        assert_eq!(overall_status(Partial, 3, 3, 0), Completed);
        assert_eq!(overall_status(Running, 3, 3, 0), Running);
        assert_eq!(overall_status(Failed, 3, 3, 0), Failed);
    }

    #[test]
    fn test_ck015_status_fresh_plan() {
        let store = testkit::planned_store(THREE);
        let progress = ProgressReporter::new(&store).status("campus").unwrap();
        assert_eq!(progress.overall_status, ProjectStatus::Planned);
        assert_eq!(progress.total_chunks, 3);
        assert_eq!(progress.completed_chunks, 0);
        assert_eq!(progress.per_status_counts[&ChunkStatus::Pending], 3);
        assert_eq!(progress.per_status_counts.len(), 4);
        assert_eq!(progress.total_tokens, 0);
        let ids: Vec<_> = progress.chunks.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["infra", "schema", "auth"]);
    }

    #[tokio::test]
    async fn test_ck015_status_after_transitions() {
        let store = testkit::planned_store(THREE);
        let service = FakeGeneration::new()
            .reply(&chunk_needle("infra"), &files_reply(&["a.ts", "b.ts"]))
            .fail(&chunk_needle("schema"), "bad reply")
            .with_tokens(250);
        let executor = ChunkExecutor::new(&store, &service);
        executor.execute("campus", "infra").await.unwrap();
        executor.execute("campus", "schema").await.unwrap_err();

        let progress = ProgressReporter::new(&store).status("campus").unwrap();
        assert_eq!(progress.completed_chunks, 1);
        assert_eq!(
            progress.completed_chunks,
            store.project("campus").unwrap().unwrap().completed_chunks
        );
        assert_eq!(progress.per_status_counts[&ChunkStatus::Failed], 1);
        assert_eq!(progress.per_status_counts[&ChunkStatus::Pending], 1);
        assert_eq!(progress.total_tokens, 250);
        assert_eq!(progress.overall_status, ProjectStatus::Partial);
        assert_eq!(progress.last_error.as_deref(), Some("bad reply"));
        assert_eq!(progress.chunks[0].files_count, 2);
    }

    #[tokio::test]
    async fn test_ck015_list_files_tagged() {
        let store = testkit::planned_store(THREE);
        let service = FakeGeneration::new()
            .reply(&chunk_needle("infra"), &files_reply(&["docker-compose.yml"]))
            .reply(&chunk_needle("schema"), &files_reply(&["db/schema.sql", "db/seed.sql"]));
        let executor = ChunkExecutor::new(&store, &service);
        executor.execute("campus", "infra").await.unwrap();
        executor.execute("campus", "schema").await.unwrap();

        let files = ProgressReporter::new(&store).list_files("campus").unwrap();
        let paths: Vec<_> = files.iter().map(|f| f.file.path.as_str()).collect();
        assert_eq!(paths, vec!["docker-compose.yml", "db/schema.sql", "db/seed.sql"]);
        assert_eq!(files[1].chunk_id, "schema");
        assert_eq!(files[1].chunk_type.to_string(), "database");
        assert_eq!(files[1].content_hash, hash_string("// db/schema.sql\n"));

        let json = serde_json::to_value(&files[0]).unwrap();
        assert_eq!(json["chunkId"], "infra");
        assert_eq!(json["path"], "docker-compose.yml");
        assert!(json["contentHash"].as_str().unwrap().starts_with("blake3:"));
    }

    #[test]
    fn test_ck015_unknown_project() {
        let store = SqliteStore::open_in_memory().unwrap();
        let reporter = ProgressReporter::new(&store);
        assert!(matches!(reporter.status("ghost"), Err(PipelineError::NotFound(_))));
        assert!(matches!(reporter.list_files("ghost"), Err(PipelineError::NotFound(_))));
    }
}
