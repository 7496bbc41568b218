//! CK-014: Pipeline runner — every remaining chunk, in generation order.
//!
//! Chunk-local failures are collected and the run moves on; only a store
//! failure aborts. Re-running retries whatever is not yet completed.

use super::error::PipelineError;
use super::executor::ChunkExecutor;
use super::types::{ChunkError, PipelineEvent, ProjectStatus, RunReport};
use crate::tripwire::eventlog::generate_run_id;
use std::time::{Duration, Instant};
use tracing::{info, warn};

pub struct PipelineRunner<'a> {
    executor: ChunkExecutor<'a>,
    pacing: Duration,
}

impl<'a> PipelineRunner<'a> {
    pub fn new(executor: ChunkExecutor<'a>) -> Self {
        Self {
            executor,
            pacing: Duration::from_secs(2),
        }
    }

    /// Delay between consecutive generation calls.
    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    pub async fn run_all(&self, project_id: &str) -> Result<RunReport, PipelineError> {
        let store = self.executor.store();
        let events = self.executor.events();

        if store.project(project_id)?.is_none() {
            return Err(PipelineError::NotFound(format!("project {}", project_id)));
        }
        let records = store.chunks(project_id)?;
        if records.is_empty() {
            return Err(PipelineError::NotFound(format!(
                "planned chunks for {}",
                project_id
            )));
        }

        let run_id = generate_run_id();
        store.set_project_status(project_id, ProjectStatus::Running, None)?;
        events.emit(
            project_id,
            PipelineEvent::RunStarted {
                project: project_id.to_string(),
                run_id: run_id.clone(),
                chunkforge_version: env!("CARGO_PKG_VERSION").to_string(),
            },
        );
        info!(project = project_id, run_id = %run_id, chunks = records.len(), "run started");

        let started = Instant::now();
        let mut report = RunReport {
            project_id: project_id.to_string(),
            run_id: run_id.clone(),
            total_chunks: records.len(),
            completed: 0,
            failed: 0,
            skipped: 0,
            calls: 0,
            per_chunk_errors: Vec::new(),
            status: ProjectStatus::Running,
        };

        for record in &records {
            if !record.status.is_runnable() {
                report.completed += 1;
                report.skipped += 1;
                continue;
            }

            let pause = if report.calls > 0 {
                self.pacing
            } else {
                Duration::ZERO
            };

            match self
                .executor
                .execute_after(project_id, &record.chunk_id, pause)
                .await
            {
                Ok(outcome) => {
                    report.completed += 1;
                    if outcome.skipped {
                        report.skipped += 1;
                    } else {
                        report.calls += 1;
                    }
                }
                Err(e) if e.is_chunk_local() => {
                    if matches!(e, PipelineError::ChunkExecutionFailure { .. }) {
                        report.calls += 1;
                    }
                    report.failed += 1;
                    report.per_chunk_errors.push(ChunkError {
                        chunk_id: record.chunk_id.clone(),
                        error: e.to_string(),
                    });
                }
                Err(e) => {
                    warn!(project = project_id, error = %e, "run aborted");
                    let reason = e.to_string();
                    if let Err(status_err) =
                        store.set_project_status(project_id, ProjectStatus::Failed, Some(&reason))
                    {
                        warn!(project = project_id, error = %status_err, "could not mark project failed");
                    }
                    return Err(e);
                }
            }
        }

        report.status = if report.failed == 0 {
            ProjectStatus::Completed
        } else {
            ProjectStatus::Partial
        };
        let last_error = report.per_chunk_errors.last().map(|e| e.error.clone());
        store.set_project_status(project_id, report.status, last_error.as_deref())?;

        let total_seconds = started.elapsed().as_secs_f64();
        info!(
            project = project_id,
            run_id = %run_id,
            completed = report.completed,
            failed = report.failed,
            calls = report.calls,
            total_seconds,
            "run finished"
        );
        events.emit(
            project_id,
            PipelineEvent::RunCompleted {
                project: project_id.to_string(),
                run_id,
                completed: report.completed,
                failed: report.failed,
                total_seconds,
            },
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testkit::{self, chunk_needle, files_reply, ChunkShape, THREE};
    use crate::core::types::{ChunkRecord, ChunkStatus, Manifest, ProjectRow};
    use crate::generation::fake::{FakeGeneration, Reply};
    use crate::store::{ChunkStore, Completion, SqliteStore, StoreError};
    use crate::tripwire::eventlog::EventSink;

    fn runner<'a>(store: &'a SqliteStore, service: &'a FakeGeneration) -> PipelineRunner<'a> {
        PipelineRunner::new(ChunkExecutor::new(store, service)).with_pacing(Duration::ZERO)
    }

    fn all_succeed(ids: &[&str]) -> FakeGeneration {
        ids.iter().fold(FakeGeneration::new().with_tokens(100), |svc, id| {
            svc.reply(&chunk_needle(id), &files_reply(&[format!("src/{id}.ts").as_str()]))
        })
    }

    fn completed_count(store: &SqliteStore) -> usize {
        store
            .chunks("campus")
            .unwrap()
            .iter()
            .filter(|r| r.status == ChunkStatus::Completed)
            .count()
    }

    #[tokio::test]
    async fn test_ck014_run_all_completes() {
        let store = testkit::planned_store(THREE);
        let service = all_succeed(&["infra", "schema", "auth"]);
        let report = runner(&store, &service).run_all("campus").await.unwrap();

        assert_eq!(report.total_chunks, 3);
        assert_eq!(report.completed, 3);
        assert_eq!(report.failed, 0);
        assert_eq!(report.calls, 3);
        assert_eq!(report.status, ProjectStatus::Completed);
        assert!(report.per_chunk_errors.is_empty());

        let project = store.project("campus").unwrap().unwrap();
        assert_eq!(project.status, ProjectStatus::Completed);
        assert_eq!(project.completed_chunks, 3);
    }

    #[tokio::test]
    async fn test_ck014_second_run_makes_no_calls() {
        let store = testkit::planned_store(THREE);
        let service = all_succeed(&["infra", "schema", "auth"]);
        let runner = runner(&store, &service);
        runner.run_all("campus").await.unwrap();
        let calls_after_first = service.calls();

        let report = runner.run_all("campus").await.unwrap();
        assert_eq!(service.calls(), calls_after_first);
        assert_eq!(report.calls, 0);
        assert_eq!(report.skipped, 3);
        assert_eq!(report.completed, report.total_chunks);
        assert_eq!(report.failed, 0);
    }

    #[tokio::test]
    async fn test_ck014_step_by_step_then_run() {
        let store = testkit::planned_store(THREE);
        let service = all_succeed(&["infra", "schema", "auth"]);
        let executor = ChunkExecutor::new(&store, &service);

        executor.execute("campus", "infra").await.unwrap();
        let err = executor.execute("campus", "auth").await.unwrap_err();
        assert!(matches!(
            &err,
            PipelineError::DependencyNotSatisfied { unmet, .. } if unmet == &vec!["schema".to_string()]
        ));
        executor.execute("campus", "schema").await.unwrap();
        executor.execute("campus", "auth").await.unwrap();

        let report = PipelineRunner::new(executor)
            .with_pacing(Duration::ZERO)
            .run_all("campus")
            .await
            .unwrap();
        assert_eq!(report.completed, 3);
        assert_eq!(report.failed, 0);
        assert_eq!(report.calls, 0);
    }

    #[tokio::test]
    async fn test_ck014_schema_timeout_cascades() {
        let store = testkit::planned_store(THREE);
        let service = FakeGeneration::new()
            .reply(&chunk_needle("infra"), &files_reply(&["docker-compose.yml"]))
            .on(
                &chunk_needle("schema"),
                Reply::Slow(Duration::from_secs(5), files_reply(&["schema.sql"])),
            )
            .reply(&chunk_needle("auth"), &files_reply(&["auth.ts"]));
        let runner = PipelineRunner::new(
            ChunkExecutor::new(&store, &service).with_timeout(Duration::from_millis(30)),
        )
        .with_pacing(Duration::ZERO);

        let report = runner.run_all("campus").await.unwrap();
        assert_eq!(report.completed, 1);
        assert_eq!(report.failed, 2);
        assert_eq!(report.status, ProjectStatus::Partial);
        assert_eq!(report.per_chunk_errors[0].chunk_id, "schema");
        assert!(report.per_chunk_errors[0].error.contains("timed out"));
        assert_eq!(report.per_chunk_errors[1].chunk_id, "auth");
        assert!(report.per_chunk_errors[1].error.contains("dependency not satisfied"));

        let schema = store.chunk("campus", "schema").unwrap().unwrap();
        assert_eq!(schema.status, ChunkStatus::Failed);
        // blocked chunk is reported but its record is untouched
        let auth = store.chunk("campus", "auth").unwrap().unwrap();
        assert_eq!(auth.status, ChunkStatus::Pending);
        assert_eq!(service.calls(), 2);

        let project = store.project("campus").unwrap().unwrap();
        assert_eq!(project.status, ProjectStatus::Partial);
        assert!(project.last_error.unwrap().contains("auth"));
    }

    #[tokio::test]
    async fn test_ck014_independent_chunks_survive_failure() {
        const SHAPES: &[ChunkShape<'static>] = &[
            ("infra", "infrastructure", 1, &[]),
            ("schema", "database", 2, &["infra"]),
            ("ui-students", "frontend-module", 5, &["schema"]),
            ("ui-employers", "frontend-module", 5, &["schema"]),
            ("seed", "seed-data", 6, &["schema"]),
        ];
        let store = testkit::planned_store(SHAPES);
        let service = all_succeed(&["infra", "schema", "ui-employers", "seed"])
            .fail(&chunk_needle("ui-students"), "model overloaded");

        let report = runner(&store, &service).run_all("campus").await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.completed, 4);
        assert_eq!(report.per_chunk_errors[0].chunk_id, "ui-students");
        for id in ["infra", "schema", "ui-employers", "seed"] {
            assert_eq!(
                store.chunk("campus", id).unwrap().unwrap().status,
                ChunkStatus::Completed,
                "{id}"
            );
        }
    }

    #[tokio::test]
    async fn test_ck014_retry_only_touches_failed() {
        let store = testkit::planned_store(THREE);
        let flaky = FakeGeneration::new()
            .reply(&chunk_needle("infra"), &files_reply(&["a"]))
            .fail(&chunk_needle("schema"), "503");
        runner(&store, &flaky).run_all("campus").await.unwrap();
        assert_eq!(completed_count(&store), 1);

        let healthy = all_succeed(&["infra", "schema", "auth"]);
        let report = runner(&store, &healthy).run_all("campus").await.unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.calls, 2);
        assert_eq!(report.status, ProjectStatus::Completed);
        assert!(healthy.prompts().iter().all(|p| !p.contains("Chunk: infra\n")));
    }

    #[tokio::test]
    async fn test_ck014_counters_track_records() {
        let store = testkit::planned_store(THREE);
        let service = all_succeed(&["infra"]).fail(&chunk_needle("schema"), "x");
        runner(&store, &service).run_all("campus").await.unwrap();
        let project = store.project("campus").unwrap().unwrap();
        assert_eq!(project.completed_chunks, completed_count(&store));
        assert_eq!(project.total_chunks, 3);
    }

    #[tokio::test]
    async fn test_ck014_pacing_only_between_calls() {
        let store = testkit::planned_store(THREE);
        let service = all_succeed(&["infra", "schema", "auth"]);
        ChunkExecutor::new(&store, &service)
            .execute("campus", "infra")
            .await
            .unwrap();

        let paced = PipelineRunner::new(ChunkExecutor::new(&store, &service))
            .with_pacing(Duration::from_millis(50));
        let started = Instant::now();
        let report = paced.run_all("campus").await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(report.calls, 2);
        // one pause: skipped infra costs nothing, schema goes first unpaced
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_ck014_unplanned_project() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.register_project("campus", "doc").unwrap();
        let service = FakeGeneration::new();
        let err = runner(&store, &service).run_all("campus").await.unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(_)));

        let err = runner(&store, &service).run_all("ghost").await.unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_ck014_run_events() {
        let dir = tempfile::tempdir().unwrap();
        let store = testkit::planned_store(THREE);
        let service = all_succeed(&["infra", "schema", "auth"]);
        PipelineRunner::new(
            ChunkExecutor::new(&store, &service).with_events(EventSink::new(dir.path())),
        )
        .with_pacing(Duration::ZERO)
        .run_all("campus")
        .await
        .unwrap();

        let log = std::fs::read_to_string(dir.path().join("campus/events.jsonl")).unwrap();
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines.len(), 8);
        assert!(lines[0].contains("\"event\":\"run_started\""));
        assert!(lines[7].contains("\"event\":\"run_completed\""));
        assert!(lines[7].contains("\"completed\":3"));
    }

    /// Delegates to SQLite but cannot start generation for one chunk.
    struct BrokenDiskStore {
        inner: SqliteStore,
        broken_chunk: &'static str,
    }

    impl ChunkStore for BrokenDiskStore {
        fn register_project(&self, p: &str, d: &str) -> Result<(), StoreError> {
            self.inner.register_project(p, d)
        }
        fn project(&self, p: &str) -> Result<Option<ProjectRow>, StoreError> {
            self.inner.project(p)
        }
        fn list_projects(&self) -> Result<Vec<ProjectRow>, StoreError> {
            self.inner.list_projects()
        }
        fn set_project_status(
            &self,
            p: &str,
            s: ProjectStatus,
            e: Option<&str>,
        ) -> Result<(), StoreError> {
            self.inner.set_project_status(p, s, e)
        }
        fn manifest(&self, p: &str) -> Result<Option<Manifest>, StoreError> {
            self.inner.manifest(p)
        }
        fn plan_reply(&self, p: &str) -> Result<Option<String>, StoreError> {
            self.inner.plan_reply(p)
        }
        fn replace_plan(
            &self,
            p: &str,
            d: &str,
            reply: &str,
            m: &Manifest,
            r: &[ChunkRecord],
        ) -> Result<(), StoreError> {
            self.inner.replace_plan(p, d, reply, m, r)
        }
        fn chunk(&self, p: &str, c: &str) -> Result<Option<ChunkRecord>, StoreError> {
            self.inner.chunk(p, c)
        }
        fn chunks(&self, p: &str) -> Result<Vec<ChunkRecord>, StoreError> {
            self.inner.chunks(p)
        }
        fn mark_generating(&self, p: &str, c: &str) -> Result<(), StoreError> {
            if c == self.broken_chunk {
                return Err(StoreError::Io(std::io::Error::other("disk full")));
            }
            self.inner.mark_generating(p, c)
        }
        fn record_completion(
            &self,
            p: &str,
            c: &str,
            completion: &Completion<'_>,
        ) -> Result<(), StoreError> {
            self.inner.record_completion(p, c, completion)
        }
        fn record_failure(&self, p: &str, c: &str, e: &str) -> Result<(), StoreError> {
            self.inner.record_failure(p, c, e)
        }
    }

    #[tokio::test]
    async fn test_ck014_persistence_failure_aborts_run() {
        let store = BrokenDiskStore {
            inner: testkit::planned_store(THREE),
            broken_chunk: "schema",
        };
        let service = all_succeed(&["infra", "schema", "auth"]);
        let runner =
            PipelineRunner::new(ChunkExecutor::new(&store, &service)).with_pacing(Duration::ZERO);

        let err = runner.run_all("campus").await.unwrap_err();
        assert!(matches!(err, PipelineError::Persistence(_)));
        assert!(err.to_string().contains("disk full"));
        assert_eq!(service.calls(), 1);
        assert!(!service.prompts().iter().any(|p| p.contains(&chunk_needle("auth"))));

        let project = store.inner.project("campus").unwrap().unwrap();
        assert_eq!(project.status, ProjectStatus::Failed);
        assert!(project.last_error.unwrap().contains("disk full"));

        let infra = store.inner.chunk("campus", "infra").unwrap().unwrap();
        assert_eq!(infra.status, ChunkStatus::Completed);
        let auth = store.inner.chunk("campus", "auth").unwrap().unwrap();
        assert_eq!(auth.status, ChunkStatus::Pending);
    }
}
