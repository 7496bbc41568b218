//! CK-008: Chunk executor — one chunk, one generation call.
//!
//! precondition checks → mark generating → prompt → generate (bounded) →
//! sanitize → parse files → persist completed | failed → events
//!
//! Failures after the service is called are recorded on the chunk before
//! they are returned; dependency failures never mutate the record.

use super::error::PipelineError;
use super::export::check_relative_path;
use super::prompt::chunk_prompt;
use super::sanitize::sanitize;
use super::types::{
    ChunkDefinition, ChunkRecord, ChunkStatus, ExecutionOutcome, GeneratedFile, PipelineEvent,
};
use crate::generation::{generate_with_timeout, GenerationService};
use crate::store::{ChunkStore, Completion};
use crate::tripwire::eventlog::{now_iso8601, EventSink};
use crate::tripwire::hasher::{hash_string, payload_hash};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
struct FilesReply {
    files: Vec<GeneratedFile>,
}

/// Sanitize a chunk reply and decode its non-empty file list.
pub fn parse_files(reply: &str) -> Result<Vec<GeneratedFile>, String> {
    let reply: FilesReply = serde_json::from_str(&sanitize(reply))
        .map_err(|e| format!("could not parse files from reply: {}", e))?;
    if reply.files.is_empty() {
        return Err("reply contained no files".to_string());
    }
    for file in &reply.files {
        check_relative_path(&file.path)?;
    }
    Ok(reply.files)
}

pub struct ChunkExecutor<'a> {
    store: &'a dyn ChunkStore,
    service: &'a dyn GenerationService,
    events: EventSink,
    timeout: Duration,
}

impl<'a> ChunkExecutor<'a> {
    pub fn new(store: &'a dyn ChunkStore, service: &'a dyn GenerationService) -> Self {
        Self {
            store,
            service,
            events: EventSink::disabled(),
            timeout: Duration::from_secs(1800),
        }
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub(crate) fn store(&self) -> &'a dyn ChunkStore {
        self.store
    }

    pub(crate) fn events(&self) -> &EventSink {
        &self.events
    }

    /// Execute one chunk. Completed chunks are a free no-op.
    pub async fn execute(
        &self,
        project_id: &str,
        chunk_id: &str,
    ) -> Result<ExecutionOutcome, PipelineError> {
        self.execute_after(project_id, chunk_id, Duration::ZERO).await
    }

    /// Like [`execute`](Self::execute), waiting `pause` just before the
    /// service call. Nothing waits if the chunk is skipped or blocked.
    pub async fn execute_after(
        &self,
        project_id: &str,
        chunk_id: &str,
        pause: Duration,
    ) -> Result<ExecutionOutcome, PipelineError> {
        let record = self
            .store
            .chunk(project_id, chunk_id)?
            .ok_or_else(|| PipelineError::NotFound(format!("chunk {}/{}", project_id, chunk_id)))?;

        if !record.status.is_runnable() {
            debug!(project = project_id, chunk = chunk_id, "already completed, skipping");
            return Ok(ExecutionOutcome {
                chunk_id: chunk_id.to_string(),
                files_generated: record.files_count,
                tokens_used: record.tokens_used,
                duration_ms: 0,
                skipped: true,
            });
        }

        let unmet = self.unmet_dependencies(project_id, &record)?;
        if !unmet.is_empty() {
            return Err(PipelineError::DependencyNotSatisfied {
                chunk_id: chunk_id.to_string(),
                unmet,
            });
        }

        let manifest = self
            .store
            .manifest(project_id)?
            .ok_or_else(|| PipelineError::NotFound(format!("manifest for {}", project_id)))?;
        let definition = manifest
            .chunk(chunk_id)
            .cloned()
            .unwrap_or_else(|| definition_from_record(&record));
        let design = self
            .store
            .project(project_id)?
            .map(|p| p.design_document)
            .unwrap_or_default();

        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }

        self.store.mark_generating(project_id, chunk_id)?;
        let prompt = chunk_prompt(&manifest, &definition, &design);
        self.events.emit(
            project_id,
            PipelineEvent::ChunkStarted {
                project: project_id.to_string(),
                chunk: chunk_id.to_string(),
                prompt_hash: hash_string(&prompt),
            },
        );
        info!(
            project = project_id,
            chunk = chunk_id,
            service = self.service.name(),
            "generating chunk"
        );

        let started = Instant::now();
        let result = self.generate_files(&prompt).await;
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let (files, tokens_used) = match result {
            Ok(ok) => ok,
            Err(reason) => return self.fail(project_id, chunk_id, reason),
        };

        let generated_at = now_iso8601();
        let completion = Completion {
            files: &files,
            tokens_used,
            generation_time_ms: duration_ms,
            generated_at: &generated_at,
        };
        if let Err(e) = self.store.record_completion(project_id, chunk_id, &completion) {
            return self.fail(project_id, chunk_id, format!("could not persist result: {}", e));
        }

        info!(
            project = project_id,
            chunk = chunk_id,
            files = files.len(),
            tokens = tokens_used,
            duration_ms,
            "chunk completed"
        );
        self.events.emit(
            project_id,
            PipelineEvent::ChunkCompleted {
                project: project_id.to_string(),
                chunk: chunk_id.to_string(),
                files: files.len(),
                tokens: tokens_used,
                duration_ms,
                payload_hash: payload_hash(&files),
            },
        );

        Ok(ExecutionOutcome {
            chunk_id: chunk_id.to_string(),
            files_generated: files.len(),
            tokens_used,
            duration_ms,
            skipped: false,
        })
    }

    /// Dependencies whose records are missing or not completed.
    fn unmet_dependencies(
        &self,
        project_id: &str,
        record: &ChunkRecord,
    ) -> Result<Vec<String>, PipelineError> {
        let mut unmet = Vec::new();
        for dep in &record.dependencies {
            let done = self
                .store
                .chunk(project_id, dep)?
                .is_some_and(|r| r.status == ChunkStatus::Completed);
            if !done {
                unmet.push(dep.clone());
            }
        }
        Ok(unmet)
    }

    async fn generate_files(
        &self,
        prompt: &str,
    ) -> Result<(Vec<GeneratedFile>, Option<u64>), String> {
        let generation = generate_with_timeout(self.service, prompt, self.timeout).await?;
        let files = parse_files(&generation.text)?;
        Ok((files, generation.tokens_used))
    }

    /// Persist the failure, then report it. A store that cannot record the
    /// failure turns this into a persistence error.
    fn fail(
        &self,
        project_id: &str,
        chunk_id: &str,
        reason: String,
    ) -> Result<ExecutionOutcome, PipelineError> {
        warn!(project = project_id, chunk = chunk_id, error = %reason, "chunk failed");
        self.store.record_failure(project_id, chunk_id, &reason)?;
        self.events.emit(
            project_id,
            PipelineEvent::ChunkFailed {
                project: project_id.to_string(),
                chunk: chunk_id.to_string(),
                error: reason.clone(),
            },
        );
        Err(PipelineError::ChunkExecutionFailure {
            chunk_id: chunk_id.to_string(),
            reason,
        })
    }
}

fn definition_from_record(record: &ChunkRecord) -> ChunkDefinition {
    ChunkDefinition {
        chunk_id: record.chunk_id.clone(),
        chunk_type: record.chunk_type.clone(),
        description: record.description.clone(),
        generation_order: record.generation_order,
        dependencies: record.dependencies.clone(),
        files: Vec::new(),
    }
}
