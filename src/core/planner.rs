//! CK-006: Manifest planning — design document in, persisted chunk plan out.
//!
//! A failed plan never touches the previous manifest or its records; it only
//! marks the project `failed` with the cause.

use super::error::PipelineError;
use super::extract::{extract_modules, extract_tables};
use super::prompt::{planning_prompt, PlanningInput};
use super::resolver::{generation_sequence, order_inversions, validate_manifest};
use super::sanitize::sanitize;
use super::types::{ChunkRecord, Manifest, PipelineEvent, ProjectStatus};
use crate::generation::{generate_with_timeout, GenerationService};
use crate::store::ChunkStore;
use crate::tripwire::eventlog::EventSink;
use crate::tripwire::hasher::hash_string;
use std::time::Duration;
use tracing::{info, warn};

/// Parameters for one planning call.
#[derive(Debug, Clone)]
pub struct PlanRequest<'a> {
    pub project_id: &'a str,

    /// Overrides (and replaces) the stored document when given
    pub design_document: Option<&'a str>,

    pub language: &'a str,
    pub publish_url: &'a str,
    pub mock_record_target: u32,
}

pub struct ManifestPlanner<'a> {
    store: &'a dyn ChunkStore,
    service: &'a dyn GenerationService,
    events: EventSink,
    timeout: Duration,
}

impl<'a> ManifestPlanner<'a> {
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

    /// Plan a project and atomically replace its chunk records.
    pub async fn plan(&self, req: &PlanRequest<'_>) -> Result<Manifest, PipelineError> {
        let project_id = req.project_id;
        let existing = self.store.project(project_id)?;

        let design = match (req.design_document, &existing) {
            (Some(doc), Some(_)) => doc.to_string(),
            (Some(doc), None) => {
                self.store.register_project(project_id, doc)?;
                doc.to_string()
            }
            (None, Some(p)) => p.design_document.clone(),
            (None, None) => {
                return Err(PipelineError::NotFound(format!("project {}", project_id)))
            }
        };

        let (manifest, reply) = match self.draft_manifest(req, &design).await {
            Ok(drafted) => drafted,
            Err(reason) => {
                warn!(project = project_id, error = %reason, "planning failed");
                self.store
                    .set_project_status(project_id, ProjectStatus::Failed, Some(&reason))?;
                self.events.emit(
                    project_id,
                    PipelineEvent::PlanFailed {
                        project: project_id.to_string(),
                        error: reason.clone(),
                    },
                );
                return Err(PipelineError::PlanningFailure(reason));
            }
        };

        let records: Vec<ChunkRecord> = manifest
            .chunks
            .iter()
            .enumerate()
            .map(|(seq, def)| ChunkRecord::pending(project_id, seq as i64, def))
            .collect();
        self.store
            .replace_plan(project_id, &design, &reply, &manifest, &records)?;

        let manifest_hash = hash_string(&serde_json::to_string(&manifest).unwrap_or_default());
        info!(
            project = project_id,
            chunks = records.len(),
            hash = %manifest_hash,
            "manifest planned"
        );
        self.events.emit(
            project_id,
            PipelineEvent::PlanCreated {
                project: project_id.to_string(),
                chunks: records.len(),
                manifest_hash,
            },
        );
        Ok(manifest)
    }

    /// Extract facts, ask the service, parse and validate. Nothing persisted.
    /// Returns the completed manifest and the reply text it came from.
    async fn draft_manifest(
        &self,
        req: &PlanRequest<'_>,
        design: &str,
    ) -> Result<(Manifest, String), String> {
        if design.trim().is_empty() {
            return Err("design document is empty".to_string());
        }

        let modules = extract_modules(design);
        let tables = extract_tables(design);
        info!(
            project = req.project_id,
            modules = modules.len(),
            tables = tables.len(),
            "extracted design facts"
        );

        let prompt = planning_prompt(&PlanningInput {
            project_id: req.project_id,
            design_document: design,
            language: req.language,
            publish_url: req.publish_url,
            mock_record_target: req.mock_record_target,
            modules: &modules,
            tables: &tables,
        });

        let generation = generate_with_timeout(self.service, &prompt, self.timeout).await?;
        let mut manifest = parse_manifest(&generation.text)?;

        if manifest.project_name.trim().is_empty() {
            manifest.project_name = req.project_id.to_string();
        }
        if manifest.target_language.trim().is_empty() {
            manifest.target_language = req.language.to_string();
        }
        if manifest.publish_url.trim().is_empty() {
            manifest.publish_url = req.publish_url.to_string();
        }
        if manifest.generation_order.is_empty() {
            manifest.generation_order = generation_sequence(&manifest.chunks);
        }
        if manifest.sql_tables.is_empty() {
            manifest.sql_tables = tables;
        }
        if manifest.modules.is_empty() {
            manifest.modules = modules;
        }

        let errors = validate_manifest(&manifest);
        if !errors.is_empty() {
            return Err(format!("invalid manifest: {}", errors.join("; ")));
        }

        for (chunk, dep) in order_inversions(&manifest.chunks) {
            warn!(
                project = req.project_id,
                chunk = %chunk,
                dependency = %dep,
                "chunk is not ordered after its dependency"
            );
        }

        Ok((manifest, generation.text))
    }
}

/// Sanitize a planner reply and decode it as a manifest.
pub fn parse_manifest(reply: &str) -> Result<Manifest, String> {
    serde_json::from_str(&sanitize(reply)).map_err(|e| format!("manifest parse error: {}", e))
}
