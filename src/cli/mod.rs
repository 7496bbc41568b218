//! CK-017: CLI subcommands — init, validate, project, plan, exec, run, status, files, manifest.

use crate::core::config::{self, ChunkforgeConfig, CONFIG_TEMPLATE};
use crate::core::executor::ChunkExecutor;
use crate::core::export;
use crate::core::planner::{ManifestPlanner, PlanRequest};
use crate::core::progress::ProgressReporter;
use crate::core::runner::PipelineRunner;
use crate::core::types::{ChunkStatus, GeneratedFile};
use crate::generation::{self, GenerationService};
use crate::store::{ChunkStore, SqliteStore};
use crate::tripwire::eventlog::EventSink;
use clap::Subcommand;
use std::path::{Path, PathBuf};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new chunkforge workspace
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Validate chunkforge.yaml
    Validate {
        /// Path to chunkforge.yaml
        #[arg(short, long, default_value = "chunkforge.yaml")]
        file: PathBuf,
    },

    /// Manage projects and their design documents
    Project {
        #[command(subcommand)]
        action: ProjectCommands,
    },

    /// Plan a project into chunks (replaces any previous plan)
    Plan {
        /// Path to chunkforge.yaml
        #[arg(short, long, default_value = "chunkforge.yaml")]
        file: PathBuf,

        /// Project id
        #[arg(long)]
        project: String,

        /// Design document to plan from (default: the registered one)
        #[arg(long)]
        design: Option<PathBuf>,

        /// Target language of the generated codebase
        #[arg(long, default_value = "typescript")]
        language: String,

        /// URL the generated application will be published at
        #[arg(long, default_value = "http://localhost:3000")]
        publish_url: String,
    },

    /// Generate a single chunk
    Exec {
        /// Path to chunkforge.yaml
        #[arg(short, long, default_value = "chunkforge.yaml")]
        file: PathBuf,

        /// Project id
        #[arg(long)]
        project: String,

        /// Chunk id
        #[arg(long)]
        chunk: String,
    },

    /// Generate every chunk not yet completed, in order
    Run {
        /// Path to chunkforge.yaml
        #[arg(short, long, default_value = "chunkforge.yaml")]
        file: PathBuf,

        /// Project id
        #[arg(long)]
        project: String,
    },

    /// Show per-chunk progress
    Status {
        /// Path to chunkforge.yaml
        #[arg(short, long, default_value = "chunkforge.yaml")]
        file: PathBuf,

        /// Project id
        #[arg(long)]
        project: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List or export generated files
    Files {
        /// Path to chunkforge.yaml
        #[arg(short, long, default_value = "chunkforge.yaml")]
        file: PathBuf,

        /// Project id
        #[arg(long)]
        project: String,

        /// Write files under this directory
        #[arg(long)]
        out: Option<PathBuf>,

        /// Write files into this zip archive
        #[arg(long)]
        zip: Option<PathBuf>,
    },

    /// Print the persisted manifest as YAML
    Manifest {
        /// Path to chunkforge.yaml
        #[arg(short, long, default_value = "chunkforge.yaml")]
        file: PathBuf,

        /// Project id
        #[arg(long)]
        project: String,

        /// Print the planner reply exactly as it was received
        #[arg(long)]
        raw: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum ProjectCommands {
    /// Register a project (or replace its design document)
    Register {
        /// Path to chunkforge.yaml
        #[arg(short, long, default_value = "chunkforge.yaml")]
        file: PathBuf,

        /// Project id
        #[arg(long)]
        project: String,

        /// Design document (markdown)
        #[arg(long)]
        design: PathBuf,
    },

    /// List registered projects
    List {
        /// Path to chunkforge.yaml
        #[arg(short, long, default_value = "chunkforge.yaml")]
        file: PathBuf,
    },
}

/// Dispatch a CLI command.
pub async fn dispatch(cmd: Commands) -> Result<(), String> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Project { action } => match action {
            ProjectCommands::Register {
                file,
                project,
                design,
            } => cmd_register(&file, &project, &design),
            ProjectCommands::List { file } => cmd_projects(&file),
        },
        Commands::Plan {
            file,
            project,
            design,
            language,
            publish_url,
        } => cmd_plan(&file, &project, design.as_deref(), &language, &publish_url).await,
        Commands::Exec {
            file,
            project,
            chunk,
        } => cmd_exec(&file, &project, &chunk).await,
        Commands::Run { file, project } => cmd_run(&file, &project).await,
        Commands::Status {
            file,
            project,
            json,
        } => cmd_status(&file, &project, json),
        Commands::Files {
            file,
            project,
            out,
            zip,
        } => cmd_files(&file, &project, out.as_deref(), zip.as_deref()),
        Commands::Manifest { file, project, raw } => cmd_manifest(&file, &project, raw),
    }
}

// ============================================================================
// Workspace plumbing
// ============================================================================

/// A validated config plus the store it points at.
struct Workspace {
    config: ChunkforgeConfig,
    state_dir: PathBuf,
    store: SqliteStore,
}

impl Workspace {
    fn open(file: &Path) -> Result<Self, String> {
        let config = parse_and_validate(file)?;
        let state_dir = resolve_state_dir(file, &config);
        let store = SqliteStore::open(&state_dir).map_err(|e| e.to_string())?;
        Ok(Self {
            config,
            state_dir,
            store,
        })
    }

    fn service(&self) -> Result<Box<dyn GenerationService>, String> {
        generation::from_config(&self.config.generation)
    }

    fn events(&self) -> EventSink {
        if self.config.pipeline.events {
            EventSink::new(&self.state_dir)
        } else {
            EventSink::disabled()
        }
    }

    fn executor<'a>(&'a self, service: &'a dyn GenerationService) -> ChunkExecutor<'a> {
        ChunkExecutor::new(&self.store, service)
            .with_events(self.events())
            .with_timeout(self.config.pipeline.timeout())
    }
}

/// A relative `state_dir` is taken relative to the config file.
fn resolve_state_dir(file: &Path, config: &ChunkforgeConfig) -> PathBuf {
    if config.state_dir.is_absolute() {
        return config.state_dir.clone();
    }
    match file.parent() {
        Some(parent) => parent.join(&config.state_dir),
        None => config.state_dir.clone(),
    }
}

fn parse_and_validate(file: &Path) -> Result<ChunkforgeConfig, String> {
    let config = config::parse_config_file(file)?;
    let errors = config::validate_config(&config);
    if errors.is_empty() {
        return Ok(config);
    }
    for e in &errors {
        eprintln!("  ERROR: {}", e);
    }
    Err("validation failed".to_string())
}

fn read_design(path: &Path) -> Result<String, String> {
    std::fs::read_to_string(path).map_err(|e| format!("cannot read {}: {}", path.display(), e))
}

// ============================================================================
// Commands
// ============================================================================

fn cmd_init(path: &Path) -> Result<(), String> {
    let config_path = path.join("chunkforge.yaml");
    if config_path.exists() {
        return Err(format!("{} already exists", config_path.display()));
    }

    let state_dir = path.join("state");
    std::fs::create_dir_all(&state_dir).map_err(|e| format!("cannot create state dir: {}", e))?;

    std::fs::write(&config_path, CONFIG_TEMPLATE)
        .map_err(|e| format!("cannot write {}: {}", config_path.display(), e))?;

    println!("Initialized chunkforge workspace at {}", path.display());
    println!("  Created: {}", config_path.display());
    println!("  Created: {}/", state_dir.display());
    Ok(())
}

fn cmd_validate(file: &Path) -> Result<(), String> {
    let config = config::parse_config_file(file)?;
    let errors = config::validate_config(&config);

    if errors.is_empty() {
        println!(
            "OK: {} (provider {:?}, timeout {}s)",
            file.display(),
            config.generation.provider,
            config.pipeline.timeout_secs
        );
        Ok(())
    } else {
        for e in &errors {
            eprintln!("  ERROR: {}", e);
        }
        Err(format!("{} validation error(s)", errors.len()))
    }
}

fn cmd_register(file: &Path, project: &str, design: &Path) -> Result<(), String> {
    let ws = Workspace::open(file)?;
    let document = read_design(design)?;
    if document.trim().is_empty() {
        return Err(format!("{} is empty", design.display()));
    }
    ws.store
        .register_project(project, &document)
        .map_err(|e| e.to_string())?;
    println!(
        "Registered {} ({} bytes of design)",
        project,
        document.len()
    );
    Ok(())
}

fn cmd_projects(file: &Path) -> Result<(), String> {
    let ws = Workspace::open(file)?;
    let projects = ws.store.list_projects().map_err(|e| e.to_string())?;
    if projects.is_empty() {
        println!("No projects. Run `chunkforge project register` first.");
        return Ok(());
    }
    for p in &projects {
        println!(
            "{}: {} ({}/{} chunks) updated {}",
            p.project_id, p.status, p.completed_chunks, p.total_chunks, p.updated_at
        );
    }
    Ok(())
}

async fn cmd_plan(
    file: &Path,
    project: &str,
    design: Option<&Path>,
    language: &str,
    publish_url: &str,
) -> Result<(), String> {
    let ws = Workspace::open(file)?;
    let service = ws.service()?;
    let document = design.map(read_design).transpose()?;

    let planner = ManifestPlanner::new(&ws.store, service.as_ref())
        .with_events(ws.events())
        .with_timeout(ws.config.pipeline.timeout());
    let request = PlanRequest {
        project_id: project,
        design_document: document.as_deref(),
        language,
        publish_url,
        mock_record_target: ws.config.pipeline.mock_record_target,
    };
    let manifest = planner.plan(&request).await.map_err(|e| e.to_string())?;

    println!(
        "Planned {} via {}: {} chunks",
        project,
        service.name(),
        manifest.chunks.len()
    );
    for chunk in &manifest.chunks {
        let deps = if chunk.dependencies.is_empty() {
            String::new()
        } else {
            format!(" <- {}", chunk.dependencies.join(", "))
        };
        println!(
            "  [{}] {} ({}, {} files){}",
            chunk.generation_order,
            chunk.chunk_id,
            chunk.chunk_type,
            chunk.files.len(),
            deps
        );
    }
    Ok(())
}

async fn cmd_exec(file: &Path, project: &str, chunk: &str) -> Result<(), String> {
    let ws = Workspace::open(file)?;
    let service = ws.service()?;
    let executor = ws.executor(service.as_ref());

    let outcome = executor
        .execute(project, chunk)
        .await
        .map_err(|e| e.to_string())?;
    if outcome.skipped {
        println!("{}: already completed", outcome.chunk_id);
    } else {
        let tokens = outcome
            .tokens_used
            .map(|t| format!(", {} tokens", t))
            .unwrap_or_default();
        println!(
            "{}: {} files ({:.2}s{})",
            outcome.chunk_id,
            outcome.files_generated,
            outcome.duration_ms as f64 / 1000.0,
            tokens
        );
    }
    Ok(())
}

async fn cmd_run(file: &Path, project: &str) -> Result<(), String> {
    let ws = Workspace::open(file)?;
    let service = ws.service()?;
    let runner =
        PipelineRunner::new(ws.executor(service.as_ref())).with_pacing(ws.config.pipeline.pacing());

    let report = runner.run_all(project).await.map_err(|e| e.to_string())?;

    println!(
        "Run {} for {}: {}",
        report.run_id, report.project_id, report.status
    );
    println!(
        "  {} completed ({} already done), {} failed, {} total, {} generation calls",
        report.completed, report.skipped, report.failed, report.total_chunks, report.calls
    );
    for e in &report.per_chunk_errors {
        println!("  FAILED: {} ({})", e.chunk_id, e.error);
    }

    if report.failed > 0 {
        return Err(format!(
            "{} chunk(s) failed; re-run to retry",
            report.failed
        ));
    }
    Ok(())
}

fn cmd_status(file: &Path, project: &str, json: bool) -> Result<(), String> {
    let ws = Workspace::open(file)?;
    let progress = ProgressReporter::new(&ws.store)
        .status(project)
        .map_err(|e| e.to_string())?;

    if json {
        let out = serde_json::to_string_pretty(&progress)
            .map_err(|e| format!("JSON serialization error: {}", e))?;
        println!("{}", out);
        return Ok(());
    }

    println!(
        "Project: {} ({})",
        progress.project_id, progress.overall_status
    );
    println!(
        "  Chunks: {}/{} completed",
        progress.completed_chunks, progress.total_chunks
    );
    println!(
        "  Tokens: {}  Time: {:.2}s",
        progress.total_tokens,
        progress.total_time_ms as f64 / 1000.0
    );
    for chunk in &progress.chunks {
        let detail = match chunk.status {
            ChunkStatus::Completed => format!(" ({} files)", chunk.files_count),
            ChunkStatus::Failed => chunk
                .error_message
                .as_deref()
                .map(|e| format!(" ({})", e))
                .unwrap_or_default(),
            _ => String::new(),
        };
        println!(
            "    [{}] {}: {} [{}]{}",
            chunk.generation_order, chunk.chunk_id, chunk.status, chunk.chunk_type, detail
        );
    }
    if let Some(err) = &progress.last_error {
        println!("  Last error: {}", err);
    }
    Ok(())
}

fn cmd_files(
    file: &Path,
    project: &str,
    out: Option<&Path>,
    zip: Option<&Path>,
) -> Result<(), String> {
    let ws = Workspace::open(file)?;
    let entries = ProgressReporter::new(&ws.store)
        .list_files(project)
        .map_err(|e| e.to_string())?;

    if out.is_none() && zip.is_none() {
        for e in &entries {
            println!(
                "{}  {} [{}] {}",
                e.chunk_id, e.file.path, e.file.file_type, e.content_hash
            );
        }
        println!("{} file(s)", entries.len());
        return Ok(());
    }

    let files: Vec<GeneratedFile> = entries.into_iter().map(|e| e.file).collect();
    if let Some(dir) = out {
        let written = export::export_files(&files, dir)?;
        println!("Wrote {} file(s) under {}", written.len(), dir.display());
    }
    if let Some(path) = zip {
        let count = export::export_zip(&files, path)?;
        println!("Wrote {} file(s) to {}", count, path.display());
    }
    Ok(())
}

fn cmd_manifest(file: &Path, project: &str, raw: bool) -> Result<(), String> {
    let ws = Workspace::open(file)?;
    if raw {
        let reply = ws
            .store
            .plan_reply(project)
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("no plan for {}; run `chunkforge plan` first", project))?;
        println!("{}", reply);
        return Ok(());
    }
    let manifest = ws
        .store
        .manifest(project)
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("no manifest for {}; run `chunkforge plan` first", project))?;
    let yaml = serde_yaml_ng::to_string(&manifest)
        .map_err(|e| format!("YAML serialization error: {}", e))?;
    print!("{}", yaml);
    Ok(())
}
