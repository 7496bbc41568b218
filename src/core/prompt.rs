//! CK-005: Prompt assembly for planning and chunk generation.
//!
//! Prompts are plain text. Shared facts (tables, modules) render the same
//! way in both prompts so every chunk sees the schema the planner saw.

use super::types::{ChunkDefinition, FunctionalModule, Manifest, SqlTable};

/// Inputs to the planning prompt.
#[derive(Debug, Clone)]
pub struct PlanningInput<'a> {
    pub project_id: &'a str,
    pub design_document: &'a str,
    pub language: &'a str,
    pub publish_url: &'a str,
    pub mock_record_target: u32,
    pub modules: &'a [FunctionalModule],
    pub tables: &'a [SqlTable],
}

const MANIFEST_SHAPE: &str = r#"{
  "projectName": "string",
  "targetLanguage": "string",
  "publishUrl": "string",
  "chunks": [
    {
      "chunkId": "kebab-case-id",
      "chunkType": "infrastructure | database | backend-module | core | frontend-module | seed-data",
      "description": "what this chunk produces",
      "generationOrder": 1,
      "dependencies": ["chunk ids that must be generated first"],
      "files": [{"path": "relative/path", "type": "entity | controller | service | component | config | sql | doc", "description": "purpose"}]
    }
  ],
  "generationOrder": ["chunk ids in execution order"]
}"#;

const FILES_SHAPE: &str = r#"{
  "files": [
    {"path": "relative/path.ext", "type": "entity | controller | service | component | config | sql | doc", "content": "complete file text", "description": "purpose"}
  ]
}"#;

/// Render extracted tables as one line each.
pub fn render_tables(tables: &[SqlTable]) -> String {
    if tables.is_empty() {
        return "(none extracted)\n".to_string();
    }
    let mut out = String::new();
    for table in tables {
        let cols: Vec<String> = table
            .columns
            .iter()
            .map(|c| {
                let mut col = c.name.clone();
                if !c.data_type.is_empty() {
                    col.push(' ');
                    col.push_str(&c.data_type);
                }
                if c.primary_key {
                    col.push_str(" PK");
                }
                if let Some(r) = &c.references {
                    col.push_str(&format!(" -> {}", r));
                }
                col
            })
            .collect();
        out.push_str(&format!("- {}({})\n", table.name, cols.join(", ")));
    }
    out
}

/// Render extracted modules as a bulleted list.
pub fn render_modules(modules: &[FunctionalModule]) -> String {
    if modules.is_empty() {
        return "(none extracted)\n".to_string();
    }
    let mut out = String::new();
    for m in modules {
        out.push_str(&format!("- {}", m.title));
        if !m.description.is_empty() {
            out.push_str(&format!(": {}", m.description));
        }
        out.push('\n');
        if !m.inputs.is_empty() {
            out.push_str(&format!("  inputs: {}\n", m.inputs.join(", ")));
        }
        if !m.outputs.is_empty() {
            out.push_str(&format!("  outputs: {}\n", m.outputs.join(", ")));
        }
    }
    out
}

/// Prompt asking the service for a chunk manifest.
pub fn planning_prompt(input: &PlanningInput<'_>) -> String {
    let mut p = String::new();
    p.push_str("# Task: plan a chunked code generation manifest\n\n");
    p.push_str(&format!("Project: {}\n", input.project_id));
    p.push_str(&format!("Target language: {}\n", input.language));
    p.push_str(&format!("Publish URL: {}\n", input.publish_url));
    p.push_str(&format!(
        "Mock records per seeded table: {}\n\n",
        input.mock_record_target
    ));

    p.push_str("## Functional modules\n");
    p.push_str(&render_modules(input.modules));
    p.push_str("\n## Database tables\n");
    p.push_str(&render_tables(input.tables));

    p.push_str("\n## Chunk rules\n");
    p.push_str("1. Exactly one infrastructure chunk, generationOrder 1, no dependencies.\n");
    p.push_str("2. One database chunk for the schema, depending on the infrastructure chunk.\n");
    p.push_str("3. One backend-module chunk per functional module, each depending on the database chunk.\n");
    p.push_str("4. One core chunk wiring the application, depending on every backend-module chunk.\n");
    p.push_str("5. Frontend-module chunks depend on the core chunk.\n");
    p.push_str("6. One seed-data chunk depending on the database chunk.\n");
    p.push_str("7. A chunk's generationOrder is greater than that of each of its dependencies.\n");

    p.push_str("\n## Reply format\nReply with JSON only, shaped like:\n");
    p.push_str(MANIFEST_SHAPE);
    p.push_str("\n\n## Design document\n");
    p.push_str(input.design_document);
    p.push('\n');
    p
}

/// Prompt asking the service for one chunk's files.
pub fn chunk_prompt(manifest: &Manifest, chunk: &ChunkDefinition, design_document: &str) -> String {
    let mut p = String::new();
    p.push_str("# Task: generate source files for one chunk\n\n");
    p.push_str(&format!("Project: {}\n", manifest.project_name));
    p.push_str(&format!("Target language: {}\n", manifest.target_language));
    p.push_str(&format!("Publish URL: {}\n\n", manifest.publish_url));

    p.push_str(&format!("Chunk: {}\n", chunk.chunk_id));
    p.push_str(&format!("Type: {}\n", chunk.chunk_type));
    p.push_str(&format!("Description: {}\n", chunk.description));
    if !chunk.dependencies.is_empty() {
        p.push_str(&format!(
            "Builds on (already generated): {}\n",
            chunk.dependencies.join(", ")
        ));
    }
    if !chunk.files.is_empty() {
        p.push_str("Planned files:\n");
        for f in &chunk.files {
            p.push_str(&format!("- {} [{}] {}\n", f.path, f.file_type, f.description));
        }
    }

    p.push_str("\n## Functional modules\n");
    p.push_str(&render_modules(&manifest.modules));
    p.push_str("\n## Database tables\n");
    p.push_str(&render_tables(&manifest.sql_tables));

    p.push_str("\n## Reply format\n");
    p.push_str("Every file must be complete, with no placeholders. Paths are project-relative.\n");
    p.push_str("Reply with JSON only, shaped like:\n");
    p.push_str(FILES_SHAPE);
    p.push_str("\n\n## Design document\n");
    p.push_str(design_document);
    p.push('\n');
    p
}
