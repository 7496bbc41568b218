//! Shared fixtures for pipeline tests.

use super::types::{ChunkDefinition, ChunkRecord, ChunkType, Manifest};
use crate::store::{ChunkStore, SqliteStore};
use serde_json::json;

pub const DESIGN: &str = r#"# Campus Hub

## Module: Auth
Sign-in for students and employers.
Inputs: email, password
Outputs: session

## Module: Job Board
Employers post openings.

## Schema
CREATE TABLE users (
  id SERIAL PRIMARY KEY,
  email VARCHAR(255) NOT NULL
);
"#;

/// (chunk id, chunk type, generation order, dependencies)
pub type ChunkShape<'a> = (&'a str, &'a str, i64, &'a [&'a str]);

pub const THREE: &[ChunkShape<'static>] = &[
    ("infra", "infrastructure", 1, &[]),
    ("schema", "database", 2, &["infra"]),
    ("auth", "backend-module", 3, &["schema"]),
];

pub fn definitions(shapes: &[ChunkShape<'_>]) -> Vec<ChunkDefinition> {
    shapes
        .iter()
        .map(|(id, ty, order, deps)| ChunkDefinition {
            chunk_id: id.to_string(),
            chunk_type: ChunkType::from(ty.to_string()),
            description: format!("{id} chunk"),
            generation_order: *order,
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            files: vec![],
        })
        .collect()
}

pub fn manifest(shapes: &[ChunkShape<'_>]) -> Manifest {
    let chunks = definitions(shapes);
    Manifest {
        project_name: "campus".to_string(),
        target_language: "typescript".to_string(),
        publish_url: "https://campus.example".to_string(),
        generation_order: chunks.iter().map(|c| c.chunk_id.clone()).collect(),
        chunks,
        sql_tables: vec![],
        modules: vec![],
    }
}

/// A planner reply: manifest JSON wrapped in prose and a fence.
pub fn manifest_reply(shapes: &[ChunkShape<'_>]) -> String {
    let chunks: Vec<_> = shapes
        .iter()
        .map(|(id, ty, order, deps)| {
            json!({
                "chunkId": id,
                "chunkType": ty,
                "description": format!("{id} chunk"),
                "generationOrder": order,
                "dependencies": deps,
                "files": [{"path": format!("src/{id}/index.ts"), "type": "service", "priority": 1}]
            })
        })
        .collect();
    let body = json!({
        "projectName": "campus",
        "targetLanguage": "typescript",
        "publishUrl": "https://campus.example",
        "chunks": chunks,
    });
    format!("Here is the plan:\n```json\n{body}\n```\nGood luck!")
}

/// A chunk reply with one file per path.
pub fn files_reply(paths: &[&str]) -> String {
    let files: Vec<_> = paths
        .iter()
        .map(|p| json!({"path": p, "type": "service", "content": format!("// {p}\n"), "description": "generated"}))
        .collect();
    format!("```json\n{}\n```", json!({ "files": files }))
}

/// Needle matching the chunk prompt for `chunk_id`.
pub fn chunk_needle(chunk_id: &str) -> String {
    format!("Chunk: {chunk_id}\n")
}

/// A store with `shapes` already planned for project `campus`.
pub fn planned_store(shapes: &[ChunkShape<'_>]) -> SqliteStore {
    let store = SqliteStore::open_in_memory().unwrap();
    let m = manifest(shapes);
    let records: Vec<_> = m
        .chunks
        .iter()
        .enumerate()
        .map(|(i, d)| ChunkRecord::pending("campus", i as i64, d))
        .collect();
    let reply = serde_json::to_string(&m).unwrap();
    store
        .replace_plan("campus", DESIGN, &reply, &m, &records)
        .unwrap();
    store
}
