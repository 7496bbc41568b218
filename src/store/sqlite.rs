//! CK-013: SQLite store.

use super::{ChunkStore, Completion, StoreError};
use crate::core::types::{
    ChunkRecord, ChunkStatus, ChunkType, Manifest, ProjectRow, ProjectStatus,
};
use crate::tripwire::eventlog::now_iso8601;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use std::path::{Path, PathBuf};

const DB_FILE: &str = "chunkforge.db";

const CHUNK_COLUMNS: &str = "project_id, chunk_id, seq, chunk_type, description, generation_order, \
     dependencies_json, status, files_json, files_count, tokens_used, generation_time_ms, \
     error_message, generated_at";

const PROJECT_COLUMNS: &str =
    "project_id, design_document, status, total_chunks, completed_chunks, last_error, updated_at";

#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) `<state_dir>/chunkforge.db` and migrate.
    pub fn open(state_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let state_dir = state_dir.as_ref();
        std::fs::create_dir_all(state_dir)?;
        let conn = Connection::open(db_path(state_dir))?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;

            CREATE TABLE IF NOT EXISTS projects (
              project_id TEXT PRIMARY KEY,
              design_document TEXT NOT NULL,
              status TEXT NOT NULL,
              total_chunks INTEGER NOT NULL DEFAULT 0,
              completed_chunks INTEGER NOT NULL DEFAULT 0,
              last_error TEXT,
              manifest_json TEXT,
              plan_reply TEXT,
              updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS chunks (
              project_id TEXT NOT NULL,
              chunk_id TEXT NOT NULL,
              seq INTEGER NOT NULL,
              chunk_type TEXT NOT NULL,
              description TEXT NOT NULL,
              generation_order INTEGER NOT NULL,
              dependencies_json TEXT NOT NULL,
              status TEXT NOT NULL,
              files_json TEXT,
              files_count INTEGER NOT NULL DEFAULT 0,
              tokens_used INTEGER,
              generation_time_ms INTEGER,
              error_message TEXT,
              generated_at TEXT,
              PRIMARY KEY (project_id, chunk_id)
            );

            CREATE INDEX IF NOT EXISTS chunks_by_order
              ON chunks(project_id, generation_order, seq);
            "#,
        )?;
        Ok(())
    }
}

/// Database path within a state directory.
pub fn db_path(state_dir: &Path) -> PathBuf {
    state_dir.join(DB_FILE)
}

fn to_sql_int(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

fn from_sql_int(v: i64) -> u64 {
    u64::try_from(v).unwrap_or(0)
}

fn conversion_error(idx: usize, err: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

#[derive(Debug)]
struct ParseError(String);

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ParseError {}

fn project_from_row(row: &Row<'_>) -> rusqlite::Result<ProjectRow> {
    let status: String = row.get(2)?;
    Ok(ProjectRow {
        project_id: row.get(0)?,
        design_document: row.get(1)?,
        status: status
            .parse::<ProjectStatus>()
            .map_err(|e| conversion_error(2, ParseError(e)))?,
        total_chunks: usize::try_from(row.get::<_, i64>(3)?).unwrap_or(0),
        completed_chunks: usize::try_from(row.get::<_, i64>(4)?).unwrap_or(0),
        last_error: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn chunk_from_row(row: &Row<'_>) -> rusqlite::Result<ChunkRecord> {
    let deps_json: String = row.get(6)?;
    let status: String = row.get(7)?;
    let files_json: Option<String> = row.get(8)?;
    let chunk_type: String = row.get(3)?;

    let files_payload = match files_json {
        Some(json) => serde_json::from_str(&json).map_err(|e| conversion_error(8, e))?,
        None => Vec::new(),
    };

    Ok(ChunkRecord {
        project_id: row.get(0)?,
        chunk_id: row.get(1)?,
        seq: row.get(2)?,
        chunk_type: ChunkType::from(chunk_type),
        description: row.get(4)?,
        generation_order: row.get(5)?,
        dependencies: serde_json::from_str(&deps_json).map_err(|e| conversion_error(6, e))?,
        status: status
            .parse::<ChunkStatus>()
            .map_err(|e| conversion_error(7, ParseError(e)))?,
        files_payload,
        files_count: usize::try_from(row.get::<_, i64>(9)?).unwrap_or(0),
        tokens_used: row.get::<_, Option<i64>>(10)?.map(from_sql_int),
        generation_time_ms: row.get::<_, Option<i64>>(11)?.map(from_sql_int),
        error_message: row.get(12)?,
        generated_at: row.get(13)?,
    })
}

/// Recompute the project's aggregate counters from its chunk rows.
fn refresh_counters(tx: &Transaction<'_>, project_id: &str) -> Result<(), StoreError> {
    tx.execute(
        "UPDATE projects SET
           total_chunks = (SELECT COUNT(*) FROM chunks WHERE project_id = ?1),
           completed_chunks = (SELECT COUNT(*) FROM chunks WHERE project_id = ?1 AND status = 'completed'),
           updated_at = ?2
         WHERE project_id = ?1",
        params![project_id, now_iso8601()],
    )?;
    Ok(())
}

fn ensure_updated(rows: usize, what: impl FnOnce() -> String) -> Result<(), StoreError> {
    if rows == 0 {
        return Err(StoreError::NotFound(what()));
    }
    Ok(())
}

impl ChunkStore for SqliteStore {
    fn register_project(&self, project_id: &str, design_document: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO projects (project_id, design_document, status, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(project_id) DO UPDATE SET
               design_document = excluded.design_document,
               updated_at = excluded.updated_at",
            params![
                project_id,
                design_document,
                ProjectStatus::Draft.to_string(),
                now_iso8601()
            ],
        )?;
        Ok(())
    }

    fn project(&self, project_id: &str) -> Result<Option<ProjectRow>, StoreError> {
        let sql = format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE project_id = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![project_id], project_from_row)
            .optional()?)
    }

    fn list_projects(&self) -> Result<Vec<ProjectRow>, StoreError> {
        let sql = format!("SELECT {PROJECT_COLUMNS} FROM projects ORDER BY project_id");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], project_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn set_project_status(
        &self,
        project_id: &str,
        status: ProjectStatus,
        last_error: Option<&str>,
    ) -> Result<(), StoreError> {
        let rows = self.conn.execute(
            "UPDATE projects SET status = ?2, last_error = ?3, updated_at = ?4 WHERE project_id = ?1",
            params![project_id, status.to_string(), last_error, now_iso8601()],
        )?;
        ensure_updated(rows, || format!("project {project_id}"))
    }

    fn manifest(&self, project_id: &str) -> Result<Option<Manifest>, StoreError> {
        let json: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT manifest_json FROM projects WHERE project_id = ?1",
                params![project_id],
                |row| row.get(0),
            )
            .optional()?;
        match json.flatten() {
            Some(j) => Ok(Some(serde_json::from_str(&j)?)),
            None => Ok(None),
        }
    }

    fn plan_reply(&self, project_id: &str) -> Result<Option<String>, StoreError> {
        let reply: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT plan_reply FROM projects WHERE project_id = ?1",
                params![project_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(reply.flatten())
    }

    fn replace_plan(
        &self,
        project_id: &str,
        design_document: &str,
        plan_reply: &str,
        manifest: &Manifest,
        records: &[ChunkRecord],
    ) -> Result<(), StoreError> {
        let manifest_json = serde_json::to_string(manifest)?;
        let now = now_iso8601();
        let tx = self.conn.unchecked_transaction()?;

        tx.execute(
            "INSERT INTO projects (project_id, design_document, status, manifest_json, plan_reply, last_error, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6)
             ON CONFLICT(project_id) DO UPDATE SET
               design_document = excluded.design_document,
               status = excluded.status,
               manifest_json = excluded.manifest_json,
               plan_reply = excluded.plan_reply,
               last_error = NULL,
               updated_at = excluded.updated_at",
            params![
                project_id,
                design_document,
                ProjectStatus::Planned.to_string(),
                manifest_json,
                plan_reply,
                now
            ],
        )?;
        tx.execute("DELETE FROM chunks WHERE project_id = ?1", params![project_id])?;

        {
            let sql = format!(
                "INSERT INTO chunks ({CHUNK_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL, 0, NULL, NULL, NULL, NULL)"
            );
            let mut stmt = tx.prepare(&sql)?;
            for rec in records {
                stmt.execute(params![
                    project_id,
                    rec.chunk_id,
                    rec.seq,
                    rec.chunk_type.to_string(),
                    rec.description,
                    rec.generation_order,
                    serde_json::to_string(&rec.dependencies)?,
                    ChunkStatus::Pending.to_string(),
                ])?;
            }
        }

        refresh_counters(&tx, project_id)?;
        tx.commit()?;
        Ok(())
    }

    fn chunk(&self, project_id: &str, chunk_id: &str) -> Result<Option<ChunkRecord>, StoreError> {
        let sql = format!("SELECT {CHUNK_COLUMNS} FROM chunks WHERE project_id = ?1 AND chunk_id = ?2");
        Ok(self
            .conn
            .query_row(&sql, params![project_id, chunk_id], chunk_from_row)
            .optional()?)
    }

    fn chunks(&self, project_id: &str) -> Result<Vec<ChunkRecord>, StoreError> {
        let sql = format!(
            "SELECT {CHUNK_COLUMNS} FROM chunks WHERE project_id = ?1 ORDER BY generation_order, seq"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![project_id], chunk_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn mark_generating(&self, project_id: &str, chunk_id: &str) -> Result<(), StoreError> {
        let tx = self.conn.unchecked_transaction()?;
        let rows = tx.execute(
            "UPDATE chunks SET status = ?3 WHERE project_id = ?1 AND chunk_id = ?2 AND status != 'completed'",
            params![project_id, chunk_id, ChunkStatus::Generating.to_string()],
        )?;
        ensure_updated(rows, || format!("runnable chunk {project_id}/{chunk_id}"))?;
        refresh_counters(&tx, project_id)?;
        tx.commit()?;
        Ok(())
    }

    fn record_completion(
        &self,
        project_id: &str,
        chunk_id: &str,
        completion: &Completion<'_>,
    ) -> Result<(), StoreError> {
        let files_json = serde_json::to_string(completion.files)?;
        let tx = self.conn.unchecked_transaction()?;
        let rows = tx.execute(
            "UPDATE chunks SET
               status = ?3, files_json = ?4, files_count = ?5, tokens_used = ?6,
               generation_time_ms = ?7, error_message = NULL, generated_at = ?8
             WHERE project_id = ?1 AND chunk_id = ?2",
            params![
                project_id,
                chunk_id,
                ChunkStatus::Completed.to_string(),
                files_json,
                i64::try_from(completion.files.len()).unwrap_or(i64::MAX),
                completion.tokens_used.map(to_sql_int),
                to_sql_int(completion.generation_time_ms),
                completion.generated_at,
            ],
        )?;
        ensure_updated(rows, || format!("chunk {project_id}/{chunk_id}"))?;
        refresh_counters(&tx, project_id)?;
        tx.commit()?;
        Ok(())
    }

    fn record_failure(
        &self,
        project_id: &str,
        chunk_id: &str,
        error: &str,
    ) -> Result<(), StoreError> {
        let tx = self.conn.unchecked_transaction()?;
        let rows = tx.execute(
            "UPDATE chunks SET status = ?3, error_message = ?4
             WHERE project_id = ?1 AND chunk_id = ?2 AND status != 'completed'",
            params![project_id, chunk_id, ChunkStatus::Failed.to_string(), error],
        )?;
        ensure_updated(rows, || format!("runnable chunk {project_id}/{chunk_id}"))?;
        refresh_counters(&tx, project_id)?;
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ChunkDefinition, GeneratedFile};

    fn def(id: &str, order: i64, deps: &[&str]) -> ChunkDefinition {
        ChunkDefinition {
            chunk_id: id.to_string(),
            chunk_type: ChunkType::BackendModule,
            description: format!("{id} chunk"),
            generation_order: order,
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            files: vec![],
        }
    }

    fn manifest(defs: Vec<ChunkDefinition>) -> Manifest {
        Manifest {
            project_name: "demo".to_string(),
            target_language: "typescript".to_string(),
            publish_url: "https://placeholder.invalid".to_string(),
            generation_order: defs.iter().map(|d| d.chunk_id.clone()).collect(),
            chunks: defs,
            sql_tables: vec![],
            modules: vec![],
        }
    }

    fn plan(store: &SqliteStore, project: &str, defs: Vec<ChunkDefinition>) {
        let m = manifest(defs);
        let records: Vec<_> = m
            .chunks
            .iter()
            .enumerate()
            .map(|(i, d)| ChunkRecord::pending(project, i as i64, d))
            .collect();
        store.replace_plan(project, "design", "{}", &m, &records).unwrap();
    }

    fn file(path: &str) -> GeneratedFile {
        GeneratedFile {
            path: path.to_string(),
            file_type: "service".to_string(),
            content: "export {}".to_string(),
            description: String::new(),
        }
    }

    #[test]
    fn test_ck013_open_creates_db() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("state")).unwrap();
        store.register_project("p1", "doc").unwrap();
        assert!(db_path(&dir.path().join("state")).exists());
    }

    #[test]
    fn test_ck013_register_and_reregister() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.register_project("p1", "first").unwrap();
        store.register_project("p1", "second").unwrap();
        let p = store.project("p1").unwrap().unwrap();
        assert_eq!(p.design_document, "second");
        assert_eq!(p.status, ProjectStatus::Draft);
        assert_eq!(store.list_projects().unwrap().len(), 1);
        assert!(store.project("ghost").unwrap().is_none());
    }

    #[test]
    fn test_ck013_replace_plan_orders_records() {
        let store = SqliteStore::open_in_memory().unwrap();
        plan(
            &store,
            "p1",
            vec![def("seed", 9, &[]), def("ui-b", 5, &[]), def("ui-a", 5, &[]), def("infra", 1, &[])],
        );
        let ids: Vec<_> = store
            .chunks("p1")
            .unwrap()
            .into_iter()
            .map(|c| c.chunk_id)
            .collect();
        assert_eq!(ids, vec!["infra", "ui-b", "ui-a", "seed"]);

        let p = store.project("p1").unwrap().unwrap();
        assert_eq!(p.status, ProjectStatus::Planned);
        assert_eq!(p.total_chunks, 4);
        assert_eq!(p.completed_chunks, 0);
        assert_eq!(store.manifest("p1").unwrap().unwrap().chunks.len(), 4);
    }

    #[test]
    fn test_ck013_replan_removes_old_records() {
        let store = SqliteStore::open_in_memory().unwrap();
        plan(&store, "p1", vec![def("old-a", 1, &[]), def("old-b", 2, &["old-a"])]);
        plan(&store, "p1", vec![def("new", 1, &[])]);
        assert!(store.chunk("p1", "old-a").unwrap().is_none());
        assert!(store.chunk("p1", "old-b").unwrap().is_none());
        assert_eq!(store.chunks("p1").unwrap().len(), 1);
        assert_eq!(store.project("p1").unwrap().unwrap().total_chunks, 1);
    }

    #[test]
    fn test_ck013_plan_reply_follows_plan() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.register_project("p1", "doc").unwrap();
        assert!(store.plan_reply("p1").unwrap().is_none());
        assert!(store.plan_reply("ghost").unwrap().is_none());

        plan(&store, "p1", vec![def("a", 1, &[])]);
        assert_eq!(store.plan_reply("p1").unwrap().as_deref(), Some("{}"));
    }

    #[test]
    fn test_ck013_completion_updates_counters() {
        let store = SqliteStore::open_in_memory().unwrap();
        plan(&store, "p1", vec![def("a", 1, &[]), def("b", 2, &[])]);
        store.mark_generating("p1", "a").unwrap();
        assert_eq!(
            store.chunk("p1", "a").unwrap().unwrap().status,
            ChunkStatus::Generating
        );

        let files = vec![file("src/a.ts"), file("src/b.ts")];
        store
            .record_completion(
                "p1",
                "a",
                &Completion {
                    files: &files,
                    tokens_used: Some(1200),
                    generation_time_ms: 3400,
                    generated_at: "2026-10-19T10:00:00Z",
                },
            )
            .unwrap();

        let rec = store.chunk("p1", "a").unwrap().unwrap();
        assert_eq!(rec.status, ChunkStatus::Completed);
        assert_eq!(rec.files_count, 2);
        assert_eq!(rec.files_payload, files);
        assert_eq!(rec.tokens_used, Some(1200));
        assert_eq!(rec.generation_time_ms, Some(3400));
        assert!(rec.error_message.is_none());
        assert_eq!(store.project("p1").unwrap().unwrap().completed_chunks, 1);
    }

    #[test]
    fn test_ck013_failure_keeps_other_fields() {
        let store = SqliteStore::open_in_memory().unwrap();
        plan(&store, "p1", vec![def("a", 1, &[])]);
        store.mark_generating("p1", "a").unwrap();
        store.record_failure("p1", "a", "timeout").unwrap();
        let rec = store.chunk("p1", "a").unwrap().unwrap();
        assert_eq!(rec.status, ChunkStatus::Failed);
        assert_eq!(rec.error_message.as_deref(), Some("timeout"));
        assert!(rec.files_payload.is_empty());
        assert!(rec.generated_at.is_none());
        assert_eq!(store.project("p1").unwrap().unwrap().completed_chunks, 0);
    }

    #[test]
    fn test_ck013_completed_chunk_cannot_regress() {
        let store = SqliteStore::open_in_memory().unwrap();
        plan(&store, "p1", vec![def("a", 1, &[])]);
        let files = vec![file("x.ts")];
        store
            .record_completion(
                "p1",
                "a",
                &Completion {
                    files: &files,
                    tokens_used: None,
                    generation_time_ms: 1,
                    generated_at: "2026-10-19T10:00:00Z",
                },
            )
            .unwrap();
        assert!(matches!(
            store.mark_generating("p1", "a"),
            Err(StoreError::NotFound(_))
        ));
        assert!(store.record_failure("p1", "a", "late").is_err());
        assert_eq!(
            store.chunk("p1", "a").unwrap().unwrap().status,
            ChunkStatus::Completed
        );
    }

    #[test]
    fn test_ck013_unknown_chunk_and_project() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.mark_generating("p1", "nope").is_err());
        assert!(matches!(
            store.set_project_status("ghost", ProjectStatus::Running, None),
            Err(StoreError::NotFound(_))
        ));
        assert!(store.manifest("ghost").unwrap().is_none());
    }

    #[test]
    fn test_ck013_set_project_status() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.register_project("p1", "doc").unwrap();
        store
            .set_project_status("p1", ProjectStatus::Failed, Some("quota"))
            .unwrap();
        let p = store.project("p1").unwrap().unwrap();
        assert_eq!(p.status, ProjectStatus::Failed);
        assert_eq!(p.last_error.as_deref(), Some("quota"));
        assert!(store.manifest("p1").unwrap().is_none());
    }

    #[test]
    fn test_ck013_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = SqliteStore::open(dir.path()).unwrap();
            plan(&store, "p1", vec![def("a", 1, &[])]);
            store.mark_generating("p1", "a").unwrap();
        }
        let store = SqliteStore::open(dir.path()).unwrap();
        let rec = store.chunk("p1", "a").unwrap().unwrap();
        assert_eq!(rec.status, ChunkStatus::Generating);
        assert_eq!(rec.dependencies, Vec::<String>::new());
    }
}
