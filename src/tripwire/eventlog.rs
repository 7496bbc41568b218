//! CK-010: Append-only JSONL provenance log, one file per project.

use crate::core::types::{PipelineEvent, TimestampedEvent};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current UTC time as `YYYY-MM-DDTHH:MM:SSZ`.
pub fn now_iso8601() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format_utc(secs)
}

/// Format seconds since the Unix epoch as an ISO 8601 UTC timestamp.
pub fn format_utc(secs: u64) -> String {
    let days = secs / 86400;
    let time_secs = secs % 86400;
    let (hours, minutes, seconds) = (time_secs / 3600, (time_secs % 3600) / 60, time_secs % 60);

    let mut year = 1970u64;
    let mut remaining = days;
    loop {
        let year_days = if is_leap(year) { 366 } else { 365 };
        if remaining < year_days {
            break;
        }
        remaining -= year_days;
        year += 1;
    }

    let feb = if is_leap(year) { 29 } else { 28 };
    let month_days = [31, feb, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
    let mut month = 12;
    for (i, &len) in month_days.iter().enumerate() {
        if remaining < len {
            month = i + 1;
            break;
        }
        remaining -= len;
    }

    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        year,
        month,
        remaining + 1,
        hours,
        minutes,
        seconds
    )
}

fn is_leap(y: u64) -> bool {
    (y % 4 == 0 && y % 100 != 0) || y % 400 == 0
}

/// Generate a run ID.
pub fn generate_run_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("r-{:012x}", nanos & 0xFFFF_FFFF_FFFF)
}

/// `<state_dir>/<project>/events.jsonl`
pub fn event_log_path(state_dir: &Path, project: &str) -> PathBuf {
    state_dir.join(project).join("events.jsonl")
}

/// Append an event to the project's event log.
pub fn append_event(state_dir: &Path, project: &str, event: PipelineEvent) -> Result<(), String> {
    let path = event_log_path(state_dir, project);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| format!("cannot create state dir: {}", e))?;
    }

    let te = TimestampedEvent {
        ts: now_iso8601(),
        event,
    };
    let json = serde_json::to_string(&te).map_err(|e| format!("JSON serialize error: {}", e))?;

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| format!("cannot open event log {}: {}", path.display(), e))?;

    writeln!(file, "{}", json).map_err(|e| format!("write error: {}", e))
}

/// Where pipeline components send provenance events.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    state_dir: Option<PathBuf>,
}

impl EventSink {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: Some(state_dir.into()),
        }
    }

    /// A sink that drops everything.
    pub fn disabled() -> Self {
        Self { state_dir: None }
    }

    /// Best-effort append; a failed write never affects the pipeline.
    pub fn emit(&self, project: &str, event: PipelineEvent) {
        let Some(dir) = &self.state_dir else {
            return;
        };
        if let Err(e) = append_event(dir, project, event) {
            tracing::warn!(project, error = %e, "event log write failed");
        }
    }
}
