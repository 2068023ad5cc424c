use std::fs::{create_dir_all, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

pub const PIPELINE_RUN_DIR: &str = "headline-pipeline";

pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn resolve_repo_root() -> Option<PathBuf> {
    let mut cursor = std::env::current_dir().ok()?;
    loop {
        if cursor.join(".git").is_dir() {
            return Some(cursor);
        }
        if !cursor.pop() {
            return None;
        }
    }
}

/// `$RUNS_DIR/headline-pipeline`, else `runs/headline-pipeline` under the
/// repository root or the working directory.
pub fn resolve_runs_dir() -> PathBuf {
    if let Ok(raw) = std::env::var("RUNS_DIR") {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed).join(PIPELINE_RUN_DIR);
        }
    }
    if let Some(root) = resolve_repo_root() {
        return root.join("runs").join(PIPELINE_RUN_DIR);
    }
    PathBuf::from("runs").join(PIPELINE_RUN_DIR)
}

/// Append-only JSONL log of stage events, one file per UTC day. Every event
/// carries `ts`, `run_id` and `kind`.
pub struct RunJournal {
    dir: PathBuf,
    run_id: Uuid,
    day_key: String,
    file: File,
}

fn day_key() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}

fn day_file(dir: &Path, day_key: &str) -> PathBuf {
    dir.join(format!("runs-{}.jsonl", day_key))
}

impl RunJournal {
    pub fn open(dir: PathBuf, run_id: Uuid) -> std::io::Result<Self> {
        create_dir_all(&dir)?;
        let day_key = day_key();
        let file = Self::open_day_file(&dir, &day_key)?;
        Ok(Self {
            dir,
            run_id,
            day_key,
            file,
        })
    }

    fn open_day_file(dir: &Path, day_key: &str) -> std::io::Result<File> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(day_file(dir, day_key))
    }

    fn append_line(&mut self, line: &str) -> std::io::Result<()> {
        let today = day_key();
        if today != self.day_key {
            self.file = Self::open_day_file(&self.dir, &today)?;
            self.day_key = today;
        }
        writeln!(self.file, "{}", line)?;
        self.file.flush()
    }

    /// Append `kind` with the fields of `body` (an object; other values go
    /// under `detail`). Journal failures are logged, never propagated.
    pub fn event(&mut self, kind: &str, body: Value) {
        let mut event = Map::new();
        event.insert("ts".into(), Value::String(now_iso()));
        event.insert("run_id".into(), Value::String(self.run_id.to_string()));
        event.insert("kind".into(), Value::String(kind.to_string()));
        match body {
            Value::Object(fields) => event.extend(fields),
            Value::Null => {}
            other => {
                event.insert("detail".into(), other);
            }
        }

        let line = Value::Object(event).to_string();
        if let Err(e) = self.append_line(&line) {
            tracing::warn!("journal write failed: {}", e);
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn current_file(&self) -> PathBuf {
        day_file(&self.dir, &self.day_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_events_append_as_lines() {
        let dir = TempDir::new().unwrap();
        let run_id = Uuid::new_v4();
        let mut journal = RunJournal::open(dir.path().join("runs"), run_id).unwrap();
        journal.event("run_start", Value::Null);
        journal.event("parse_summary", json!({"parsed": 3, "skipped": 1}));
        journal.event("note", json!("free text"));

        let body = std::fs::read_to_string(journal.current_file()).unwrap();
        let events: Vec<Value> = body.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        let kinds: Vec<&str> = events.iter().map(|e| e["kind"].as_str().unwrap()).collect();
        assert_eq!(kinds, vec!["run_start", "parse_summary", "note"]);
        assert_eq!(events[1]["parsed"], 3);
        assert_eq!(events[1]["run_id"], run_id.to_string());
        assert_eq!(events[2]["detail"], "free text");
    }

    #[test]
    fn test_now_iso_is_utc_millis() {
        let ts = now_iso();
        assert!(ts.ends_with('Z'));
        assert_eq!(ts.len(), "2025-01-05T10:30:00.000Z".len());
    }
}
