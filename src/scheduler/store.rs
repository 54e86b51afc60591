use std::path::{Path, PathBuf};

use anyhow::Result;
use serde_json::Value;
use tracing::warn;

use crate::scheduler::ScheduledTask;
use crate::storage::write_json_atomic;

/// The scheduled-task file: one JSON array, rewritten in full on every change.
#[derive(Debug, Clone)]
pub struct TaskStore {
    path: PathBuf,
}

impl TaskStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every well-formed task.
    ///
    /// A missing file is an empty list. An unreadable file, or one that is
    /// not a JSON array, is an empty list plus a warning. Individual entries
    /// that do not parse are dropped with a warning.
    pub async fn load(&self) -> Vec<ScheduledTask> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!(path = %self.path.display(), "Failed to read task store: {}", e);
                return Vec::new();
            }
        };

        if raw.trim().is_empty() {
            return Vec::new();
        }

        let entries: Vec<Value> = match serde_json::from_str(&raw) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %self.path.display(), "Task store is not a JSON array: {}", e);
                return Vec::new();
            }
        };

        entries
            .into_iter()
            .enumerate()
            .filter_map(|(position, entry)| match serde_json::from_value(entry) {
                Ok(task) => Some(task),
                Err(e) => {
                    warn!(position, "Dropping malformed scheduled task: {}", e);
                    None
                }
            })
            .collect()
    }

    pub async fn save(&self, tasks: &[ScheduledTask]) -> Result<()> {
        write_json_atomic(&self.path, tasks).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::TaskKind;
    use crate::types::ToolName;
    use rmcp::model::JsonObject;
    use serde_json::json;

    #[tokio::test]
    async fn test_missing_and_corrupt_files_are_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::new(dir.path().join("json").join("tasks.json"));
        assert!(store.load().await.is_empty());

        tokio::fs::create_dir_all(dir.path().join("json")).await.unwrap();
        tokio::fs::write(store.path(), "{ not json").await.unwrap();
        assert!(store.load().await.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_entries_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::new(dir.path().join("tasks.json"));

        let good = ScheduledTask::new(
            ToolName::new("time_tool"),
            JsonObject::new(),
            TaskKind::OnceRelative { delay_seconds: 60 },
        );
        let body = json!([
            good,
            {"id": "not-a-uuid", "toolName": "x", "type": "once_relative", "delaySeconds": 1},
            {"id": uuid::Uuid::new_v4(), "toolName": "x", "createdAt": chrono::Utc::now(), "type": "weekly"},
            42
        ]);
        tokio::fs::write(store.path(), body.to_string()).await.unwrap();

        let tasks = store.load().await;
        assert_eq!(tasks, vec![good]);
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::new(dir.path().join("nested").join("tasks.json"));
        let task = ScheduledTask::new(
            ToolName::new("log_tool"),
            JsonObject::new(),
            TaskKind::Recurring {
                interval: "every@1h".to_string(),
                start_at: None,
            },
        );

        store.save(std::slice::from_ref(&task)).await.unwrap();
        assert_eq!(store.load().await, vec![task]);
    }
}
