//! Execution outcome records and the sinks that store them.
//!
//! The dispatcher emits exactly one [`ExecutionOutcome`] per call. Sinks are
//! fire-and-forget from the dispatcher's point of view: a failing sink is
//! logged and never fails the dispatch.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Mutex as StdMutex;

use anyhow::Result;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::types::{CallerId, ToolName};

/// Upper bound on matching entries a single query collects before paginating.
pub const MAX_QUERY_RESULTS: usize = 100;

/// Terminal status of a single dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Success,
    Error,
}

/// Structured record of one dispatcher call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutcome {
    /// When the call started.
    pub ts: DateTime<Utc>,
    pub tool: ToolName,
    pub caller: CallerId,
    #[serde(default)]
    pub args: Value,
    pub status: OutcomeStatus,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    /// Full error chain, when the failure carried more than a message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

/// Destination for execution outcomes.
pub trait ExecutionLog: Send + Sync {
    /// Record one outcome.
    fn record<'a>(
        &'a self,
        outcome: &'a ExecutionOutcome,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// Appends outcomes as JSON lines to a file.
pub struct JsonlExecutionLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlExecutionLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, outcome: &ExecutionOutcome) -> Result<()> {
        let mut line = serde_json::to_string(outcome)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Scan the log and return the requested page of matching outcomes.
    ///
    /// Lines that do not parse are skipped. At most [`MAX_QUERY_RESULTS`]
    /// matches are collected before pagination is applied.
    pub async fn query(&self, query: &LogQuery) -> Result<Vec<ExecutionOutcome>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let matches: Vec<ExecutionOutcome> = raw
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str::<ExecutionOutcome>(line).ok())
            .filter(|outcome| query.matches(outcome))
            .take(MAX_QUERY_RESULTS)
            .collect();

        Ok(query.paginate(matches))
    }
}

impl ExecutionLog for JsonlExecutionLog {
    fn record<'a>(
        &'a self,
        outcome: &'a ExecutionOutcome,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(self.append(outcome))
    }
}

/// Keeps outcomes in memory. Intended for tests and embedding.
#[derive(Default)]
pub struct MemoryExecutionLog {
    entries: StdMutex<Vec<ExecutionOutcome>>,
}

impl MemoryExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    pub fn outcomes(&self) -> Vec<ExecutionOutcome> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    /// Outcomes recorded for a given tool.
    pub fn outcomes_for(&self, tool: &str) -> Vec<ExecutionOutcome> {
        self.outcomes()
            .into_iter()
            .filter(|o| o.tool.as_str() == tool)
            .collect()
    }
}

impl ExecutionLog for MemoryExecutionLog {
    fn record<'a>(
        &'a self,
        outcome: &'a ExecutionOutcome,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        let result = self
            .entries
            .lock()
            .map(|mut entries| entries.push(outcome.clone()))
            .map_err(|_| anyhow::anyhow!("execution log mutex poisoned"));
        Box::pin(std::future::ready(result))
    }
}

/// Filter and pagination for [`JsonlExecutionLog::query`].
#[derive(Debug, Clone)]
pub struct LogQuery {
    /// 1-based page number.
    pub page: usize,
    /// Entries per page, clamped to `1..=100`.
    pub page_size: usize,
    pub tool_pattern: Option<Regex>,
    pub status: Option<OutcomeStatus>,
    pub min_duration_ms: Option<u64>,
    pub max_duration_ms: Option<u64>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl Default for LogQuery {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 10,
            tool_pattern: None,
            status: None,
            min_duration_ms: None,
            max_duration_ms: None,
            start: None,
            end: None,
        }
    }
}

impl LogQuery {
    pub fn matches(&self, outcome: &ExecutionOutcome) -> bool {
        if let Some(pattern) = &self.tool_pattern {
            if !pattern.is_match(outcome.tool.as_str()) {
                return false;
            }
        }
        if let Some(status) = self.status {
            if outcome.status != status {
                return false;
            }
        }
        if self.min_duration_ms.is_some_and(|min| outcome.duration_ms < min) {
            return false;
        }
        if self.max_duration_ms.is_some_and(|max| outcome.duration_ms > max) {
            return false;
        }
        if self.start.is_some_and(|start| outcome.ts < start) {
            return false;
        }
        if self.end.is_some_and(|end| outcome.ts > end) {
            return false;
        }
        true
    }

    fn paginate(&self, matches: Vec<ExecutionOutcome>) -> Vec<ExecutionOutcome> {
        let page_size = self.page_size.clamp(1, 100);
        let skip = (self.page.max(1) - 1).saturating_mul(page_size);
        matches.into_iter().skip(skip).take(page_size).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(tool: &str, status: OutcomeStatus, duration_ms: u64) -> ExecutionOutcome {
        ExecutionOutcome {
            ts: Utc::now(),
            tool: ToolName::new(tool),
            caller: CallerId::new("test"),
            args: serde_json::json!({}),
            status,
            duration_ms,
            payload: None,
            error: None,
            error_kind: None,
            trace: None,
        }
    }

    #[tokio::test]
    async fn test_jsonl_append_and_query() {
        let dir = tempfile::tempdir().unwrap();
        let log = JsonlExecutionLog::new(dir.path().join("log").join("ToolBox.log"));

        log.record(&outcome("time_tool", OutcomeStatus::Success, 3))
            .await
            .unwrap();
        log.record(&outcome("log_tool", OutcomeStatus::Error, 50))
            .await
            .unwrap();
        log.record(&outcome("time_tool", OutcomeStatus::Error, 120))
            .await
            .unwrap();

        let all = log.query(&LogQuery::default()).await.unwrap();
        assert_eq!(all.len(), 3);

        let errors = log
            .query(&LogQuery {
                status: Some(OutcomeStatus::Error),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(errors.len(), 2);

        let slow_time = log
            .query(&LogQuery {
                tool_pattern: Some(Regex::new("^time").unwrap()),
                min_duration_ms: Some(100),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(slow_time.len(), 1);
        assert_eq!(slow_time[0].duration_ms, 120);
    }

    #[tokio::test]
    async fn test_query_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = JsonlExecutionLog::new(dir.path().join("absent.log"));
        assert!(log.query(&LogQuery::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_query_skips_garbage_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ToolBox.log");
        let good = serde_json::to_string(&outcome("a", OutcomeStatus::Success, 1)).unwrap();
        tokio::fs::write(&path, format!("not json\n{}\n\n", good))
            .await
            .unwrap();

        let log = JsonlExecutionLog::new(&path);
        assert_eq!(log.query(&LogQuery::default()).await.unwrap().len(), 1);
    }

    #[test]
    fn test_paginate() {
        let entries: Vec<_> = (0..25)
            .map(|i| outcome("t", OutcomeStatus::Success, i))
            .collect();
        let query = LogQuery {
            page: 3,
            page_size: 10,
            ..Default::default()
        };
        let page = query.paginate(entries);
        assert_eq!(page.len(), 5);
        assert_eq!(page[0].duration_ms, 20);
    }

    #[test]
    fn test_outcome_serializes_camel_case_without_empty_fields() {
        let json = serde_json::to_value(outcome("t", OutcomeStatus::Success, 7)).unwrap();
        assert_eq!(json["durationMs"], 7);
        assert_eq!(json["status"], "success");
        assert!(json.get("error").is_none());
        assert!(json.get("payload").is_none());
    }
}
