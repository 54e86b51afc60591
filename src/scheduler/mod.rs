//! Deferred and periodic tool invocations.
//!
//! Tasks are plain values persisted to the task store. Their timers live in
//! a separate runtime map keyed by task id, so a task can be listed, saved
//! and reloaded without ever touching a live handle. Every recurring task
//! owns exactly one timer task that loops for its whole life.

mod store;
mod task;

pub use store::TaskStore;
pub use task::{
    INTERVAL_PREFIX, MAX_SCHEDULE_HORIZON, ScheduledTask, TaskKind, parse_absolute_time,
    parse_interval, resolve_delay,
};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rmcp::model::JsonObject;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ToolboxConfig;
use crate::error::{ToolboxError, ToolboxResult};
use crate::execution_log::OutcomeStatus;
use crate::tools::Dispatcher;
use crate::types::{CallerId, ToolName};

/// Input of `create`. Resolution order: `time` (recurring when it starts
/// with `every@`, absolute otherwise), then `delaySeconds`, then `interval`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTask {
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub tool_args: Option<JsonObject>,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub delay_seconds: Option<u64>,
    #[serde(default)]
    pub interval: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
}

impl CreateTask {
    /// Turn the request into a task kind, validating every field it uses.
    pub fn resolve(&self, now: DateTime<Utc>) -> ToolboxResult<(ToolName, TaskKind)> {
        let tool = self
            .tool_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ToolboxError::validation("Missing required parameter: toolName"))?;

        let start_at = self
            .start_time
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(parse_absolute_time)
            .transpose()?;

        let kind = match (&self.time, self.delay_seconds, &self.interval) {
            (Some(time), _, _) if time.trim().starts_with(INTERVAL_PREFIX) => {
                parse_interval(time)?;
                TaskKind::Recurring {
                    interval: time.trim().to_string(),
                    start_at,
                }
            }
            (Some(time), _, _) if !time.trim().is_empty() => {
                let fire_at = parse_absolute_time(time)?;
                if fire_at <= now {
                    return Err(ToolboxError::validation(
                        "Scheduled time must be in the future",
                    ));
                }
                if (fire_at - now).to_std().is_ok_and(|ahead| ahead > MAX_SCHEDULE_HORIZON) {
                    return Err(ToolboxError::validation(
                        "Scheduled time is too far ahead. The maximum is 100 years",
                    ));
                }
                TaskKind::OnceAbsolute { fire_at }
            }
            (_, Some(delay_seconds), _) if delay_seconds > 0 => {
                resolve_delay(now, delay_seconds)?;
                TaskKind::OnceRelative { delay_seconds }
            }
            (_, _, Some(interval)) if !interval.trim().is_empty() => {
                parse_interval(interval)?;
                TaskKind::Recurring {
                    interval: interval.trim().to_string(),
                    start_at,
                }
            }
            _ => {
                return Err(ToolboxError::validation(
                    "Missing required parameters: time/delaySeconds/interval",
                ));
            }
        };

        Ok((ToolName::new(tool), kind))
    }
}

struct TimerHandle {
    token: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct SchedulerState {
    tasks: Vec<ScheduledTask>,
    timers: HashMap<Uuid, TimerHandle>,
}

impl SchedulerState {
    fn is_current(&self, id: Uuid, token: u64) -> bool {
        self.timers.get(&id).is_some_and(|t| t.token == token)
            && self.tasks.iter().any(|t| t.id == id)
    }

    fn disarm(&mut self, id: &Uuid) {
        if let Some(timer) = self.timers.remove(id) {
            timer.handle.abort();
        }
    }
}

/// Owns persisted tasks and their live timers.
///
/// All mutation and every write of the task file happens under one lock, so
/// the file has exactly one writer.
pub struct Scheduler {
    dispatcher: Dispatcher,
    store: TaskStore,
    state: Mutex<SchedulerState>,
    next_token: AtomicU64,
}

impl Scheduler {
    pub fn new(dispatcher: Dispatcher, config: &ToolboxConfig) -> Arc<Self> {
        Self::with_store(dispatcher, TaskStore::new(&config.tasks_file))
    }

    pub fn with_store(dispatcher: Dispatcher, store: TaskStore) -> Arc<Self> {
        Arc::new(Self {
            dispatcher,
            store,
            state: Mutex::new(SchedulerState::default()),
            next_token: AtomicU64::new(1),
        })
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    /// Validate, persist and arm a new task.
    pub async fn create(self: &Arc<Self>, request: CreateTask) -> ToolboxResult<ScheduledTask> {
        let (tool, kind) = request.resolve(Utc::now())?;
        let task = ScheduledTask::new(tool, request.tool_args.unwrap_or_default(), kind);

        let mut state = self.state.lock().await;
        state.tasks.push(task.clone());
        if let Err(e) = self.store.save(&state.tasks).await {
            state.tasks.pop();
            return Err(ToolboxError::persistence(format!("{:#}", e)));
        }
        self.arm(&mut state, &task);

        info!(task_id = %task.id, tool = %task.tool_name, kind = ?task.kind, "Scheduled task created");
        Ok(task)
    }

    /// Remove a task and stop its timer. Unknown ids are not an error;
    /// the return value says whether anything was removed.
    pub async fn cancel(&self, id: Uuid) -> ToolboxResult<bool> {
        let mut state = self.state.lock().await;
        state.disarm(&id);

        let before = state.tasks.len();
        state.tasks.retain(|t| t.id != id);
        let removed = state.tasks.len() != before;
        if removed {
            self.persist(&state).await?;
            info!(task_id = %id, "Scheduled task cancelled");
        } else {
            debug!(task_id = %id, "Cancel for unknown task id");
        }
        Ok(removed)
    }

    /// Cancel every one-off task. Returns how many were removed.
    pub async fn cancel_all_once(&self) -> ToolboxResult<usize> {
        self.cancel_where(|t| !t.is_recurring()).await
    }

    /// Cancel every recurring task. Returns how many were removed.
    pub async fn cancel_all_recurring(&self) -> ToolboxResult<usize> {
        self.cancel_where(ScheduledTask::is_recurring).await
    }

    async fn cancel_where<F>(&self, predicate: F) -> ToolboxResult<usize>
    where
        F: Fn(&ScheduledTask) -> bool,
    {
        let mut state = self.state.lock().await;
        let doomed: Vec<Uuid> = state
            .tasks
            .iter()
            .filter(|t| predicate(*t))
            .map(|t| t.id)
            .collect();
        if doomed.is_empty() {
            return Ok(0);
        }

        for id in &doomed {
            state.disarm(id);
        }
        state.tasks.retain(|t| !doomed.contains(&t.id));
        self.persist(&state).await?;

        info!(count = doomed.len(), "Scheduled tasks cancelled");
        Ok(doomed.len())
    }

    pub async fn list(&self) -> Vec<ScheduledTask> {
        self.state.lock().await.tasks.clone()
    }

    /// Number of live timers.
    pub async fn armed(&self) -> usize {
        self.state.lock().await.timers.len()
    }

    /// Load the task store and arm everything that still has to fire.
    /// Returns the number of armed tasks.
    pub async fn rearm(self: &Arc<Self>) -> usize {
        let tasks = self.store.load().await;

        let mut state = self.state.lock().await;
        for (_, timer) in state.timers.drain() {
            timer.handle.abort();
        }
        state.tasks = tasks;

        let pending: Vec<ScheduledTask> = state
            .tasks
            .iter()
            .filter(|t| t.needs_timer())
            .cloned()
            .collect();
        for task in &pending {
            self.arm(&mut state, task);
        }

        info!(
            loaded = state.tasks.len(),
            armed = pending.len(),
            "Scheduled tasks re-armed"
        );
        pending.len()
    }

    /// Abort every live timer. Persisted tasks are left untouched.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        for (_, timer) in state.timers.drain() {
            timer.handle.abort();
        }
    }

    fn arm(self: &Arc<Self>, state: &mut SchedulerState, task: &ScheduledTask) {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let first = task.first_fire_at(Utc::now());
        let handle = tokio::spawn(run_timer(
            Arc::downgrade(self),
            task.id,
            token,
            first,
            task.period(),
        ));

        debug!(task_id = %task.id, %first, "Timer armed");
        if let Some(previous) = state.timers.insert(task.id, TimerHandle { token, handle }) {
            previous.handle.abort();
        }
    }

    /// One firing. Returns false when the timer should stop.
    async fn fire(&self, id: Uuid, token: u64) -> bool {
        let task = {
            let state = self.state.lock().await;
            if !state.is_current(id, token) {
                return false;
            }
            match state.tasks.iter().find(|t| t.id == id) {
                Some(task) => task.clone(),
                None => return false,
            }
        };

        debug!(task_id = %id, tool = %task.tool_name, "Scheduled task firing");
        let result = self
            .dispatcher
            .dispatch(
                task.tool_name.as_str(),
                task.tool_args.clone(),
                CallerId::scheduled(&id),
            )
            .await;
        let status = if result.is_error.unwrap_or(false) {
            OutcomeStatus::Error
        } else {
            OutcomeStatus::Success
        };

        let mut state = self.state.lock().await;
        let current = state.is_current(id, token);
        let Some(entry) = state.tasks.iter_mut().find(|t| t.id == id) else {
            return false;
        };
        entry.executed = true;
        entry.last_executed_at = Some(Utc::now());
        entry.last_status = Some(status);
        let recurring = entry.is_recurring();

        if !recurring && current {
            state.timers.remove(&id);
        }
        if let Err(e) = self.persist(&state).await {
            warn!(task_id = %id, "Failed to persist task after firing: {}", e);
        }

        recurring && current
    }

    async fn persist(&self, state: &SchedulerState) -> ToolboxResult<()> {
        self.store
            .save(&state.tasks)
            .await
            .map_err(|e| ToolboxError::persistence(format!("{:#}", e)))
    }
}

async fn run_timer(
    scheduler: Weak<Scheduler>,
    id: Uuid,
    token: u64,
    first: DateTime<Utc>,
    period: Option<Duration>,
) {
    let wait = (first - Utc::now())
        .to_std()
        .unwrap_or(Duration::ZERO)
        .min(MAX_SCHEDULE_HORIZON);
    let mut deadline = Instant::now() + wait;

    loop {
        tokio::time::sleep_until(deadline).await;
        let started = Instant::now();

        let Some(scheduler) = scheduler.upgrade() else {
            return;
        };
        if !scheduler.fire(id, token).await {
            return;
        }
        drop(scheduler);

        let Some(period) = period else {
            return;
        };
        deadline = started + period;
    }
}
