//! Persisted task records and the time arithmetic around them.

use std::time::Duration;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use rmcp::model::JsonObject;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ToolboxError, ToolboxResult};
use crate::execution_log::OutcomeStatus;
use crate::types::ToolName;

/// Prefix that marks a `time` value as a recurring interval.
pub const INTERVAL_PREFIX: &str = "every@";

/// Furthest ahead a task may be scheduled, and the longest interval.
pub const MAX_SCHEDULE_HORIZON: Duration = Duration::from_secs(100 * 365 * 86_400);

const INTERVAL_FORMAT_HINT: &str = "Invalid interval format. Use every@<number><s|m|h|d>, e.g. every@5m";

/// When a task fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskKind {
    OnceAbsolute {
        #[serde(rename = "fireAt")]
        fire_at: DateTime<Utc>,
    },
    OnceRelative {
        #[serde(rename = "delaySeconds")]
        delay_seconds: u64,
    },
    Recurring {
        interval: String,
        #[serde(rename = "startAt", default, skip_serializing_if = "Option::is_none")]
        start_at: Option<DateTime<Utc>>,
    },
}

/// A deferred or periodic tool invocation, exactly as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledTask {
    pub id: Uuid,
    pub tool_name: ToolName,
    #[serde(default)]
    pub tool_args: JsonObject,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub executed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_executed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_status: Option<OutcomeStatus>,
    #[serde(flatten)]
    pub kind: TaskKind,
}

impl ScheduledTask {
    pub fn new(tool_name: ToolName, tool_args: JsonObject, kind: TaskKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            tool_name,
            tool_args,
            created_at: Utc::now(),
            executed: false,
            last_executed_at: None,
            last_status: None,
            kind,
        }
    }

    pub fn is_recurring(&self) -> bool {
        matches!(self.kind, TaskKind::Recurring { .. })
    }

    /// Period of a recurring task. `None` for one-off tasks and for
    /// intervals that no longer parse.
    pub fn period(&self) -> Option<Duration> {
        match &self.kind {
            TaskKind::Recurring { interval, .. } => parse_interval(interval).ok(),
            _ => None,
        }
    }

    /// Whether arming this task at startup makes sense.
    pub fn needs_timer(&self) -> bool {
        match self.kind {
            TaskKind::Recurring { .. } => self.period().is_some(),
            _ => !self.executed,
        }
    }

    /// First instant the timer should fire when armed at `now`.
    ///
    /// One-off tasks whose time has passed fire immediately. A recurring task
    /// that fired before resumes one period after its last firing, or now if
    /// that is already past; missed periods are never replayed. A time that
    /// cannot be represented falls back to `now`.
    pub fn first_fire_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let at = match &self.kind {
            TaskKind::OnceAbsolute { fire_at } => Some(*fire_at),
            TaskKind::OnceRelative { delay_seconds } => {
                offset(self.created_at, Duration::from_secs(*delay_seconds))
            }
            TaskKind::Recurring { start_at, .. } => match (start_at, self.last_executed_at) {
                (Some(start), _) if *start > now => Some(*start),
                (_, Some(last)) => self.period().and_then(|period| offset(last, period)),
                _ => None,
            },
        };
        at.map_or(now, |at| at.max(now))
    }
}

/// Parse `every@<N><s|m|h|d>` into a period. `N` must be positive.
pub fn parse_interval(spec: &str) -> ToolboxResult<Duration> {
    let invalid = || ToolboxError::validation(INTERVAL_FORMAT_HINT);

    let body = spec.trim().strip_prefix(INTERVAL_PREFIX).ok_or_else(invalid)?;
    let unit = body.chars().last().ok_or_else(invalid)?;
    let amount: u64 = body[..body.len() - unit.len_utf8()]
        .parse()
        .map_err(|_| invalid())?;
    if amount == 0 {
        return Err(invalid());
    }

    let seconds = match unit {
        's' => Some(amount),
        'm' => amount.checked_mul(60),
        'h' => amount.checked_mul(3_600),
        'd' => amount.checked_mul(86_400),
        _ => None,
    }
    .ok_or_else(invalid)?;

    let period = Duration::from_secs(seconds);
    if period > MAX_SCHEDULE_HORIZON {
        return Err(ToolboxError::validation(
            "Interval is too long. The maximum is 100 years",
        ));
    }
    Ok(period)
}

/// Fire time of a relative delay counted from `now`, bounded by
/// [`MAX_SCHEDULE_HORIZON`].
pub fn resolve_delay(now: DateTime<Utc>, delay_seconds: u64) -> ToolboxResult<DateTime<Utc>> {
    let delay = Duration::from_secs(delay_seconds);
    if delay > MAX_SCHEDULE_HORIZON {
        return Err(ToolboxError::validation(
            "delaySeconds is too large. The maximum is 100 years",
        ));
    }
    offset(now, delay)
        .ok_or_else(|| ToolboxError::validation("delaySeconds is out of range"))
}

/// Parse an absolute instant: RFC 3339, or `YYYY-MM-DD HH:MM:SS` in local time.
pub fn parse_absolute_time(value: &str) -> ToolboxResult<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(value) {
        return Ok(at.with_timezone(&Utc));
    }

    let naive = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S"))
        .map_err(|_| {
            ToolboxError::validation(format!(
                "Invalid time format: {}. Use RFC 3339 or YYYY-MM-DD HH:MM:SS",
                value
            ))
        })?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|at| at.with_timezone(&Utc))
        .ok_or_else(|| ToolboxError::validation(format!("Time {} does not exist locally", value)))
}

fn offset(at: DateTime<Utc>, by: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(by)
        .ok()
        .and_then(|by| at.checked_add_signed(by))
}
