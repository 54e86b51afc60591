//! Handler for the `time_tool` tool.

use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Datelike, Local, SecondsFormat, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use rmcp::model::{CallToolResult, Content, JsonObject};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::tools::{ToolContext, ToolHandler, error_result, schema_object};

const PATTERN_LEN: std::ops::RangeInclusive<usize> = 2..=50;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum TimeFormat {
    #[default]
    Iso,
    Timestamp,
    Local,
    Custom,
}

#[derive(Debug, Default, Deserialize)]
struct TimeArgs {
    #[serde(default)]
    format: TimeFormat,
    #[serde(default)]
    pattern: Option<String>,
    #[serde(default)]
    timezone: Option<String>,
}

/// Reports the current time in one of several formats.
#[derive(Clone, Default)]
pub struct TimeToolHandler;

impl TimeToolHandler {
    pub fn new() -> Self {
        Self
    }
}

impl ToolHandler for TimeToolHandler {
    fn name(&self) -> &str {
        "time_tool"
    }

    fn title(&self) -> Option<&str> {
        Some("Current Time")
    }

    fn description(&self) -> &str {
        "Get the current time as ISO 8601, a millisecond timestamp, local wall-clock \
         time, or a custom pattern using the YYYY MM DD HH mm ss tokens."
    }

    fn input_schema(&self) -> JsonObject {
        schema_object(json!({
            "type": "object",
            "properties": {
                "format": {
                    "type": "string",
                    "enum": ["iso", "timestamp", "local", "custom"],
                    "description": "Output format. Defaults to iso."
                },
                "pattern": {
                    "type": "string",
                    "minLength": 2,
                    "maxLength": 50,
                    "description": "Pattern for the custom format, e.g. YYYY-MM-DD HH:mm:ss."
                },
                "timezone": {
                    "type": "string",
                    "description": "IANA timezone, e.g. Asia/Shanghai. Defaults to the system timezone."
                }
            },
            "required": []
        }))
    }

    fn execute(
        &self,
        args: JsonObject,
        _ctx: &ToolContext,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<CallToolResult>> + Send + '_>> {
        Box::pin(async move {
            let args: TimeArgs = match serde_json::from_value(Value::Object(args)) {
                Ok(args) => args,
                Err(e) => return Ok(error_result(format!("Invalid arguments: {}", e))),
            };

            let now = Utc::now();
            let rendered = match args.timezone.as_deref().filter(|tz| !tz.is_empty()) {
                Some(name) => match name.parse::<Tz>() {
                    Ok(tz) => render(now.with_timezone(&tz), args.format, args.pattern.as_deref()),
                    Err(_) => Err(format!("Invalid timezone: {}", name)),
                },
                None => render(now.with_timezone(&Local), args.format, args.pattern.as_deref()),
            };

            Ok(match rendered {
                Ok(text) => CallToolResult::success(vec![Content::text(format!(
                    "Current time: {}",
                    text
                ))]),
                Err(message) => error_result(message),
            })
        })
    }
}

fn render<Z>(at: DateTime<Z>, format: TimeFormat, pattern: Option<&str>) -> Result<String, String>
where
    Z: TimeZone,
    Z::Offset: Display,
{
    match format {
        TimeFormat::Iso => Ok(at.to_rfc3339_opts(SecondsFormat::Millis, true)),
        TimeFormat::Timestamp => Ok(at.timestamp_millis().to_string()),
        TimeFormat::Local => Ok(at.format("%Y-%m-%d %H:%M:%S").to_string()),
        TimeFormat::Custom => {
            let pattern = pattern
                .filter(|p| !p.is_empty())
                .ok_or("Pattern is required for custom format")?;
            if !PATTERN_LEN.contains(&pattern.chars().count()) {
                return Err("Pattern length must be between 2 and 50 characters".to_string());
            }
            Ok(apply_pattern(&at, pattern))
        }
    }
}

/// Replace `YYYY MM DD HH mm ss` tokens; everything else is copied through.
fn apply_pattern<Z: TimeZone>(at: &DateTime<Z>, pattern: &str) -> String {
    let tokens: [(&str, String); 6] = [
        ("YYYY", format!("{:04}", at.year())),
        ("MM", format!("{:02}", at.month())),
        ("DD", format!("{:02}", at.day())),
        ("HH", format!("{:02}", at.hour())),
        ("mm", format!("{:02}", at.minute())),
        ("ss", format!("{:02}", at.second())),
    ];

    let mut out = String::with_capacity(pattern.len());
    let mut rest = pattern;
    'scan: while !rest.is_empty() {
        for (token, value) in &tokens {
            if let Some(tail) = rest.strip_prefix(token) {
                out.push_str(value);
                rest = tail;
                continue 'scan;
            }
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            out.push(c);
        }
        rest = chars.as_str();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution_log::MemoryExecutionLog;
    use crate::tools::{Dispatcher, ToolCatalog, ToolRegistry, result_text};
    use crate::types::CallerId;
    use std::sync::Arc;

    fn fixed() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 4, 9, 5, 3).unwrap()
    }

    async fn call(args: Value) -> CallToolResult {
        let registry = Arc::new(ToolRegistry::new(
            ToolCatalog::new().register_handler(TimeToolHandler::new()),
        ));
        registry.load().await;
        let dispatcher = Dispatcher::new(registry, Arc::new(MemoryExecutionLog::new()));
        dispatcher
            .dispatch("time_tool", args.as_object().cloned().unwrap_or_default(), CallerId::cli())
            .await
    }

    #[test]
    fn test_render_formats() {
        let at = fixed();
        assert_eq!(
            render(at, TimeFormat::Iso, None).unwrap(),
            "2025-07-04T09:05:03.000Z"
        );
        assert_eq!(
            render(at, TimeFormat::Timestamp, None).unwrap(),
            at.timestamp_millis().to_string()
        );
        assert_eq!(
            render(at, TimeFormat::Local, None).unwrap(),
            "2025-07-04 09:05:03"
        );
        assert_eq!(
            render(at, TimeFormat::Custom, Some("YYYY/MM/DD HH:mm:ss")).unwrap(),
            "2025/07/04 09:05:03"
        );
    }

    #[test]
    fn test_custom_pattern_validation() {
        let at = fixed();
        assert!(render(at, TimeFormat::Custom, None).is_err());
        assert!(render(at, TimeFormat::Custom, Some("Y")).is_err());
        assert!(render(at, TimeFormat::Custom, Some(&"Y".repeat(51))).is_err());
        assert_eq!(
            render(at, TimeFormat::Custom, Some("day DD")).unwrap(),
            "day 04"
        );
    }

    #[test]
    fn test_timezone_shifts_wall_clock() {
        let at = fixed().with_timezone(&chrono_tz::Asia::Shanghai);
        assert_eq!(
            render(at, TimeFormat::Custom, Some("HH:mm")).unwrap(),
            "17:05"
        );
    }

    #[tokio::test]
    async fn test_tool_output_and_errors() {
        let ok = call(json!({"format": "timestamp"})).await;
        assert_ne!(ok.is_error, Some(true));
        assert!(result_text(&ok).starts_with("Current time: "));

        let bad_tz = call(json!({"timezone": "Mars/Olympus"})).await;
        assert_eq!(bad_tz.is_error, Some(true));
        assert!(result_text(&bad_tz).contains("Invalid timezone"));

        let bad_format = call(json!({"format": "roman"})).await;
        assert_eq!(bad_format.is_error, Some(true));
    }
}
