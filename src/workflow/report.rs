use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::error::{ToolboxError, ToolboxResult};
use crate::storage::write_json_atomic;
use crate::workflow::WorkflowReport;

/// Where a run's report goes.
///
/// No `output_file`: `<log_dir>/workflow_<timestamp>.json`. Absolute paths
/// are taken as given. Relative paths resolve under `log_dir` and may not
/// climb out of it.
pub fn resolve_output_path(
    log_dir: &Path,
    output_file: Option<&str>,
    now: DateTime<Utc>,
) -> ToolboxResult<PathBuf> {
    let Some(requested) = output_file.map(str::trim).filter(|s| !s.is_empty()) else {
        let stamp = now.format("%Y-%m-%dT%H-%M-%S-%3fZ");
        return Ok(log_dir.join(format!("workflow_{}.json", stamp)));
    };

    let requested = Path::new(requested);
    if requested.is_absolute() {
        return Ok(requested.to_path_buf());
    }

    let escapes = requested
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(ToolboxError::validation(format!(
            "outputFile `{}` must stay inside the log directory",
            requested.display()
        )));
    }

    Ok(log_dir.join(requested))
}

pub(crate) async fn save_report(report: &WorkflowReport, path: &Path) -> ToolboxResult<()> {
    write_json_atomic(path, report)
        .await
        .map_err(|e| ToolboxError::Persistence(format!("{:#}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_default_path_is_timestamped_under_log_dir() {
        let now = Utc.with_ymd_and_hms(2026, 3, 16, 8, 30, 0).unwrap();
        let path = resolve_output_path(Path::new("/logs"), None, now).unwrap();
        assert_eq!(
            path,
            PathBuf::from("/logs/workflow_2026-03-16T08-30-00-000Z.json")
        );
    }

    #[test]
    fn test_relative_and_absolute_paths() {
        let now = Utc::now();
        assert_eq!(
            resolve_output_path(Path::new("/logs"), Some("runs/nightly.json"), now).unwrap(),
            PathBuf::from("/logs/runs/nightly.json")
        );
        assert_eq!(
            resolve_output_path(Path::new("/logs"), Some("/tmp/report.json"), now).unwrap(),
            PathBuf::from("/tmp/report.json")
        );
        assert_eq!(
            resolve_output_path(Path::new("/logs"), Some("  "), now)
                .unwrap()
                .parent(),
            Some(Path::new("/logs"))
        );
    }

    #[test]
    fn test_relative_escape_is_rejected() {
        let err = resolve_output_path(Path::new("/logs"), Some("../etc/passwd"), Utc::now())
            .unwrap_err();
        assert_eq!(err.kind(), "ValidationError");

        assert!(resolve_output_path(Path::new("/logs"), Some("a/../../b"), Utc::now()).is_err());
    }
}
