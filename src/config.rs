use serde::{Deserialize, Serialize};
use std::{env, fs, path::PathBuf};

/// Default number of workflow steps allowed in flight at once in parallel mode.
const DEFAULT_WORKFLOW_MAX_PARALLEL: usize = 16;

/// Filesystem locations and limits for a toolbox process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolboxConfig {
    /// Directory holding execution logs and default workflow reports.
    pub log_dir: PathBuf,
    /// JSON-lines execution log, one outcome per dispatch.
    pub log_file: PathBuf,
    /// Persisted scheduled tasks (JSON array, rewritten on every mutation).
    pub tasks_file: PathBuf,
    /// Upper bound on concurrently running steps in a parallel workflow.
    pub workflow_max_parallel: usize,
}

impl ToolboxConfig {
    /// Derive every path from a single data directory.
    ///
    /// Layout: `<root>/log/ToolBox.log`, `<root>/log/workflow_*.json`,
    /// `<root>/json/scheduled_tasks.json`.
    pub fn for_data_dir(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let log_dir = root.join("log");
        Self {
            log_file: log_dir.join("ToolBox.log"),
            tasks_file: root.join("json").join("scheduled_tasks.json"),
            log_dir,
            workflow_max_parallel: DEFAULT_WORKFLOW_MAX_PARALLEL,
        }
    }

    /// Create the directories the config points at.
    pub fn ensure_dirs(&self) -> anyhow::Result<()> {
        fs::create_dir_all(&self.log_dir)?;
        if let Some(parent) = self.log_file.parent() {
            fs::create_dir_all(parent)?;
        }
        if let Some(parent) = self.tasks_file.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

impl Default for ToolboxConfig {
    fn default() -> Self {
        let root = env::var("TOOLBOX_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(".toolbox"));
        let mut config = Self::for_data_dir(root);

        if let Ok(dir) = env::var("TOOLBOX_LOG_DIR") {
            config.log_dir = PathBuf::from(dir);
            config.log_file = config.log_dir.join("ToolBox.log");
        }
        if let Ok(file) = env::var("TOOLBOX_TASKS_FILE") {
            config.tasks_file = PathBuf::from(file);
        }
        if let Some(n) = env::var("TOOLBOX_WORKFLOW_MAX_PARALLEL")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|n| *n > 0)
        {
            config.workflow_max_parallel = n;
        }

        config
    }
}
