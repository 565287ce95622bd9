//! Load execution.log.json and derive a resume checkpoint from it.

use crate::types::{Checkpoint, ExecutionLog};
use std::path::Path;
use tracing::instrument;

/// Default filename for execution log under a run directory.
pub const EXECUTION_LOG_FILENAME: &str = "execution.log.json";

/// Loads an execution log from `path`. Returns error if file is missing or invalid JSON.
#[instrument(level = "trace", skip(path))]
pub fn load_execution_log(path: &Path) -> Result<ExecutionLog, std::io::Error> {
  let bytes = std::fs::read(path)?;
  serde_json::from_slice(&bytes)
    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

/// Writes a partial execution log to `path` (rewrite after each tick).
/// Always writes with `finished_at: None` so the file represents an in-progress run.
/// Creates parent directory if needed.
#[instrument(level = "trace", skip(path, log))]
pub fn write_execution_log_partial(path: &Path, log: &ExecutionLog) -> Result<(), std::io::Error> {
  let partial = ExecutionLog {
    finished_at: None,
    ..log.clone()
  };
  write_execution_log(path, &partial)
}

/// Writes the log as it is, `finished_at` included.
pub fn write_execution_log(path: &Path, log: &ExecutionLog) -> Result<(), std::io::Error> {
  let json = serde_json::to_string_pretty(log)
    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent)?;
  }
  std::fs::write(path, json)
}

/// Resume state derived from an execution log.
#[derive(Debug, Clone, PartialEq)]
pub struct ResumeFromLog {
  /// Active leaves after the last recorded step.
  pub checkpoint: Checkpoint,
  /// True if the log indicates the run already completed (finished_at set).
  pub already_completed: bool,
}

/// Derives resume state from a loaded execution log.
/// - The checkpoint holds the active leaves after the last step.
/// - A finished log with no steps resumes with an empty set, `already_completed: true`.
/// - A partial log with no steps returns None.
pub fn resume_state_from_log(log: &ExecutionLog) -> Option<ResumeFromLog> {
  let already_completed = log.finished_at.is_some();
  let active_states = match log.steps.last() {
    Some(last) => last.active_states_after.clone(),
    None if already_completed => Vec::new(),
    None => return None,
  };
  Some(ResumeFromLog {
    checkpoint: Checkpoint::new(log.class_name.clone(), active_states),
    already_completed,
  })
}
