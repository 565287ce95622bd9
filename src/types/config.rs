//! Per-instance configuration, passed explicitly at construction.

use serde::{Deserialize, Serialize};

use super::state_history::DEFAULT_STATE_HISTORY_MAX_COUNT;

fn default_history() -> usize {
  DEFAULT_STATE_HISTORY_MAX_COUNT
}

fn default_true() -> bool {
  true
}

/// Options for an [crate::Instance] and the child instances of its references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceConfig {
  /// Entries kept in the state history; zero disables it.
  #[serde(default = "default_history")]
  pub state_history_max_count: usize,
  /// Stop automatically once the root machine is in an end state.
  #[serde(default)]
  pub stop_on_end_state: bool,
  /// Record every taken transition chain in an [crate::types::ExecutionLog].
  #[serde(default)]
  pub record_execution_log: bool,
  /// Read and populate the class's path guid cache.
  #[serde(default = "default_true")]
  pub use_path_guid_cache: bool,
}

impl Default for InstanceConfig {
  fn default() -> Self {
    Self {
      state_history_max_count: DEFAULT_STATE_HISTORY_MAX_COUNT,
      stop_on_end_state: false,
      record_execution_log: false,
      use_path_guid_cache: true,
    }
  }
}
