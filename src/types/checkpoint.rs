//! Snapshot of an instance's active states for save and restore.

use serde::{Deserialize, Serialize};

use super::{NodeId, RunContext};

/// Active-state snapshot written to checkpoint.json.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Checkpoint {
  /// Class the snapshot was captured from.
  pub class_name: String,
  /// Path guids of the active leaf states.
  pub active_states: Vec<NodeId>,
  /// Context values at capture time.
  #[serde(default)]
  pub context: RunContext,
}

impl Checkpoint {
  pub fn new(class_name: impl Into<String>, active_states: Vec<NodeId>) -> Self {
    Self {
      class_name: class_name.into(),
      active_states,
      context: RunContext::new(),
    }
  }
}
