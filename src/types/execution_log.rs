//! DTOs for execution.log.json: transitions taken by an instance, for debugging and resume.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::NodeId;

/// One taken transition chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionStepEntry {
  /// 1-based step index.
  pub step: u32,
  /// State the chain left from.
  pub source: NodeId,
  pub source_name: String,
  /// State the chain entered.
  pub destination: NodeId,
  pub destination_name: String,
  /// Transitions of the chain, in order.
  pub transitions: Vec<NodeId>,
  /// Active leaf states once the chain was applied.
  pub active_states_after: Vec<NodeId>,
}

/// Root structure for execution.log.json.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLog {
  /// Log format version.
  pub version: u32,
  pub class_name: String,
  /// RFC 3339 timestamp when recording started.
  pub started_at: String,
  /// RFC 3339 timestamp when the instance stopped (None while running).
  pub finished_at: Option<String>,
  /// Recorded steps in order.
  pub steps: Vec<TransitionStepEntry>,
}

impl ExecutionLog {
  pub fn new(class_name: impl Into<String>) -> Self {
    Self {
      version: 1,
      class_name: class_name.into(),
      started_at: Utc::now().to_rfc3339(),
      finished_at: None,
      steps: Vec::new(),
    }
  }

  /// Appends a step, numbering it after the last one.
  pub fn record(&mut self, mut entry: TransitionStepEntry) {
    entry.step = self.steps.len() as u32 + 1;
    self.steps.push(entry);
  }

  pub fn finish(&mut self) {
    self.finished_at = Some(Utc::now().to_rfc3339());
  }
}
