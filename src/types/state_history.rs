//! Bounded record of states an instance has left.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::NodeId;

/// Default number of entries kept per instance.
pub const DEFAULT_STATE_HISTORY_MAX_COUNT: usize = 20;

/// One state that was active and has since been left.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateHistoryEntry {
  /// Path guid of the state.
  pub guid: NodeId,
  pub name: String,
  pub start_time: DateTime<Utc>,
  /// Seconds the state was active.
  pub time_in_state: f32,
}

/// Ring buffer of [StateHistoryEntry], oldest first.
#[derive(Debug, Clone)]
pub struct StateHistory {
  entries: VecDeque<StateHistoryEntry>,
  max_count: usize,
}

impl Default for StateHistory {
  fn default() -> Self {
    Self::new(DEFAULT_STATE_HISTORY_MAX_COUNT)
  }
}

impl StateHistory {
  /// A `max_count` of zero disables recording.
  pub fn new(max_count: usize) -> Self {
    Self {
      entries: VecDeque::with_capacity(max_count),
      max_count,
    }
  }

  pub fn push(&mut self, entry: StateHistoryEntry) {
    if self.max_count == 0 {
      return;
    }
    self.entries.push_back(entry);
    self.trim();
  }

  pub fn set_max_count(&mut self, max_count: usize) {
    self.max_count = max_count;
    self.trim();
  }

  fn trim(&mut self) {
    while self.entries.len() > self.max_count {
      self.entries.pop_front();
    }
  }

  pub fn max_count(&self) -> usize {
    self.max_count
  }

  pub fn entries(&self) -> Vec<StateHistoryEntry> {
    self.entries.iter().cloned().collect()
  }

  pub fn iter(&self) -> impl Iterator<Item = &StateHistoryEntry> {
    self.entries.iter()
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn clear(&mut self) {
    self.entries.clear();
  }
}
