//! Tests for `StateHistory`.

use chrono::Utc;

use super::{NodeId, StateHistory, StateHistoryEntry};

fn entry(name: &str) -> StateHistoryEntry {
  StateHistoryEntry {
    guid: NodeId::new(),
    name: name.to_string(),
    start_time: Utc::now(),
    time_in_state: 1.0,
  }
}

#[test]
fn keeps_newest_entries_up_to_max() {
  let mut history = StateHistory::new(2);
  history.push(entry("a"));
  history.push(entry("b"));
  history.push(entry("c"));
  let names: Vec<_> = history.iter().map(|e| e.name.as_str()).collect();
  assert_eq!(names, vec!["b", "c"]);
}

#[test]
fn shrinking_max_trims_oldest() {
  let mut history = StateHistory::default();
  for name in ["a", "b", "c", "d"] {
    history.push(entry(name));
  }
  history.set_max_count(1);
  assert_eq!(history.len(), 1);
  assert_eq!(history.entries()[0].name, "d");
}

#[test]
fn zero_max_records_nothing() {
  let mut history = StateHistory::new(0);
  history.push(entry("a"));
  assert!(history.is_empty());
}
