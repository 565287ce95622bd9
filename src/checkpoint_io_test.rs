//! Tests for checkpoint save/load.

use crate::checkpoint_io::{CHECKPOINT_FILENAME, load_checkpoint, save_checkpoint};
use crate::types::{Checkpoint, NodeId};

#[test]
fn roundtrip_save_load() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("run").join(CHECKPOINT_FILENAME);
  let active = vec![NodeId::from_path("a/b"), NodeId::from_path("a/c")];
  let mut cp = Checkpoint::new("Door", active.clone());
  cp.context.insert("k".to_string(), "v".to_string());
  save_checkpoint(&path, &cp).unwrap();
  assert!(path.exists());
  let loaded = load_checkpoint(&path).unwrap();
  assert_eq!(loaded.class_name, "Door");
  assert_eq!(loaded.active_states, active);
  assert_eq!(loaded.context.get("k").map(String::as_str), Some("v"));
}

#[test]
fn guids_are_stored_hyphenated() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join(CHECKPOINT_FILENAME);
  let guid = NodeId::from_path("root/state");
  save_checkpoint(&path, &Checkpoint::new("Door", vec![guid])).unwrap();
  let text = std::fs::read_to_string(&path).unwrap();
  assert!(text.contains(&guid.to_string()));
}

#[test]
fn load_missing_file_returns_error() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("nonexistent.json");
  let r = load_checkpoint(&path);
  assert!(r.is_err());
}

#[test]
fn load_invalid_json_is_invalid_data() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join(CHECKPOINT_FILENAME);
  std::fs::write(&path, "{ not json").unwrap();
  let err = load_checkpoint(&path).unwrap_err();
  assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
}
