//! Path guids: persistent addresses of nodes inside nested and referenced machines.
//!
//! A node's own id does not tell two references of the same class apart, so the persistent
//! address is the guid of the `/`-joined chain of owner ids from the root instance down to
//! the node.

use std::collections::HashMap;

use crate::types::NodeId;

/// Root-path-guid -> {node id -> path guid}, memoized on the root class.
#[derive(Debug, Clone, Default)]
pub struct PathGuidCache {
  by_root: HashMap<NodeId, HashMap<NodeId, NodeId>>,
}

impl PathGuidCache {
  /// Path guid of `node_id` inside the instance whose root machine has `root_path_guid`.
  pub fn lookup(&self, root_path_guid: NodeId, node_id: NodeId) -> Option<NodeId> {
    self.by_root.get(&root_path_guid)?.get(&node_id).copied()
  }

  pub(crate) fn insert(&mut self, root_path_guid: NodeId, node_id: NodeId, path_guid: NodeId) {
    self
      .by_root
      .entry(root_path_guid)
      .or_default()
      .insert(node_id, path_guid);
  }

  /// Merges entries gathered by a child instance build.
  pub(crate) fn extend(&mut self, other: PathGuidCache) {
    for (root, nodes) in other.by_root {
      self.by_root.entry(root).or_default().extend(nodes);
    }
  }

  /// Number of instance roots cached.
  pub fn root_count(&self) -> usize {
    self.by_root.len()
  }

  pub fn is_empty(&self) -> bool {
    self.by_root.is_empty()
  }
}

/// Builds path strings, suffixing repeats with `_N` so every path stays unique in one build.
#[derive(Debug, Default)]
pub struct GuidPathBuilder {
  mapped_paths: HashMap<String, u32>,
}

impl GuidPathBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  /// Joins `chain` with `/`, applying the duplicate suffix.
  pub fn build_path(&mut self, chain: &[NodeId]) -> String {
    let mut path = chain
      .iter()
      .map(NodeId::to_string)
      .collect::<Vec<_>>()
      .join("/");
    let count = self.mapped_paths.entry(path.clone()).or_insert(0);
    if *count > 0 {
      path = format!("{path}_{count}");
    }
    *count += 1;
    path
  }

  /// Path guid for `chain`.
  pub fn path_guid(&mut self, chain: &[NodeId]) -> NodeId {
    NodeId::from_path(&self.build_path(chain))
  }
}
