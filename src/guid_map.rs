//! Node registry keyed by path guid, plus the redirect map for save-data compatibility.

use std::collections::HashMap;
use tracing::warn;

use crate::nodes::NodeIndex;
use crate::types::NodeId;

/// Maps path guids to arena slots of one instance and old guids to current ones.
#[derive(Debug, Default)]
pub struct GuidMap {
  nodes: HashMap<NodeId, NodeIndex>,
  redirects: HashMap<NodeId, NodeId>,
}

impl GuidMap {
  pub fn new() -> Self {
    Self::default()
  }

  /// Registers a node. A duplicate keeps the newest slot and returns the replaced one.
  pub fn register_node(&mut self, id: NodeId, index: NodeIndex) -> Option<NodeIndex> {
    let previous = self.nodes.insert(id, index);
    if let Some(previous) = previous {
      warn!(guid = %id, ?previous, ?index, "duplicate guid registered in instance");
    }
    previous
  }

  /// Slot for `id` after redirect resolution.
  pub fn lookup(&self, id: NodeId) -> Option<NodeIndex> {
    self.nodes.get(&self.resolve(id)).copied()
  }

  /// Slot registered under exactly `id`, without redirects.
  pub fn lookup_exact(&self, id: NodeId) -> Option<NodeIndex> {
    self.nodes.get(&id).copied()
  }

  /// Maps `old` to `new`. Chains are not followed; `new` should be a live guid.
  pub fn register_redirect(&mut self, old: NodeId, new: NodeId) {
    self.redirects.insert(old, new);
  }

  /// Replaces the whole redirect map.
  pub fn set_redirects(&mut self, redirects: HashMap<NodeId, NodeId>) {
    self.redirects = redirects;
  }

  pub fn redirects(&self) -> &HashMap<NodeId, NodeId> {
    &self.redirects
  }

  /// Follows at most one redirect.
  pub fn resolve(&self, id: NodeId) -> NodeId {
    self.redirects.get(&id).copied().unwrap_or(id)
  }

  pub fn contains(&self, id: NodeId) -> bool {
    self.nodes.contains_key(&self.resolve(id))
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  /// Forgets registered nodes; redirects survive.
  pub fn clear_nodes(&mut self) {
    self.nodes.clear();
  }
}
