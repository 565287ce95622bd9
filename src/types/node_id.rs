//! Stable 128-bit node identifier.
//!
//! Every compiled node (state, conduit, transition, state machine) owns one. Path guids,
//! the persistent address of a node inside nested and referenced machines, share the type.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Guid of a compiled or runtime node. Serializes as hyphenated hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(Uuid);

impl NodeId {
  /// Generates a fresh random id.
  pub fn new() -> Self {
    Self(Uuid::new_v4())
  }

  /// The all-zero id, never assigned to a node.
  pub const fn nil() -> Self {
    Self(Uuid::nil())
  }

  /// Wraps an existing uuid.
  pub const fn from_uuid(uuid: Uuid) -> Self {
    Self(uuid)
  }

  /// Deterministic id for a `/`-joined guid path (name-based, MD5).
  pub fn from_path(path: &str) -> Self {
    Self(Uuid::new_v3(&Uuid::NAMESPACE_OID, path.as_bytes()))
  }

  /// Underlying uuid.
  pub fn as_uuid(&self) -> &Uuid {
    &self.0
  }

  /// False for the nil id.
  pub fn is_valid(&self) -> bool {
    !self.0.is_nil()
  }
}

impl fmt::Display for NodeId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0.hyphenated())
  }
}

impl fmt::Debug for NodeId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "NodeId({})", self.0.hyphenated())
  }
}

impl FromStr for NodeId {
  type Err = uuid::Error;

  /// Accepts hyphenated, simple, braced and urn forms.
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Uuid::parse_str(s.trim()).map(Self)
  }
}

impl From<Uuid> for NodeId {
  fn from(uuid: Uuid) -> Self {
    Self(uuid)
  }
}
