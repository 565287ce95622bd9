//! Owning context of an instance: a string key-value map shared with behaviors.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::RunContext;

/// Handle to a [RunContext]. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct SharedContext(Arc<RwLock<RunContext>>);

impl SharedContext {
  pub fn new(context: RunContext) -> Self {
    Self(Arc::new(RwLock::new(context)))
  }

  fn read(&self) -> RwLockReadGuard<'_, RunContext> {
    self.0.read().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  fn write(&self) -> RwLockWriteGuard<'_, RunContext> {
    self.0.write().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  pub fn get(&self, key: &str) -> Option<String> {
    self.read().get(key).cloned()
  }

  pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
    self.write().insert(key.into(), value.into());
  }

  pub fn remove(&self, key: &str) -> Option<String> {
    self.write().remove(key)
  }

  /// True when `key` holds `"true"` or `"1"`.
  pub fn flag(&self, key: &str) -> bool {
    matches!(self.read().get(key).map(String::as_str), Some("true" | "1"))
  }

  /// Copy of the current map.
  pub fn snapshot(&self) -> RunContext {
    self.read().clone()
  }

  /// A new, unshared context holding a copy of this one.
  pub fn detached(&self) -> Self {
    Self::new(self.snapshot())
  }

  pub fn shares_with(&self, other: &SharedContext) -> bool {
    Arc::ptr_eq(&self.0, &other.0)
  }
}

impl From<RunContext> for SharedContext {
  fn from(context: RunContext) -> Self {
    Self::new(context)
  }
}
