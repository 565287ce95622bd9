//! Compiled classes and behavior factories, looked up by name when instances are built.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{instrument, warn};

use crate::behavior::{BehaviorFactory, ContextFlagCondition, NodeBehavior, TimeInStateCondition};
use crate::types::StateMachineClass;
use crate::validate::{ValidationWarning, validate_class};

const CONTEXT_FLAG_PREFIX: &str = "context_flag:";
const TIME_IN_STATE_PREFIX: &str = "time_in_state:";

/// Everything an instance needs to resolve class and behavior names.
#[derive(Default)]
pub struct ClassRegistry {
  classes: HashMap<String, Arc<StateMachineClass>>,
  behaviors: HashMap<String, BehaviorFactory>,
  builtins: bool,
}

impl std::fmt::Debug for ClassRegistry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ClassRegistry")
      .field("classes", &self.classes.keys().collect::<Vec<_>>())
      .field("behaviors", &self.behaviors.keys().collect::<Vec<_>>())
      .field("builtins", &self.builtins)
      .finish()
  }
}

impl ClassRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Registry that also resolves `context_flag:<key>` and `time_in_state:<seconds>`.
  pub fn with_builtin_behaviors() -> Self {
    Self {
      builtins: true,
      ..Self::default()
    }
  }

  /// Validates `class`, repairing duplicate guids, and stores it under its name.
  #[instrument(level = "trace", skip(self, class), fields(class = %class.name))]
  pub fn register_class(&mut self, mut class: StateMachineClass) -> Vec<ValidationWarning> {
    let warnings = validate_class(&mut class);
    self.classes.insert(class.name.clone(), Arc::new(class));
    warnings
  }

  pub fn register_behavior<F>(&mut self, name: impl Into<String>, factory: F)
  where
    F: Fn() -> Box<dyn NodeBehavior> + Send + Sync + 'static,
  {
    self.behaviors.insert(name.into(), Arc::new(factory));
  }

  pub fn class(&self, name: &str) -> Option<Arc<StateMachineClass>> {
    self.classes.get(name).cloned()
  }

  pub fn class_names(&self) -> Vec<&str> {
    let mut names: Vec<&str> = self.classes.keys().map(String::as_str).collect();
    names.sort_unstable();
    names
  }

  pub fn has_behavior(&self, name: &str) -> bool {
    self.behaviors.contains_key(name) || self.builtin(name).is_some()
  }

  /// New behavior object for `name`, or `None` (logged) if nothing is registered.
  pub fn create_behavior(&self, name: &str) -> Option<Box<dyn NodeBehavior>> {
    if let Some(factory) = self.behaviors.get(name) {
      return Some(factory());
    }
    let builtin = self.builtin(name);
    if builtin.is_none() {
      warn!(behavior = %name, "no behavior registered, node runs without one");
    }
    builtin
  }

  fn builtin(&self, name: &str) -> Option<Box<dyn NodeBehavior>> {
    if !self.builtins {
      return None;
    }
    if let Some(key) = name.strip_prefix(CONTEXT_FLAG_PREFIX) {
      return Some(Box::new(ContextFlagCondition::new(key)));
    }
    let seconds = name.strip_prefix(TIME_IN_STATE_PREFIX)?.parse::<f32>().ok()?;
    Some(Box::new(TimeInStateCondition::new(seconds)))
  }
}
