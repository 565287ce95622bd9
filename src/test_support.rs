//! Behaviors and helpers shared by unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::behavior::{HookContext, NodeBehavior};
use crate::registry::ClassRegistry;
use crate::types::{InstanceConfig, RunContext, StateMachineClass};
use crate::{Instance, NodeId};

/// Hook call counts keyed by `"<node name>:<hook>"`.
#[derive(Debug, Clone, Default)]
pub(crate) struct HookCounts(Arc<Mutex<HashMap<String, usize>>>);

impl HookCounts {
  pub fn get(&self, node: &str, hook: &str) -> usize {
    let counts = self.0.lock().unwrap();
    counts.get(&format!("{node}:{hook}")).copied().unwrap_or(0)
  }

  fn bump(&self, node: &str, hook: &str) {
    let mut counts = self.0.lock().unwrap();
    *counts.entry(format!("{node}:{hook}")).or_default() += 1;
  }
}

/// Counts every hook. As a condition it answers `pass`.
pub(crate) struct Recorder {
  counts: HookCounts,
  pass: bool,
}

impl NodeBehavior for Recorder {
  fn on_initialized(&mut self, ctx: &HookContext<'_>) {
    self.counts.bump(ctx.node_name, "initialized");
  }

  fn on_shutdown(&mut self, ctx: &HookContext<'_>) {
    self.counts.bump(ctx.node_name, "shutdown");
  }

  fn on_enter(&mut self, ctx: &HookContext<'_>) {
    self.counts.bump(ctx.node_name, "enter");
  }

  fn on_update(&mut self, ctx: &HookContext<'_>, _delta_seconds: f32) {
    self.counts.bump(ctx.node_name, "update");
  }

  fn on_exit(&mut self, ctx: &HookContext<'_>) {
    self.counts.bump(ctx.node_name, "exit");
  }

  fn can_enter_transition(&mut self, ctx: &HookContext<'_>) -> bool {
    self.counts.bump(ctx.node_name, "eval");
    self.pass
  }

  fn on_pre_evaluate(&mut self, ctx: &HookContext<'_>) {
    self.counts.bump(ctx.node_name, "pre");
  }

  fn on_post_evaluate(&mut self, ctx: &HookContext<'_>) {
    self.counts.bump(ctx.node_name, "post");
  }

  fn on_transition_entered(&mut self, ctx: &HookContext<'_>) {
    self.counts.bump(ctx.node_name, "entered");
  }

  fn on_end_state_reached(&mut self, ctx: &HookContext<'_>) {
    self.counts.bump(ctx.node_name, "end");
  }
}

/// Registry with builtins plus `record` (fails), `yes` and `no` recorders sharing `counts`.
pub(crate) fn registry(counts: &HookCounts, classes: Vec<StateMachineClass>) -> Arc<ClassRegistry> {
  let mut registry = ClassRegistry::with_builtin_behaviors();
  for (name, pass) in [("record", false), ("yes", true), ("no", false)] {
    let counts = counts.clone();
    registry.register_behavior(name, move || {
      Box::new(Recorder {
        counts: counts.clone(),
        pass,
      })
    });
  }
  for class in classes {
    registry.register_class(class);
  }
  Arc::new(registry)
}

/// Initialized and started instance of `class`.
pub(crate) fn started(registry: &Arc<ClassRegistry>, class: &str, config: InstanceConfig) -> Instance {
  let mut instance = Instance::new(class, Arc::clone(registry), config).unwrap();
  instance.initialize(RunContext::new()).unwrap();
  instance.start().unwrap();
  instance
}

/// Names of the active leaf states.
pub(crate) fn active_names(instance: &Instance) -> Vec<String> {
  instance
    .capture_active_set()
    .into_iter()
    .map(|guid| name_of(instance, guid))
    .collect()
}

pub(crate) fn name_of(instance: &Instance, guid: NodeId) -> String {
  instance
    .state_info(guid)
    .map(|info| info.name)
    .unwrap_or_default()
}
