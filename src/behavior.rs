//! Capability interface for user-defined node behavior.
//!
//! Compiled nodes name a behavior; the [crate::ClassRegistry] creates one object per node per
//! instance. Every callback has a no-op default so a behavior only implements what it uses.

use std::sync::Arc;

use crate::types::{NodeId, SharedContext};

/// What a behavior callback can see about the node it is attached to.
#[derive(Debug, Clone, Copy)]
pub struct HookContext<'a> {
  /// Path guid of the node.
  pub node_id: NodeId,
  pub node_name: &'a str,
  /// Time the node (for transitions: the source state) has been active, in seconds.
  pub time_in_state: f32,
  pub context: &'a SharedContext,
}

/// Behavior attached to a state, conduit, transition or state machine.
pub trait NodeBehavior: Send {
  /// The owning state started and the node was prepared for the run.
  fn on_initialized(&mut self, _ctx: &HookContext<'_>) {}

  /// The owning state ended; undo `on_initialized`.
  fn on_shutdown(&mut self, _ctx: &HookContext<'_>) {}

  fn on_enter(&mut self, _ctx: &HookContext<'_>) {}

  fn on_update(&mut self, _ctx: &HookContext<'_>, _delta_seconds: f32) {}

  fn on_exit(&mut self, _ctx: &HookContext<'_>) {}

  /// Primary condition of a transition or conduit.
  fn can_enter_transition(&mut self, _ctx: &HookContext<'_>) -> bool {
    false
  }

  fn on_pre_evaluate(&mut self, _ctx: &HookContext<'_>) {}

  fn on_post_evaluate(&mut self, _ctx: &HookContext<'_>) {}

  /// The transition was taken as part of a chain.
  fn on_transition_entered(&mut self, _ctx: &HookContext<'_>) {}

  /// A state machine landed in its end state.
  fn on_end_state_reached(&mut self, _ctx: &HookContext<'_>) {}
}

/// Creates a fresh behavior object for one node of one instance.
pub type BehaviorFactory = Arc<dyn Fn() -> Box<dyn NodeBehavior> + Send + Sync>;

/// A behavior whose condition is a context flag. Registered as `context_flag:<key>`
/// by [crate::ClassRegistry::with_builtin_behaviors].
#[derive(Debug, Clone)]
pub struct ContextFlagCondition {
  key: String,
}

impl ContextFlagCondition {
  pub fn new(key: impl Into<String>) -> Self {
    Self { key: key.into() }
  }
}

impl NodeBehavior for ContextFlagCondition {
  fn can_enter_transition(&mut self, ctx: &HookContext<'_>) -> bool {
    ctx.context.flag(&self.key)
  }
}

/// A condition that passes once its source state has been active for `seconds`.
#[derive(Debug, Clone)]
pub struct TimeInStateCondition {
  seconds: f32,
}

impl TimeInStateCondition {
  pub fn new(seconds: f32) -> Self {
    Self { seconds }
  }
}

impl NodeBehavior for TimeInStateCondition {
  fn can_enter_transition(&mut self, ctx: &HookContext<'_>) -> bool {
    ctx.time_in_state >= self.seconds
  }
}
