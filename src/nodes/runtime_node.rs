//! Runtime node records stored in an instance's arena.
//!
//! Owner and transition links are arena indices, never owning pointers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::behavior::{HookContext, NodeBehavior};
use crate::instance::Instance;
use crate::types::{BooleanMode, ConditionMode, NodeId};

/// Slot of a node in its instance's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIndex(pub(crate) usize);

/// Public tag of a runtime node's kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKindTag {
  State,
  Conduit,
  StateMachine,
  Reference,
  LinkState,
  AnyState,
  Transition,
}

/// Activation bookkeeping shared by states, conduits and state machines.
#[derive(Debug, Default)]
pub(crate) struct StateData {
  pub active: bool,
  pub time_in_state: f32,
  pub has_updated: bool,
  pub is_ending: bool,
  /// Re-targeted by a parallel transition while already active.
  pub reentered: bool,
  /// Bumped on every start and end.
  pub serial: u64,
  pub started_at: Option<DateTime<Utc>>,
  /// Sorted by priority, then declaration order.
  pub outgoing: Vec<NodeIndex>,
  pub incoming: Vec<NodeIndex>,
  pub always_update: bool,
  pub exclude_from_any_state: bool,
  pub eval_transitions_on_start: bool,
  pub allow_parallel_reentry: bool,
}

#[derive(Debug)]
pub(crate) struct ConduitData {
  pub eval_with_transitions: bool,
  pub can_evaluate: bool,
  pub condition: ConditionMode,
}

/// Child instance owned by a reference node.
#[derive(Debug, Default)]
pub(crate) struct ReferenceData {
  pub class_name: Option<String>,
  pub dynamic: bool,
  pub instance: Option<Box<Instance>>,
}

#[derive(Debug, Default)]
pub(crate) struct MachineData {
  /// States, conduits and nested machines in declaration order.
  pub states: Vec<NodeIndex>,
  pub links: Vec<NodeIndex>,
  pub any_states: Vec<NodeIndex>,
  pub transitions: Vec<NodeIndex>,
  pub entry_states: Vec<NodeIndex>,
  /// Restore and switch overrides; replace `entry_states` on the next start.
  pub temporary_entry_states: Vec<NodeIndex>,
  pub active_states: Vec<NodeIndex>,
  pub allow_parallel_entry_states: bool,
  pub wait_for_end_state: bool,
  pub reuse_current_state: bool,
  pub only_reuse_if_not_end_state: bool,
  pub reference: Option<ReferenceData>,
}

#[derive(Debug)]
pub(crate) struct TransitionData {
  pub from: NodeIndex,
  pub to: NodeIndex,
  pub priority: i32,
  pub run_parallel: bool,
  pub eval_if_next_state_active: bool,
  pub can_eval_with_start_state: bool,
  pub can_evaluate: bool,
  pub condition: ConditionMode,
  pub negate_primary: bool,
  /// Operator and negation of each stack entry, aligned with the node's stack behaviors.
  pub stack: Vec<(BooleanMode, bool)>,
  pub from_any_state: bool,
  pub from_link_state: bool,
}

#[derive(Debug)]
pub(crate) enum NodeKind {
  State(StateData),
  Conduit(StateData, ConduitData),
  StateMachine(StateData, Box<MachineData>),
  LinkState {
    target: Option<NodeIndex>,
  },
  AnyState {
    allow_initial_reentry: bool,
    transitions: Vec<NodeIndex>,
  },
  Transition(TransitionData),
}

pub(crate) struct RuntimeNode {
  pub node_id: NodeId,
  pub path_guid: NodeId,
  pub name: String,
  pub owner: Option<NodeIndex>,
  pub behavior: Option<Box<dyn NodeBehavior>>,
  /// Stacked behaviors; a `None` slot is a stack entry whose behavior was not found.
  pub stack: Vec<Option<Box<dyn NodeBehavior>>>,
  /// Prepared for the current run (`on_initialized` fired).
  pub initialized: bool,
  pub kind: NodeKind,
}

impl std::fmt::Debug for RuntimeNode {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("RuntimeNode")
      .field("name", &self.name)
      .field("node_id", &self.node_id)
      .field("path_guid", &self.path_guid)
      .field("owner", &self.owner)
      .field("has_behavior", &self.behavior.is_some())
      .field("kind", &self.kind)
      .finish()
  }
}

impl RuntimeNode {
  pub fn state(&self) -> Option<&StateData> {
    match &self.kind {
      NodeKind::State(s) | NodeKind::Conduit(s, _) | NodeKind::StateMachine(s, _) => Some(s),
      _ => None,
    }
  }

  pub fn state_mut(&mut self) -> Option<&mut StateData> {
    match &mut self.kind {
      NodeKind::State(s) | NodeKind::Conduit(s, _) | NodeKind::StateMachine(s, _) => Some(s),
      _ => None,
    }
  }

  pub fn machine(&self) -> Option<&MachineData> {
    match &self.kind {
      NodeKind::StateMachine(_, m) => Some(m),
      _ => None,
    }
  }

  pub fn machine_mut(&mut self) -> Option<&mut MachineData> {
    match &mut self.kind {
      NodeKind::StateMachine(_, m) => Some(m),
      _ => None,
    }
  }

  pub fn conduit(&self) -> Option<&ConduitData> {
    match &self.kind {
      NodeKind::Conduit(_, c) => Some(c),
      _ => None,
    }
  }

  pub fn transition(&self) -> Option<&TransitionData> {
    match &self.kind {
      NodeKind::Transition(t) => Some(t),
      _ => None,
    }
  }

  pub fn reference(&self) -> Option<&ReferenceData> {
    self.machine().and_then(|m| m.reference.as_ref())
  }

  pub fn reference_mut(&mut self) -> Option<&mut ReferenceData> {
    self.machine_mut().and_then(|m| m.reference.as_mut())
  }

  /// Child instance of a reference node, if it was built.
  pub fn referenced_instance(&self) -> Option<&Instance> {
    self.reference().and_then(|r| r.instance.as_deref())
  }

  pub fn referenced_instance_mut(&mut self) -> Option<&mut Instance> {
    self.reference_mut().and_then(|r| r.instance.as_deref_mut())
  }

  pub fn is_active(&self) -> bool {
    self.state().is_some_and(|s| s.active)
  }

  /// Pass-through conduit, resolved inline in chains.
  pub fn is_inline_conduit(&self) -> bool {
    self.conduit().is_some_and(|c| c.eval_with_transitions)
  }

  /// Can be placed in an active set.
  pub fn can_be_active(&self) -> bool {
    self.state().is_some() && !self.is_inline_conduit()
  }

  pub fn tag(&self) -> NodeKindTag {
    match &self.kind {
      NodeKind::State(_) => NodeKindTag::State,
      NodeKind::Conduit(..) => NodeKindTag::Conduit,
      NodeKind::StateMachine(_, m) if m.reference.is_some() => NodeKindTag::Reference,
      NodeKind::StateMachine(..) => NodeKindTag::StateMachine,
      NodeKind::LinkState { .. } => NodeKindTag::LinkState,
      NodeKind::AnyState { .. } => NodeKindTag::AnyState,
      NodeKind::Transition(_) => NodeKindTag::Transition,
    }
  }
}

/// Behavior callbacks dispatched to a node's behavior and then its stack, in order.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Hook {
  Initialized,
  Shutdown,
  Enter,
  Update(f32),
  Exit,
  PreEvaluate,
  PostEvaluate,
  TransitionEntered,
  EndStateReached,
}

impl Hook {
  pub fn call(self, behavior: &mut dyn NodeBehavior, ctx: &HookContext<'_>) {
    match self {
      Hook::Initialized => behavior.on_initialized(ctx),
      Hook::Shutdown => behavior.on_shutdown(ctx),
      Hook::Enter => behavior.on_enter(ctx),
      Hook::Update(dt) => behavior.on_update(ctx, dt),
      Hook::Exit => behavior.on_exit(ctx),
      Hook::PreEvaluate => behavior.on_pre_evaluate(ctx),
      Hook::PostEvaluate => behavior.on_post_evaluate(ctx),
      Hook::TransitionEntered => behavior.on_transition_entered(ctx),
      Hook::EndStateReached => behavior.on_end_state_reached(ctx),
    }
  }
}
