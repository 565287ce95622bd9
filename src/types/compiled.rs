//! Compiled node contract: the plain records a compiled state machine class is made of.
//!
//! These are produced by the graph compiler (or [crate::MachineBuilder]) and are immutable
//! once registered. Transition endpoints, entry states and link targets are scoped to the
//! state machine that declares them.

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use super::NodeId;
use crate::guid_path::PathGuidCache;

fn default_true() -> bool {
  true
}

/// How the primary condition of a transition or conduit is decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionMode {
  /// Always passes; no behavior is consulted.
  AlwaysTrue,
  /// Never passes. A state whose candidates are all `AlwaysFalse` is an end state.
  AlwaysFalse,
  /// Asks the node behavior (`can_enter_transition`). A missing behavior fails.
  #[default]
  Behavior,
}

/// Operator joining a transition stack entry to the running result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BooleanMode {
  #[default]
  And,
  Or,
}

/// One extra condition layered on a transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionStackEntry {
  /// Behavior factory name of the condition object.
  pub behavior: String,
  #[serde(default)]
  pub mode: BooleanMode,
  #[serde(default)]
  pub negate: bool,
}

/// A compiled transition between two states of the same machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledTransition {
  pub id: NodeId,
  #[serde(default)]
  pub name: String,
  pub from: NodeId,
  pub to: NodeId,
  /// Lower evaluates first; ties keep declaration order.
  #[serde(default)]
  pub priority: i32,
  /// Taking this transition keeps the source state active.
  #[serde(default)]
  pub run_parallel: bool,
  /// Whether the transition may be taken when its destination is already active.
  #[serde(default = "default_true")]
  pub eval_if_next_state_active: bool,
  /// Whether the transition may be taken in the pass its source state started.
  #[serde(default = "default_true")]
  pub can_eval_with_start_state: bool,
  #[serde(default = "default_true")]
  pub can_evaluate: bool,
  #[serde(default)]
  pub condition: ConditionMode,
  #[serde(default)]
  pub negate_primary_condition: bool,
  /// Behavior factory name for the primary condition and transition hooks.
  #[serde(default)]
  pub behavior: Option<String>,
  #[serde(default)]
  pub stack: Vec<TransitionStackEntry>,
}

impl CompiledTransition {
  /// An always-true transition with default flags.
  pub fn new(from: NodeId, to: NodeId) -> Self {
    Self {
      id: NodeId::new(),
      name: String::new(),
      from,
      to,
      priority: 0,
      run_parallel: false,
      eval_if_next_state_active: true,
      can_eval_with_start_state: true,
      can_evaluate: true,
      condition: ConditionMode::AlwaysTrue,
      negate_primary_condition: false,
      behavior: None,
      stack: Vec::new(),
    }
  }
}

/// Reference to another compiled class, instantiated as a child instance.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CompiledReference {
  /// Statically assigned class name.
  #[serde(default)]
  pub class: Option<String>,
  /// Context variable holding the class name, read when the instance is built.
  #[serde(default)]
  pub dynamic_class_variable: Option<String>,
  #[serde(default)]
  pub wait_for_end_state: bool,
  #[serde(default)]
  pub reuse_current_state: bool,
  #[serde(default)]
  pub only_reuse_if_not_end_state: bool,
  #[serde(default = "default_true")]
  pub share_context: bool,
  /// Compiler wiring only; carried and ignored at runtime.
  #[serde(default)]
  pub use_intermediate_graph: bool,
}

/// Body of a state machine: its children, transitions and entry points.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CompiledStateMachine {
  #[serde(default)]
  pub states: Vec<CompiledState>,
  #[serde(default)]
  pub transitions: Vec<CompiledTransition>,
  #[serde(default)]
  pub entry_states: Vec<NodeId>,
  #[serde(default)]
  pub allow_parallel_entry_states: bool,
  #[serde(default)]
  pub wait_for_end_state: bool,
  #[serde(default)]
  pub reuse_current_state: bool,
  #[serde(default)]
  pub only_reuse_if_not_end_state: bool,
}

/// Kind-specific part of a compiled state.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CompiledStateKind {
  #[default]
  State,
  Conduit {
    /// Resolve inline as part of a transition chain instead of becoming active.
    #[serde(default)]
    eval_with_transitions: bool,
    #[serde(default = "default_true")]
    can_evaluate: bool,
    #[serde(default)]
    condition: ConditionMode,
  },
  StateMachine(CompiledStateMachine),
  Reference(CompiledReference),
  LinkState {
    #[serde(default)]
    linked_state: Option<NodeId>,
  },
  AnyState {
    #[serde(default)]
    allow_initial_reentry: bool,
  },
}

/// A compiled state-like node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledState {
  pub id: NodeId,
  pub name: String,
  /// Behavior factory name.
  #[serde(default)]
  pub behavior: Option<String>,
  /// Stacked behavior factory names, run after the main behavior.
  #[serde(default)]
  pub stack: Vec<String>,
  #[serde(default)]
  pub always_update: bool,
  #[serde(default)]
  pub exclude_from_any_state: bool,
  /// Evaluate outgoing transitions in the same pass the state starts.
  #[serde(default)]
  pub eval_transitions_on_start: bool,
  #[serde(default)]
  pub allow_parallel_reentry: bool,
  #[serde(default)]
  pub kind: CompiledStateKind,
}

impl CompiledState {
  /// A plain state with default flags.
  pub fn new(name: impl Into<String>, kind: CompiledStateKind) -> Self {
    Self {
      id: NodeId::new(),
      name: name.into(),
      behavior: None,
      stack: Vec::new(),
      always_update: false,
      exclude_from_any_state: false,
      eval_transitions_on_start: false,
      allow_parallel_reentry: false,
      kind,
    }
  }

  /// Nested body if this is a (non-reference) state machine.
  pub fn machine(&self) -> Option<&CompiledStateMachine> {
    match &self.kind {
      CompiledStateKind::StateMachine(m) => Some(m),
      _ => None,
    }
  }

  pub fn machine_mut(&mut self) -> Option<&mut CompiledStateMachine> {
    match &mut self.kind {
      CompiledStateKind::StateMachine(m) => Some(m),
      _ => None,
    }
  }
}

/// A compiled state machine class: the unit instances are created from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateMachineClass {
  pub name: String,
  /// Guid of the root state machine node.
  pub root_id: NodeId,
  #[serde(default)]
  pub root_behavior: Option<String>,
  pub machine: CompiledStateMachine,
  /// Path guids of every node reachable from this class as a root instance.
  #[serde(skip)]
  pub(crate) path_guid_cache: OnceCell<PathGuidCache>,
}

impl StateMachineClass {
  pub fn new(name: impl Into<String>, machine: CompiledStateMachine) -> Self {
    Self {
      name: name.into(),
      root_id: NodeId::new(),
      root_behavior: None,
      machine,
      path_guid_cache: OnceCell::new(),
    }
  }

  /// Parses a class from its JSON form.
  pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
    serde_json::from_str(json)
  }

  /// Whether the path guid cache has been populated.
  pub fn has_path_guid_cache(&self) -> bool {
    self.path_guid_cache.get().is_some()
  }

  /// Visits every machine body depth-first, root first, with the id of its owning node.
  pub fn for_each_machine<'a>(&'a self, f: &mut dyn FnMut(NodeId, &'a CompiledStateMachine)) {
    fn walk<'a>(
      id: NodeId,
      machine: &'a CompiledStateMachine,
      f: &mut dyn FnMut(NodeId, &'a CompiledStateMachine),
    ) {
      f(id, machine);
      for state in &machine.states {
        if let Some(nested) = state.machine() {
          walk(state.id, nested, f);
        }
      }
    }
    walk(self.root_id, &self.machine, f);
  }

  /// Names of every class referenced statically from this class.
  pub fn referenced_class_names(&self) -> Vec<String> {
    let mut names = Vec::new();
    self.for_each_machine(&mut |_, machine| {
      for state in &machine.states {
        if let CompiledStateKind::Reference(r) = &state.kind
          && let Some(class) = &r.class
          && !names.contains(class)
        {
          names.push(class.clone());
        }
      }
    });
    names
  }
}

impl PartialEq for StateMachineClass {
  fn eq(&self, other: &Self) -> bool {
    self.name == other.name
      && self.root_id == other.root_id
      && self.root_behavior == other.root_behavior
      && self.machine == other.machine
  }
}
