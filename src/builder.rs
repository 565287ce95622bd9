//! Programmatic construction of compiled classes.
//!
//! Produces the same records a graph compiler would emit, with fresh guids for every node.

use tracing::instrument;

use crate::types::{
  BooleanMode, CompiledReference, CompiledState, CompiledStateKind, CompiledStateMachine,
  CompiledTransition, ConditionMode, NodeId, StateMachineClass, TransitionStackEntry,
};

/// Builds one state machine body; nest builders for nested machines.
#[derive(Debug, Clone, Default)]
pub struct MachineBuilder {
  name: String,
  root_behavior: Option<String>,
  machine: CompiledStateMachine,
}

impl MachineBuilder {
  /// `name` becomes the class name, or the state name when nested.
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      ..Self::default()
    }
  }

  pub fn add_state(&mut self, state: CompiledState) -> NodeId {
    let id = state.id;
    self.machine.states.push(state);
    id
  }

  /// Plain state without a behavior.
  pub fn state(&mut self, name: &str) -> NodeId {
    self.add_state(CompiledState::new(name, CompiledStateKind::State))
  }

  /// Plain state whose hooks run the behavior `behavior`.
  pub fn state_with_behavior(&mut self, name: &str, behavior: &str) -> NodeId {
    let mut state = CompiledState::new(name, CompiledStateKind::State);
    state.behavior = Some(behavior.to_string());
    self.add_state(state)
  }

  /// Conduit gated by the behavior `condition`, or always open when `None`.
  pub fn conduit(
    &mut self,
    name: &str,
    eval_with_transitions: bool,
    condition: Option<&str>,
  ) -> NodeId {
    let mut state = CompiledState::new(
      name,
      CompiledStateKind::Conduit {
        eval_with_transitions,
        can_evaluate: true,
        condition: if condition.is_some() {
          ConditionMode::Behavior
        } else {
          ConditionMode::AlwaysTrue
        },
      },
    );
    state.behavior = condition.map(str::to_string);
    self.add_state(state)
  }

  pub fn link_state(&mut self, name: &str, target: NodeId) -> NodeId {
    self.add_state(CompiledState::new(
      name,
      CompiledStateKind::LinkState {
        linked_state: Some(target),
      },
    ))
  }

  pub fn any_state(&mut self, name: &str, allow_initial_reentry: bool) -> NodeId {
    self.add_state(CompiledState::new(
      name,
      CompiledStateKind::AnyState {
        allow_initial_reentry,
      },
    ))
  }

  /// Nested state machine whose body is `body`, named after it.
  pub fn nested(&mut self, mut body: MachineBuilder) -> NodeId {
    body.default_entry();
    let mut state = CompiledState::new(body.name, CompiledStateKind::StateMachine(body.machine));
    state.behavior = body.root_behavior;
    self.add_state(state)
  }

  /// Reference to the registered class `class`.
  pub fn reference(&mut self, name: &str, class: &str) -> NodeId {
    self.add_reference(
      name,
      CompiledReference {
        class: Some(class.to_string()),
        share_context: true,
        ..CompiledReference::default()
      },
    )
  }

  pub fn add_reference(&mut self, name: &str, reference: CompiledReference) -> NodeId {
    self.add_state(CompiledState::new(name, CompiledStateKind::Reference(reference)))
  }

  /// Always-true transition. Returned for further flag changes.
  pub fn transition(&mut self, from: NodeId, to: NodeId) -> &mut CompiledTransition {
    self.machine.transitions.push(CompiledTransition::new(from, to));
    let last = self.machine.transitions.len() - 1;
    &mut self.machine.transitions[last]
  }

  /// Transition whose primary condition is the behavior `behavior`.
  pub fn conditional_transition(
    &mut self,
    from: NodeId,
    to: NodeId,
    behavior: &str,
  ) -> &mut CompiledTransition {
    let t = self.transition(from, to);
    t.condition = ConditionMode::Behavior;
    t.behavior = Some(behavior.to_string());
    t
  }

  /// Transition that never passes; its source counts as an end state.
  pub fn blocked_transition(&mut self, from: NodeId, to: NodeId) -> &mut CompiledTransition {
    let t = self.transition(from, to);
    t.condition = ConditionMode::AlwaysFalse;
    t
  }

  pub fn entry(&mut self, id: NodeId) -> &mut Self {
    if !self.machine.entry_states.contains(&id) {
      self.machine.entry_states.push(id);
    }
    self
  }

  pub fn root_behavior(&mut self, behavior: &str) -> &mut Self {
    self.root_behavior = Some(behavior.to_string());
    self
  }

  pub fn state_mut(&mut self, id: NodeId) -> Option<&mut CompiledState> {
    self.machine.states.iter_mut().find(|s| s.id == id)
  }

  pub fn machine_mut(&mut self) -> &mut CompiledStateMachine {
    &mut self.machine
  }

  /// The first declared state becomes the entry when none was chosen.
  fn default_entry(&mut self) {
    if !self.machine.entry_states.is_empty() {
      return;
    }
    let first = self.machine.states.iter().find(|s| {
      !matches!(
        s.kind,
        CompiledStateKind::AnyState { .. } | CompiledStateKind::LinkState { .. }
      )
    });
    if let Some(first) = first {
      self.machine.entry_states.push(first.id);
    }
  }

  /// The class; the first declared state becomes the entry when none was chosen.
  #[instrument(level = "trace", skip(self), fields(class = %self.name))]
  pub fn build(mut self) -> StateMachineClass {
    self.default_entry();
    let mut class = StateMachineClass::new(self.name, self.machine);
    class.root_behavior = self.root_behavior;
    class
  }
}

/// Stack entry for `behavior`, joined with `mode`.
pub fn stack_entry(behavior: &str, mode: BooleanMode, negate: bool) -> TransitionStackEntry {
  TransitionStackEntry {
    behavior: behavior.to_string(),
    mode,
    negate,
  }
}
