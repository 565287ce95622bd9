//! Transition evaluation: the primary condition plus the transition stack.
//!
//! The stack folds left to right onto the primary result with no precedence. Every
//! predicate is called even once the result is decided; only the boolean short-circuits.

use serde::{Deserialize, Serialize};
use tracing::trace;

use super::graph::MachineGraph;
use super::runtime_node::{Hook, NodeIndex, NodeKind};
use crate::behavior::HookContext;
use crate::types::{BooleanMode, ConditionMode};

/// A condition that took part in an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvaluatedLeaf {
  Primary,
  /// Index into the transition stack.
  Stack(usize),
}

/// Outcome of evaluating one transition.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransitionEvaluation {
  pub passed: bool,
  /// Conditions whose predicates were called, in call order.
  pub consulted: Vec<EvaluatedLeaf>,
}

/// Folds stack entries `(mode, negate, value)` onto the primary result.
pub fn fold_transition_stack(
  primary: bool,
  negate_primary: bool,
  entries: &[(BooleanMode, bool, bool)],
) -> bool {
  let start = primary != negate_primary;
  entries
    .iter()
    .fold(start, |running, &(mode, negate, value)| {
      let value = value != negate;
      match mode {
        BooleanMode::And => running && value,
        BooleanMode::Or => running || value,
      }
    })
}

impl MachineGraph {
  /// Calls `can_enter_transition` on the node's behavior and every stacked behavior.
  /// A missing behavior counts as false.
  fn call_conditions(&mut self, idx: NodeIndex, time_in_state: f32) -> (bool, Vec<bool>) {
    let context = &self.context;
    let node = &mut self.nodes[idx.0];
    let ctx = HookContext {
      node_id: node.path_guid,
      node_name: &node.name,
      time_in_state,
      context,
    };
    let primary = node
      .behavior
      .as_mut()
      .is_some_and(|b| b.can_enter_transition(&ctx));
    let stack = node
      .stack
      .iter_mut()
      .map(|slot| slot.as_mut().is_some_and(|b| b.can_enter_transition(&ctx)))
      .collect();
    (primary, stack)
  }

  /// Time the state a transition is evaluated for has been active.
  fn source_time(&self, source: NodeIndex) -> f32 {
    self.nodes[source.0].state().map_or(0.0, |s| s.time_in_state)
  }

  /// Evaluates `transition` on behalf of the active state `source`. Never changes the active set.
  pub(crate) fn evaluate_transition(
    &mut self,
    transition: NodeIndex,
    source: NodeIndex,
  ) -> TransitionEvaluation {
    let Some(data) = self.nodes[transition.0].transition() else {
      return TransitionEvaluation::default();
    };
    let (to, run_parallel, eval_if_next_active, can_evaluate, condition, negate, modes) = (
      data.to,
      data.run_parallel,
      data.eval_if_next_state_active,
      data.can_evaluate,
      data.condition,
      data.negate_primary,
      data.stack.clone(),
    );
    let next = self.follow_link(to).unwrap_or(to);
    let next_state = self.nodes[next.0].state();
    if next_state.is_some_and(|s| s.reentered)
      || (run_parallel && !eval_if_next_active && next_state.is_some_and(|s| s.active))
    {
      return TransitionEvaluation::default();
    }

    let time = self.source_time(source);
    self.fire(transition, Hook::PreEvaluate, time);
    let evaluation = if !can_evaluate || condition == ConditionMode::AlwaysFalse {
      TransitionEvaluation::default()
    } else {
      let (called_primary, stack_values) = self.call_conditions(transition, time);
      let primary = match condition {
        ConditionMode::AlwaysTrue => true,
        _ => called_primary,
      };
      let entries: Vec<_> = modes
        .iter()
        .zip(stack_values)
        .map(|(&(mode, negate), value)| (mode, negate, value))
        .collect();
      let mut consulted = vec![EvaluatedLeaf::Primary];
      consulted.extend((0..entries.len()).map(EvaluatedLeaf::Stack));
      TransitionEvaluation {
        passed: fold_transition_stack(primary, negate, &entries),
        consulted,
      }
    };
    self.fire(transition, Hook::PostEvaluate, time);
    trace!(
      transition = %self.nodes[transition.0].path_guid,
      passed = evaluation.passed,
      "evaluated transition"
    );
    evaluation
  }

  /// Conduit gate: `can_evaluate && condition`.
  pub(crate) fn conduit_can_pass(&mut self, conduit: NodeIndex) -> bool {
    let Some(data) = self.nodes[conduit.0].conduit() else {
      return true;
    };
    if !data.can_evaluate {
      return false;
    }
    match data.condition {
      ConditionMode::AlwaysTrue => true,
      ConditionMode::AlwaysFalse => false,
      ConditionMode::Behavior => {
        let time = self.source_time(conduit);
        self.call_conditions(conduit, time).0
      }
    }
  }

  /// Whether a transition can never pass, judged from its flags alone.
  pub(crate) fn is_statically_false(&self, transition: NodeIndex) -> bool {
    match &self.nodes[transition.0].kind {
      NodeKind::Transition(t) => t.condition == ConditionMode::AlwaysFalse,
      _ => true,
    }
  }
}
