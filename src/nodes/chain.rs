//! Transition chain resolution: from an active state, through pass-through conduits and link
//! states, to the state that becomes active.

use super::graph::MachineGraph;
use super::runtime_node::{NodeIndex, NodeKind};

/// Transitions to take, in order, to move from `source` to `destination`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TransitionChain {
  pub source: NodeIndex,
  pub transitions: Vec<NodeIndex>,
  pub destination: NodeIndex,
}

impl MachineGraph {
  /// Outgoing transitions of `state` plus the any-state transitions of `machine` that apply
  /// to it, by ascending priority. Native transitions come first on ties.
  pub(crate) fn candidate_transitions(&self, machine: NodeIndex, state: NodeIndex) -> Vec<NodeIndex> {
    let node = &self.nodes[state.0];
    let Some(data) = node.state() else {
      return Vec::new();
    };
    let mut candidates = data.outgoing.clone();
    let takes_any_state =
      !data.exclude_from_any_state && !node.is_inline_conduit() && node.owner == Some(machine);
    if takes_any_state && let Some(m) = self.nodes[machine.0].machine() {
      for any in &m.any_states {
        let NodeKind::AnyState {
          allow_initial_reentry,
          transitions,
        } = &self.nodes[any.0].kind
        else {
          continue;
        };
        for &t in transitions {
          let Some(to) = self.nodes[t.0].transition().map(|d| d.to) else {
            continue;
          };
          let target = self.follow_link(to).unwrap_or(to);
          if target == state && !allow_initial_reentry {
            continue;
          }
          candidates.push(t);
        }
      }
      candidates.sort_by_key(|t| self.nodes[t.0].transition().map_or(0, |d| d.priority));
    }
    candidates
  }

  /// Chains that pass out of the active `state`. Stops at the first one unless its leading
  /// transition runs in parallel.
  pub(crate) fn resolve_transition_chains(
    &mut self,
    machine: NodeIndex,
    state: NodeIndex,
  ) -> Vec<TransitionChain> {
    let mut visited = Vec::new();
    self.collect_chains(machine, state, state, &mut visited)
  }

  fn collect_chains(
    &mut self,
    machine: NodeIndex,
    from: NodeIndex,
    source: NodeIndex,
    visited: &mut Vec<NodeIndex>,
  ) -> Vec<TransitionChain> {
    let is_conduit = self.nodes[from.0].conduit().is_some();
    if is_conduit {
      if visited.contains(&from) || !self.conduit_can_pass(from) {
        return Vec::new();
      }
      visited.push(from);
    }

    let mut chains = Vec::new();
    for t in self.candidate_transitions(machine, from) {
      if let Some(chain) = self.resolve_through(machine, t, source, visited) {
        let parallel = self.nodes[t.0].transition().is_some_and(|d| d.run_parallel);
        chains.push(chain);
        if is_conduit || !parallel {
          break;
        }
      }
    }

    if is_conduit {
      visited.pop();
    }
    chains
  }

  fn resolve_through(
    &mut self,
    machine: NodeIndex,
    transition: NodeIndex,
    source: NodeIndex,
    visited: &mut Vec<NodeIndex>,
  ) -> Option<TransitionChain> {
    let to = self.nodes[transition.0].transition()?.to;
    let target = self.follow_link(to)?;
    if !self.evaluate_transition(transition, source).passed {
      return None;
    }
    let chain = if self.nodes[target.0].is_inline_conduit() {
      let rest = self
        .collect_chains(machine, target, source, visited)
        .into_iter()
        .next()?;
      let mut transitions = vec![transition];
      transitions.extend(rest.transitions);
      TransitionChain {
        source,
        transitions,
        destination: rest.destination,
      }
    } else {
      TransitionChain {
        source,
        transitions: vec![transition],
        destination: target,
      }
    };
    self.any_state_may_reach(transition, &chain).then_some(chain)
  }

  /// An any-state chain must not end on an excluded state, nor on its own source unless
  /// the any state allows initial reentry.
  fn any_state_may_reach(&self, transition: NodeIndex, chain: &TransitionChain) -> bool {
    let Some(data) = self.nodes[transition.0].transition() else {
      return false;
    };
    if !data.from_any_state {
      return true;
    }
    let destination = &self.nodes[chain.destination.0];
    if destination.state().is_some_and(|s| s.exclude_from_any_state) {
      return false;
    }
    let allow_initial_reentry = matches!(
      self.nodes[data.from.0].kind,
      NodeKind::AnyState {
        allow_initial_reentry: true,
        ..
      }
    );
    chain.destination != chain.source || allow_initial_reentry
  }
}
