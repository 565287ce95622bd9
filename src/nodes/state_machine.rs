//! Per-machine processing: the tick loop, taking transition chains, end-state detection
//! and active set bookkeeping.

use std::collections::{HashMap, HashSet};

use tracing::{debug, instrument, trace};

use super::chain::TransitionChain;
use super::graph::MachineGraph;
use super::runtime_node::{Hook, NodeIndex};
use crate::types::{NodeId, StateHistoryEntry, TransitionStepEntry};

impl MachineGraph {
  /// One pass over the active states of `machine`.
  ///
  /// The queue starts as a copy of the active set. Destinations of taken chains are queued
  /// right after the state that left, so they start in the same pass.
  #[instrument(level = "trace", skip(self))]
  pub(crate) fn process_states(&mut self, machine: NodeIndex, dt: f32, evaluate_only: bool) {
    let mut queue = self.active_states(machine);
    let mut serials: HashMap<NodeIndex, u64> =
      queue.iter().map(|&s| (s, self.serial(s))).collect();
    let mut processing: HashSet<NodeIndex> = HashSet::new();

    let mut i = 0;
    while i < queue.len() {
      let current = queue[i];
      i += 1;
      if serials.get(&current).is_some_and(|&s| s != self.serial(current)) {
        trace!(state = %self.nodes[current.0].name, "state changed since queued, skipped");
        continue;
      }
      if !self.has_active_state(machine, current) {
        continue;
      }
      let (just_started, can_check) = self.try_start_state(machine, current);
      if !can_check || processing.contains(&current) {
        continue;
      }

      if self.can_check_transitions(current) {
        let mut insert_at = i;
        let mut took = false;
        for chain in self.resolve_transition_chains(machine, current) {
          let destination = chain.destination;
          if self.try_take_transition_chain(machine, &chain, dt, just_started) {
            took = true;
            processing.insert(current);
            queue.insert(insert_at, destination);
            insert_at += 1;
            serials.insert(destination, self.serial(destination));
          }
        }
        if took && !self.is_active(current) {
          continue;
        }
      }

      if !just_started && self.is_active(current) {
        processing.insert(current);
        if evaluate_only {
          self.evaluate_nested(current);
        } else {
          self.update_state(current, dt);
        }
      }
    }
  }

  /// Enters a queued state if it is not active yet.
  ///
  /// Returns `(just_started, can_check_transitions)`.
  fn try_start_state(&mut self, machine: NodeIndex, state: NodeIndex) -> (bool, bool) {
    let Some(data) = self.nodes[state.0].state() else {
      return (false, false);
    };
    if data.is_ending {
      return (false, false);
    }
    if !data.active {
      let started = self.start_state(state);
      let can_check = started
        && self.is_active(state)
        && self.has_active_state(machine, state)
        && self.nodes[state.0]
          .state()
          .is_some_and(|s| s.eval_transitions_on_start);
      return (started, can_check);
    }
    if data.reentered {
      let (allow, eval_on_start) = (data.allow_parallel_reentry, data.eval_transitions_on_start);
      let started = allow && self.start_state(state);
      if let Some(s) = self.nodes[state.0].state_mut() {
        s.reentered = false;
      }
      return (started, started && eval_on_start);
    }
    (false, true)
  }

  /// A nested machine waiting for its end state holds its transitions until it gets there.
  fn can_check_transitions(&self, state: NodeIndex) -> bool {
    match self.nodes[state.0].machine() {
      Some(m) if m.wait_for_end_state => self.machine_in_end_state(state),
      _ => true,
    }
  }

  fn evaluate_nested(&mut self, state: NodeIndex) {
    if let Some(instance) = self.nodes[state.0].referenced_instance_mut() {
      instance.evaluate_transitions();
    } else if self.nodes[state.0].machine().is_some() && self.nodes[state.0].reference().is_none() {
      self.process_states(state, 0.0, true);
    }
  }

  /// Takes one resolved chain: ends the source unless a transition runs in parallel, fires
  /// the transitions and moves the active set to the destination.
  fn try_take_transition_chain(
    &mut self,
    machine: NodeIndex,
    chain: &TransitionChain,
    dt: f32,
    just_started: bool,
  ) -> bool {
    let flags: Vec<_> = chain
      .transitions
      .iter()
      .filter_map(|t| self.nodes[t.0].transition())
      .map(|t| (t.can_eval_with_start_state, t.eval_if_next_state_active, t.run_parallel))
      .collect();
    if just_started && flags.iter().any(|f| !f.0) {
      return false;
    }
    let (source, destination) = (chain.source, chain.destination);
    if destination != source && self.is_active(destination) && !flags.iter().any(|f| f.1) {
      return false;
    }

    let stay_active = flags.iter().any(|f| f.2);
    if !stay_active {
      self.end_state(source, dt);
    }
    let time = self.nodes[source.0].state().map_or(0.0, |s| s.time_in_state);
    for &t in &chain.transitions {
      self.fire(t, Hook::TransitionEntered, time);
    }
    debug!(
      from = %self.nodes[source.0].name,
      to = %self.nodes[destination.0].name,
      transitions = chain.transitions.len(),
      parallel = stay_active,
      "transition taken"
    );

    let leaving = (!stay_active).then_some(source);
    self.set_current_state(machine, Some(destination), leaving);
    self.record_step(chain);
    self.notify_end_state(machine);
    true
  }

  /// Moves the active set of `machine`: `from` leaves (and is written to history), `to`
  /// joins. A `to` that is already a member is marked re-entered.
  pub(crate) fn set_current_state(
    &mut self,
    machine: NodeIndex,
    to: Option<NodeIndex>,
    from: Option<NodeIndex>,
  ) {
    if let Some(from) = from {
      self.remove_active_state(machine, from);
    }
    let Some(to) = to else {
      return;
    };
    let already_member = self.has_active_state(machine, to);
    if already_member {
      if let Some(s) = self.nodes[to.0].state_mut() {
        s.reentered = true;
      }
    } else if let Some(m) = self.nodes[machine.0].machine_mut() {
      m.active_states.push(to);
    }
  }

  /// Drops `state` from the active set of `machine` and records it in the history.
  pub(crate) fn remove_active_state(&mut self, machine: NodeIndex, state: NodeIndex) {
    let removed = match self.nodes[machine.0].machine_mut() {
      Some(m) => {
        let before = m.active_states.len();
        m.active_states.retain(|&s| s != state);
        m.active_states.len() != before
      }
      None => false,
    };
    if !removed {
      return;
    }
    let node = &self.nodes[state.0];
    let Some((data, start_time)) = node.state().and_then(|d| Some((d, d.started_at?))) else {
      return;
    };
    let entry = StateHistoryEntry {
      guid: node.path_guid,
      name: node.name.clone(),
      start_time,
      time_in_state: data.time_in_state,
    };
    self.history.push(entry);
  }

  pub(crate) fn has_active_state(&self, machine: NodeIndex, state: NodeIndex) -> bool {
    self.nodes[machine.0]
      .machine()
      .is_some_and(|m| m.active_states.contains(&state))
  }

  /// Selects the initial states of a nested or root machine, runs its begin hooks and
  /// processes the new states.
  pub(crate) fn start_machine(&mut self, machine: NodeIndex) {
    let selection = self.nodes[machine.0].machine().map(|m| {
      if !m.temporary_entry_states.is_empty() {
        Some(m.temporary_entry_states.clone())
      } else if m.reuse_current_state && !m.active_states.is_empty() {
        None
      } else if m.allow_parallel_entry_states {
        Some(m.entry_states.clone())
      } else {
        Some(m.entry_states.first().copied().into_iter().collect())
      }
    });
    if let Some(Some(initial)) = selection {
      let previous = self.active_states(machine);
      for s in previous {
        self.remove_active_state(machine, s);
      }
      for s in initial {
        self.set_current_state(machine, Some(s), None);
      }
    }
    if let Some(m) = self.nodes[machine.0].machine_mut() {
      m.temporary_entry_states.clear();
    }

    self.fire_state(machine, Hook::Enter);
    self.process_states(machine, 0.0, false);
    self.notify_end_state(machine);
  }

  /// Ends every active state of `machine`, then clears the active set unless it may be
  /// reused on the next start.
  pub(crate) fn end_machine_children(&mut self, machine: NodeIndex, dt: f32) {
    let can_reuse = self.can_reuse(machine);
    let active = self.active_states(machine);
    for &s in &active {
      self.end_state(s, dt);
    }
    if !can_reuse {
      for s in active {
        self.remove_active_state(machine, s);
      }
    }
  }

  fn can_reuse(&self, machine: NodeIndex) -> bool {
    let Some(m) = self.nodes[machine.0].machine() else {
      return false;
    };
    m.reuse_current_state && !(m.only_reuse_if_not_end_state && self.is_in_end_state(machine))
  }

  /// True when no active state of `machine` can ever leave. Structural: no predicate runs.
  pub(crate) fn is_in_end_state(&self, machine: NodeIndex) -> bool {
    self.active_states(machine).iter().all(|&s| {
      self.is_end_state(machine, s)
        && match self.nodes[s.0].machine() {
          Some(m) if m.wait_for_end_state => self.machine_in_end_state(s),
          _ => true,
        }
    })
  }

  /// End state of a nested machine, or of a reference's child instance.
  pub(crate) fn machine_in_end_state(&self, state: NodeIndex) -> bool {
    let node = &self.nodes[state.0];
    if node.reference().is_some() {
      return node.referenced_instance().is_none_or(|i| i.is_in_end_state());
    }
    self.is_in_end_state(state)
  }

  /// A state whose every candidate transition is statically false.
  pub(crate) fn is_end_state(&self, machine: NodeIndex, state: NodeIndex) -> bool {
    self
      .candidate_transitions(machine, state)
      .iter()
      .all(|&t| self.is_statically_false(t))
  }

  fn notify_end_state(&mut self, machine: NodeIndex) {
    if self.is_active(machine) && self.is_in_end_state(machine) {
      trace!(machine = %self.nodes[machine.0].name, "end state reached");
      self.fire_state(machine, Hook::EndStateReached);
    }
  }

  fn record_step(&mut self, chain: &TransitionChain) {
    if self.log.is_none() {
      return;
    }
    let mut after = Vec::new();
    self.capture_leaves(&mut after);
    let transitions: Vec<NodeId> = chain
      .transitions
      .iter()
      .map(|t| self.nodes[t.0].path_guid)
      .collect();
    let source = &self.nodes[chain.source.0];
    let destination = &self.nodes[chain.destination.0];
    let entry = TransitionStepEntry {
      step: 0,
      source: source.path_guid,
      source_name: source.name.clone(),
      destination: destination.path_guid,
      destination_name: destination.name.clone(),
      transitions,
      active_states_after: after,
    };
    if let Some(log) = self.log.as_mut() {
      log.record(entry);
    }
  }

  /// Path guids of active leaves, depth first in activation order. Nested machines and
  /// references contribute their own leaves; an active composite with none is a leaf.
  pub(crate) fn capture_leaves(&self, out: &mut Vec<NodeId>) {
    if self.is_active(self.root) {
      self.capture_machine(self.root, out);
    }
  }

  fn capture_machine(&self, machine: NodeIndex, out: &mut Vec<NodeId>) {
    for s in self.active_states(machine) {
      let node = &self.nodes[s.0];
      let before = out.len();
      if let Some(instance) = node.referenced_instance() {
        instance.capture_into(out);
      } else if node.machine().is_some() && node.is_active() {
        self.capture_machine(s, out);
      }
      if out.len() == before {
        out.push(node.path_guid);
      }
    }
  }

  /// Path guids of every active node, composites included. The root of a referenced
  /// instance is left out; its reference node stands for it.
  pub(crate) fn collect_active(&self, include_root: bool, out: &mut Vec<NodeId>) {
    if self.is_active(self.root) {
      if include_root {
        out.push(self.nodes[self.root.0].path_guid);
      }
      self.collect_machine(self.root, out);
    }
  }

  fn collect_machine(&self, machine: NodeIndex, out: &mut Vec<NodeId>) {
    for s in self.active_states(machine) {
      let node = &self.nodes[s.0];
      if !node.is_active() {
        continue;
      }
      out.push(node.path_guid);
      if let Some(instance) = node.referenced_instance() {
        instance.collect_active_into(false, out);
      } else if node.machine().is_some() {
        self.collect_machine(s, out);
      }
    }
  }

  /// Marks `state` and every ancestor up to the root as temporary entry states.
  pub(crate) fn mark_temporary_entry(&mut self, state: NodeIndex) {
    let mut child = state;
    while let Some(owner) = self.owner(child) {
      if let Some(m) = self.nodes[owner.0].machine_mut()
        && !m.temporary_entry_states.contains(&child)
      {
        m.temporary_entry_states.push(child);
      }
      child = owner;
    }
  }

  /// Ends every active state except the ancestors of `keep`, deepest machines first.
  pub(crate) fn deactivate_all_except(&mut self, keep: &[NodeIndex]) {
    self.deactivate_machine_except(self.root, keep);
  }

  fn deactivate_machine_except(&mut self, machine: NodeIndex, keep: &[NodeIndex]) {
    for s in self.active_states(machine) {
      if keep.contains(&s) {
        if self.nodes[s.0].machine().is_some() && self.nodes[s.0].reference().is_none() {
          self.deactivate_machine_except(s, keep);
        }
        continue;
      }
      self.end_state(s, 0.0);
      self.remove_active_state(machine, s);
    }
  }

  /// Walks `segments` by state name from the root. Returns the chain of nodes from the root
  /// and how many segments it consumed; the walk stops early at a reference.
  pub(crate) fn resolve_name_chain(&self, segments: &[&str]) -> Option<(Vec<NodeIndex>, usize)> {
    let mut chain = vec![self.root];
    let mut machine = self.root;
    for (i, segment) in segments.iter().enumerate() {
      let child = self.nodes[machine.0]
        .machine()?
        .states
        .iter()
        .copied()
        .find(|s| self.nodes[s.0].name == *segment)?;
      chain.push(child);
      let node = &self.nodes[child.0];
      if i + 1 == segments.len() {
        break;
      }
      if node.reference().is_some() {
        return Some((chain, i + 1));
      }
      node.machine()?;
      machine = child;
    }
    Some((chain, segments.len()))
  }

  /// Makes the last node of `chain` active. Inactive machines along the chain receive the
  /// rest of the chain as temporary entry states, and the highest inactive one is entered.
  /// Nothing starts while the root is inactive; the entries apply on the next start.
  pub(crate) fn activate_chain(&mut self, chain: &[NodeIndex], deactivate_others: bool) {
    if deactivate_others && self.is_active(self.root) {
      self.deactivate_all_except(chain);
    }
    let Some(pos) = chain.iter().position(|&n| !self.is_active(n)) else {
      return;
    };
    for pair in chain[pos..].windows(2) {
      if let Some(m) = self.nodes[pair[0].0].machine_mut()
        && !m.temporary_entry_states.contains(&pair[1])
      {
        m.temporary_entry_states.push(pair[1]);
      }
    }
    if pos == 0 {
      return;
    }
    let (owner, highest) = (chain[pos - 1], chain[pos]);
    debug!(state = %self.nodes[highest.0].name, "switching active state");
    self.set_current_state(owner, Some(highest), None);
    self.start_state(highest);
  }
}
