//! State lifecycle: start, update and end for states, stateful conduits, nested machines
//! and references.

use chrono::Utc;
use tracing::{debug, trace};

use super::graph::MachineGraph;
use super::runtime_node::{Hook, NodeIndex};

impl MachineGraph {
  /// The state plus every transition and pass-through conduit reachable from it before
  /// another state is reached. These are initialized and shut down with the state.
  fn run_scope(&self, state: NodeIndex) -> Vec<NodeIndex> {
    let mut scope = vec![state];
    let mut pending = match self.owner(state) {
      Some(machine) => self.candidate_transitions(machine, state),
      None => Vec::new(),
    };
    while let Some(t) = pending.pop() {
      if scope.contains(&t) {
        continue;
      }
      scope.push(t);
      let Some(to) = self.nodes[t.0].transition().and_then(|d| self.follow_link(d.to)) else {
        continue;
      };
      if self.nodes[to.0].is_inline_conduit() && !scope.contains(&to) {
        scope.push(to);
        if let Some(s) = self.nodes[to.0].state() {
          pending.extend(s.outgoing.iter().copied());
        }
      }
    }
    scope
  }

  fn initialize_for_run(&mut self, state: NodeIndex) {
    let time = self.nodes[state.0].state().map_or(0.0, |s| s.time_in_state);
    for idx in self.run_scope(state) {
      let node = &mut self.nodes[idx.0];
      if !node.initialized {
        node.initialized = true;
        self.fire(idx, Hook::Initialized, time);
      }
    }
  }

  fn shutdown_for_run(&mut self, state: NodeIndex) {
    let time = self.nodes[state.0].state().map_or(0.0, |s| s.time_in_state);
    for idx in self.run_scope(state) {
      let node = &mut self.nodes[idx.0];
      if node.initialized {
        node.initialized = false;
        self.fire(idx, Hook::Shutdown, time);
      }
    }
  }

  /// Activates a state and runs its begin hooks. A nested machine selects its initial states
  /// and processes them; a reference starts its child instance.
  pub(crate) fn start_state(&mut self, idx: NodeIndex) -> bool {
    let Some(s) = self.nodes[idx.0].state_mut() else {
      return false;
    };
    if s.active && !(s.reentered && s.allow_parallel_reentry) {
      return false;
    }
    s.active = true;
    s.time_in_state = 0.0;
    s.has_updated = false;
    s.serial += 1;
    s.started_at = Some(Utc::now());
    self.initialize_for_run(idx);
    debug!(
      state = %self.nodes[idx.0].name,
      guid = %self.nodes[idx.0].path_guid,
      "state started"
    );

    if self.nodes[idx.0].reference().is_some() {
      self.fire_state(idx, Hook::Enter);
      if let Some(instance) = self.nodes[idx.0].referenced_instance_mut() {
        instance.start_child();
      }
    } else if self.nodes[idx.0].machine().is_some() {
      self.start_machine(idx);
    } else {
      self.fire_state(idx, Hook::Enter);
    }
    true
  }

  /// Adds `dt` to the state's time, runs update hooks and advances nested machines.
  pub(crate) fn update_state(&mut self, idx: NodeIndex, dt: f32) -> bool {
    let Some(s) = self.nodes[idx.0].state_mut() else {
      return false;
    };
    if !s.active {
      return false;
    }
    s.time_in_state += dt;
    s.has_updated = true;
    trace!(state = %self.nodes[idx.0].name, dt, "state update");
    self.fire_state(idx, Hook::Update(dt));

    if self.nodes[idx.0].reference().is_some() {
      if let Some(instance) = self.nodes[idx.0].referenced_instance_mut() {
        instance.tick(dt);
      }
    } else if self.nodes[idx.0].machine().is_some() {
      self.process_states(idx, dt, false);
    }
    true
  }

  /// Deactivates a state. Children of a nested machine end first; a reference stops its
  /// child instance.
  pub(crate) fn end_state(&mut self, idx: NodeIndex, dt: f32) -> bool {
    let Some(s) = self.nodes[idx.0].state() else {
      return false;
    };
    if !s.active {
      return false;
    }
    if s.always_update && !s.has_updated {
      self.update_state(idx, dt);
    } else if let Some(s) = self.nodes[idx.0].state_mut() {
      s.time_in_state += dt;
    }
    if let Some(s) = self.nodes[idx.0].state_mut() {
      s.is_ending = true;
    }

    if self.nodes[idx.0].reference().is_some() {
      if let Some(instance) = self.nodes[idx.0].referenced_instance_mut() {
        instance.stop();
      }
    } else if self.nodes[idx.0].machine().is_some() {
      self.end_machine_children(idx, dt);
    }

    self.fire_state(idx, Hook::Exit);
    if let Some(s) = self.nodes[idx.0].state_mut() {
      s.is_ending = false;
      s.active = false;
      s.serial += 1;
    }
    self.shutdown_for_run(idx);
    debug!(
      state = %self.nodes[idx.0].name,
      guid = %self.nodes[idx.0].path_guid,
      "state ended"
    );
    true
  }
}
