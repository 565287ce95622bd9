//! Runtime arena of one instance, built from a compiled class.
//!
//! Building resolves scoped guids to indices, re-homes link-state transitions onto their
//! targets, sorts outgoing transitions, computes path guids and builds the child instances
//! of reference nodes.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::runtime_node::{
  ConduitData, Hook, MachineData, NodeIndex, NodeKind, ReferenceData, RuntimeNode, StateData,
  TransitionData,
};
use crate::behavior::{HookContext, NodeBehavior};
use crate::guid_path::{GuidPathBuilder, PathGuidCache};
use crate::instance::Instance;
use crate::registry::ClassRegistry;
use crate::types::{
  CompiledReference, CompiledState, CompiledStateKind, CompiledStateMachine, CompiledTransition,
  ExecutionLog, InstanceConfig, NodeId, SharedContext, StateHistory, StateMachineClass,
};
use crate::validate::ValidationWarning;

/// Display name of every root state machine.
pub const ROOT_NODE_NAME: &str = "Root";

/// Nodes and per-run records of one instance.
#[derive(Debug)]
pub(crate) struct MachineGraph {
  pub nodes: Vec<RuntimeNode>,
  pub root: NodeIndex,
  pub class_name: String,
  pub context: SharedContext,
  pub history: StateHistory,
  pub log: Option<ExecutionLog>,
}

/// Inputs for building the graph of one instance.
pub(crate) struct GraphBuildInput<'a> {
  pub class: &'a Arc<StateMachineClass>,
  pub registry: &'a Arc<ClassRegistry>,
  pub context: SharedContext,
  pub config: &'a InstanceConfig,
  /// Owner chain above this instance's root machine (empty for a root instance).
  pub prefix: Vec<NodeId>,
  /// Classes being built above this one.
  pub ancestry: Vec<String>,
  pub cache: Option<&'a PathGuidCache>,
  /// Reuse flags inherited from the reference node that owns this instance.
  pub root_reuse: Option<(bool, bool)>,
}

pub(crate) struct BuiltGraph {
  pub graph: MachineGraph,
  pub warnings: Vec<ValidationWarning>,
  /// Path guids computed by this build, children included.
  pub cache: PathGuidCache,
  /// False when a dynamic reference was resolved, so the cache must not be stored.
  pub cacheable: bool,
}

struct BuildState<'a, 'p> {
  input: GraphBuildInput<'a>,
  paths: &'p mut GuidPathBuilder,
  /// Ids from the instance's root machine down to the machine being built.
  chain: Vec<NodeId>,
  root_path: NodeId,
  warnings: Vec<ValidationWarning>,
  cache: PathGuidCache,
  cacheable: bool,
}

impl BuildState<'_, '_> {
  fn path_guid_for(&mut self, node_id: NodeId) -> NodeId {
    if let Some(cached) = self
      .input
      .cache
      .and_then(|c| c.lookup(self.root_path, node_id))
    {
      return cached;
    }
    let mut full = self.input.prefix.clone();
    full.extend_from_slice(&self.chain);
    full.push(node_id);
    let guid = self.paths.path_guid(&full);
    self.cache.insert(self.root_path, node_id, guid);
    guid
  }

  fn behavior(&self, name: Option<&String>) -> Option<Box<dyn NodeBehavior>> {
    name.and_then(|n| self.input.registry.create_behavior(n))
  }

  fn stack(&self, names: impl Iterator<Item = String>) -> Vec<Option<Box<dyn NodeBehavior>>> {
    names
      .map(|n| self.input.registry.create_behavior(&n))
      .collect()
  }
}

fn state_data(cs: &CompiledState) -> StateData {
  StateData {
    always_update: cs.always_update,
    exclude_from_any_state: cs.exclude_from_any_state,
    eval_transitions_on_start: cs.eval_transitions_on_start,
    allow_parallel_reentry: cs.allow_parallel_reentry,
    ..StateData::default()
  }
}

fn machine_data(body: &CompiledStateMachine) -> MachineData {
  MachineData {
    allow_parallel_entry_states: body.allow_parallel_entry_states,
    wait_for_end_state: body.wait_for_end_state,
    reuse_current_state: body.reuse_current_state,
    only_reuse_if_not_end_state: body.only_reuse_if_not_end_state,
    ..MachineData::default()
  }
}

impl MachineGraph {
  /// Builds the arena for `input.class`, recursing into references.
  pub(crate) fn build(input: GraphBuildInput<'_>, paths: &mut GuidPathBuilder) -> BuiltGraph {
    let class = Arc::clone(input.class);
    let mut root_chain = input.prefix.clone();
    root_chain.push(class.root_id);
    let root_path = paths.path_guid(&root_chain);

    let mut graph = MachineGraph {
      nodes: Vec::new(),
      root: NodeIndex(0),
      class_name: class.name.clone(),
      context: input.context.clone(),
      history: StateHistory::new(input.config.state_history_max_count),
      log: input
        .config
        .record_execution_log
        .then(|| ExecutionLog::new(class.name.clone())),
    };
    let mut state = BuildState {
      input,
      paths,
      chain: Vec::new(),
      root_path,
      warnings: Vec::new(),
      cache: PathGuidCache::default(),
      cacheable: true,
    };
    state.cache.insert(root_path, class.root_id, root_path);

    let mut root_machine = machine_data(&class.machine);
    if let Some((reuse, only_if_not_end)) = state.input.root_reuse {
      root_machine.reuse_current_state = reuse;
      root_machine.only_reuse_if_not_end_state = only_if_not_end;
    }
    let behavior = state.behavior(class.root_behavior.as_ref());
    graph.nodes.push(RuntimeNode {
      node_id: class.root_id,
      path_guid: root_path,
      name: ROOT_NODE_NAME.to_string(),
      owner: None,
      behavior,
      stack: Vec::new(),
      initialized: false,
      kind: NodeKind::StateMachine(StateData::default(), Box::new(root_machine)),
    });
    state.chain.push(class.root_id);
    graph.add_machine_body(graph.root, &class.machine, &mut state);

    debug!(
      class = %graph.class_name,
      nodes = graph.nodes.len(),
      "built state machine graph"
    );
    BuiltGraph {
      graph,
      warnings: state.warnings,
      cache: state.cache,
      cacheable: state.cacheable,
    }
  }

  fn push(&mut self, node: RuntimeNode) -> NodeIndex {
    self.nodes.push(node);
    NodeIndex(self.nodes.len() - 1)
  }

  fn add_machine_body(
    &mut self,
    machine: NodeIndex,
    body: &CompiledStateMachine,
    state: &mut BuildState<'_, '_>,
  ) {
    let mut scope: HashMap<NodeId, NodeIndex> = HashMap::new();
    for cs in &body.states {
      let idx = self.add_state(machine, cs, state);
      scope.entry(cs.id).or_insert(idx);
    }

    // Link targets may point at any sibling, so they resolve once every sibling exists.
    for cs in &body.states {
      if let CompiledStateKind::LinkState { linked_state } = &cs.kind {
        let target = linked_state
          .and_then(|t| scope.get(&t).copied())
          .filter(|t| self.nodes[t.0].can_be_active() || self.nodes[t.0].is_inline_conduit());
        if target.is_none() {
          warn!(link = %cs.name, "link state has no valid target and is ignored");
        }
        if let Some(idx) = scope.get(&cs.id)
          && let NodeKind::LinkState { target: slot } = &mut self.nodes[idx.0].kind
        {
          *slot = target;
        }
      }
    }

    for ct in &body.transitions {
      self.add_transition(machine, ct, &scope, state);
    }

    for idx in scope.values() {
      let mut outgoing = match self.nodes[idx.0].state() {
        Some(s) => s.outgoing.clone(),
        None => continue,
      };
      outgoing.sort_by_key(|t| self.nodes[t.0].transition().map_or(0, |t| t.priority));
      if let Some(s) = self.nodes[idx.0].state_mut() {
        s.outgoing = outgoing;
      }
    }
    let anys = self.nodes[machine.0]
      .machine()
      .map(|m| m.any_states.clone())
      .unwrap_or_default();
    for any in anys {
      let mut list = match &self.nodes[any.0].kind {
        NodeKind::AnyState { transitions, .. } => transitions.clone(),
        _ => continue,
      };
      list.sort_by_key(|t| self.nodes[t.0].transition().map_or(0, |t| t.priority));
      if let NodeKind::AnyState { transitions, .. } = &mut self.nodes[any.0].kind {
        *transitions = list;
      }
    }

    let mut entries = Vec::new();
    for id in &body.entry_states {
      match scope.get(id).and_then(|idx| self.follow_link(*idx)) {
        Some(idx) if self.nodes[idx.0].can_be_active() => {
          if !entries.contains(&idx) {
            entries.push(idx);
          }
        }
        _ => warn!(entry = %id, "entry state is not a state of its machine"),
      }
    }
    if entries.is_empty() {
      debug!(machine = %self.nodes[machine.0].name, "state machine has no entry state");
    }
    if let Some(m) = self.nodes[machine.0].machine_mut() {
      m.entry_states = entries;
    }
  }

  /// Link states resolve to their target; everything else to itself.
  pub(crate) fn follow_link(&self, idx: NodeIndex) -> Option<NodeIndex> {
    match &self.nodes[idx.0].kind {
      NodeKind::LinkState { target } => *target,
      _ => Some(idx),
    }
  }

  fn add_state(
    &mut self,
    machine: NodeIndex,
    cs: &CompiledState,
    state: &mut BuildState<'_, '_>,
  ) -> NodeIndex {
    let path_guid = state.path_guid_for(cs.id);
    let behavior = state.behavior(cs.behavior.as_ref());
    let stack = state.stack(cs.stack.iter().cloned());
    let kind = match &cs.kind {
      CompiledStateKind::State => NodeKind::State(state_data(cs)),
      CompiledStateKind::Conduit {
        eval_with_transitions,
        can_evaluate,
        condition,
      } => NodeKind::Conduit(
        state_data(cs),
        ConduitData {
          eval_with_transitions: *eval_with_transitions,
          can_evaluate: *can_evaluate,
          condition: *condition,
        },
      ),
      CompiledStateKind::StateMachine(body) => {
        NodeKind::StateMachine(state_data(cs), Box::new(machine_data(body)))
      }
      CompiledStateKind::Reference(reference) => {
        let mut data = MachineData {
          wait_for_end_state: reference.wait_for_end_state,
          reuse_current_state: reference.reuse_current_state,
          only_reuse_if_not_end_state: reference.only_reuse_if_not_end_state,
          ..MachineData::default()
        };
        data.reference = Some(Self::create_reference(cs, reference, state));
        NodeKind::StateMachine(state_data(cs), Box::new(data))
      }
      CompiledStateKind::LinkState { .. } => NodeKind::LinkState { target: None },
      CompiledStateKind::AnyState {
        allow_initial_reentry,
      } => NodeKind::AnyState {
        allow_initial_reentry: *allow_initial_reentry,
        transitions: Vec::new(),
      },
    };
    let idx = self.push(RuntimeNode {
      node_id: cs.id,
      path_guid,
      name: cs.name.clone(),
      owner: Some(machine),
      behavior,
      stack,
      initialized: false,
      kind,
    });

    if let Some(m) = self.nodes[machine.0].machine_mut() {
      match &cs.kind {
        CompiledStateKind::LinkState { .. } => m.links.push(idx),
        CompiledStateKind::AnyState { .. } => m.any_states.push(idx),
        _ => m.states.push(idx),
      }
    }

    if let CompiledStateKind::StateMachine(body) = &cs.kind {
      state.chain.push(cs.id);
      self.add_machine_body(idx, body, state);
      state.chain.pop();
    }
    idx
  }

  /// Resolves the referenced class and builds its child instance. Failures leave the
  /// reference empty.
  fn create_reference(
    cs: &CompiledState,
    reference: &CompiledReference,
    state: &mut BuildState<'_, '_>,
  ) -> ReferenceData {
    let dynamic = reference.dynamic_class_variable.is_some();
    let class_name = match &reference.dynamic_class_variable {
      Some(variable) => {
        state.cacheable = false;
        let value = state.input.context.get(variable);
        if value.is_none() {
          warn!(
            reference = %cs.name,
            variable = %variable,
            "dynamic reference variable is not set, reference stays empty"
          );
        }
        value
      }
      None => reference.class.clone(),
    };
    let mut data = ReferenceData {
      class_name: class_name.clone(),
      dynamic,
      instance: None,
    };
    let Some(class_name) = class_name else {
      return data;
    };
    let Some(class) = state.input.registry.class(&class_name) else {
      warn!(reference = %cs.name, class = %class_name, "referenced class is not registered");
      return data;
    };
    if class_name == state.input.class.name || state.input.ancestry.contains(&class_name) {
      warn!(reference = %cs.name, class = %class_name, "reference cycle, reference stays empty");
      state.warnings.push(ValidationWarning::ReferenceCycle {
        path: state
          .input
          .ancestry
          .iter()
          .cloned()
          .chain([state.input.class.name.clone(), class_name])
          .collect(),
      });
      return data;
    }

    let mut prefix = state.input.prefix.clone();
    prefix.extend_from_slice(&state.chain);
    prefix.push(cs.id);
    let mut ancestry = state.input.ancestry.clone();
    ancestry.push(state.input.class.name.clone());
    let context = if reference.share_context {
      state.input.context.clone()
    } else {
      state.input.context.detached()
    };
    let built = MachineGraph::build(
      GraphBuildInput {
        class: &class,
        registry: state.input.registry,
        context: context.clone(),
        config: state.input.config,
        prefix,
        ancestry,
        cache: if dynamic { None } else { state.input.cache },
        root_reuse: Some((
          reference.reuse_current_state,
          reference.only_reuse_if_not_end_state,
        )),
      },
      state.paths,
    );
    let BuiltGraph {
      graph,
      warnings,
      cache,
      cacheable,
    } = built;
    state.cacheable &= cacheable && !dynamic;
    if !dynamic {
      state.cache.extend(cache);
    }
    state.warnings.extend(warnings);
    let child_config = InstanceConfig {
      stop_on_end_state: false,
      ..state.input.config.clone()
    };
    data.instance = Some(Box::new(Instance::from_built(
      class,
      Arc::clone(state.input.registry),
      child_config,
      context,
      graph,
    )));
    data
  }

  fn add_transition(
    &mut self,
    machine: NodeIndex,
    ct: &CompiledTransition,
    scope: &HashMap<NodeId, NodeIndex>,
    state: &mut BuildState<'_, '_>,
  ) {
    let (Some(&from), Some(&to)) = (scope.get(&ct.from), scope.get(&ct.to)) else {
      warn!(transition = %ct.id, "transition endpoint is not in its machine, ignored");
      return;
    };
    let (from, from_link_state, from_any_state) = match &self.nodes[from.0].kind {
      NodeKind::LinkState { target: Some(t) } => (*t, true, false),
      NodeKind::LinkState { target: None } => return,
      NodeKind::AnyState { .. } => (from, false, true),
      _ => (from, false, false),
    };
    if matches!(self.nodes[to.0].kind, NodeKind::AnyState { .. }) {
      warn!(transition = %ct.id, "transition into an any state marker, ignored");
      return;
    }
    if from_any_state
      && let Some(target) = self.follow_link(to)
      && self.nodes[target.0].state().is_some_and(|s| s.exclude_from_any_state)
    {
      warn!(transition = %ct.id, "any state transition targets an excluded state, ignored");
      return;
    }

    let path_guid = state.path_guid_for(ct.id);
    let behavior = state.behavior(ct.behavior.as_ref());
    let stack = state.stack(ct.stack.iter().map(|e| e.behavior.clone()));
    let idx = self.push(RuntimeNode {
      node_id: ct.id,
      path_guid,
      name: ct.name.clone(),
      owner: Some(machine),
      behavior,
      stack,
      initialized: false,
      kind: NodeKind::Transition(TransitionData {
        from,
        to,
        priority: ct.priority,
        run_parallel: ct.run_parallel,
        eval_if_next_state_active: ct.eval_if_next_state_active,
        can_eval_with_start_state: ct.can_eval_with_start_state,
        can_evaluate: ct.can_evaluate,
        condition: ct.condition,
        negate_primary: ct.negate_primary_condition,
        stack: ct.stack.iter().map(|e| (e.mode, e.negate)).collect(),
        from_any_state,
        from_link_state,
      }),
    });

    if let Some(m) = self.nodes[machine.0].machine_mut() {
      m.transitions.push(idx);
    }
    if from_any_state {
      if let NodeKind::AnyState { transitions, .. } = &mut self.nodes[from.0].kind {
        transitions.push(idx);
      }
    } else if let Some(s) = self.nodes[from.0].state_mut() {
      s.outgoing.push(idx);
    }
    if let Some(target) = self.follow_link(to)
      && let Some(s) = self.nodes[target.0].state_mut()
    {
      s.incoming.push(idx);
    }
  }

  pub(crate) fn node(&self, idx: NodeIndex) -> &RuntimeNode {
    &self.nodes[idx.0]
  }

  pub(crate) fn node_mut(&mut self, idx: NodeIndex) -> &mut RuntimeNode {
    &mut self.nodes[idx.0]
  }

  pub(crate) fn is_active(&self, idx: NodeIndex) -> bool {
    self.nodes[idx.0].is_active()
  }

  pub(crate) fn serial(&self, idx: NodeIndex) -> u64 {
    self.nodes[idx.0].state().map_or(0, |s| s.serial)
  }

  pub(crate) fn owner(&self, idx: NodeIndex) -> Option<NodeIndex> {
    self.nodes[idx.0].owner
  }

  pub(crate) fn active_states(&self, machine: NodeIndex) -> Vec<NodeIndex> {
    self.nodes[machine.0]
      .machine()
      .map(|m| m.active_states.clone())
      .unwrap_or_default()
  }

  /// Runs `hook` on the node's behavior and then on each stacked behavior.
  pub(crate) fn fire(&mut self, idx: NodeIndex, hook: Hook, time_in_state: f32) {
    let context = &self.context;
    let node = &mut self.nodes[idx.0];
    let ctx = HookContext {
      node_id: node.path_guid,
      node_name: &node.name,
      time_in_state,
      context,
    };
    if let Some(behavior) = node.behavior.as_mut() {
      hook.call(behavior.as_mut(), &ctx);
    }
    for behavior in node.stack.iter_mut().flatten() {
      hook.call(behavior.as_mut(), &ctx);
    }
  }

  /// Runs a state hook with the state's own time in state.
  pub(crate) fn fire_state(&mut self, idx: NodeIndex, hook: Hook) {
    let time = self.nodes[idx.0].state().map_or(0.0, |s| s.time_in_state);
    self.fire(idx, hook, time);
  }
}
