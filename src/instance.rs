//! A running copy of a state machine class.
//!
//! An [Instance] owns the runtime graph built from its class, the child instances of its
//! references, the state history and the execution log. All ticking is synchronous; only
//! [Instance::initialize_async] moves the graph build to a worker thread.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;
use tracing::{debug, info, instrument, warn};

use crate::error::InstanceError;
use crate::guid_map::GuidMap;
use crate::guid_path::GuidPathBuilder;
use crate::nodes::graph::{BuiltGraph, GraphBuildInput, MachineGraph, ROOT_NODE_NAME};
use crate::nodes::{NodeIndex, NodeKindTag};
use crate::registry::ClassRegistry;
use crate::types::{
  Checkpoint, ExecutionLog, InstanceConfig, NodeId, SharedContext, StateHistoryEntry,
  StateMachineClass,
};
use crate::validate::ValidationWarning;

/// Callback run once an asynchronous initialization has been installed.
type AsyncCallback = Box<dyn FnOnce(&Instance) + Send>;

struct PendingInitialization {
  receiver: oneshot::Receiver<BuiltGraph>,
  on_complete: Option<AsyncCallback>,
}

/// Snapshot of one node, as returned by [Instance::state_info].
#[derive(Debug, Clone, PartialEq)]
pub struct StateInfo {
  pub guid: NodeId,
  /// Id of the node in its compiled class.
  pub node_id: NodeId,
  pub name: String,
  /// Class of the instance that owns the node.
  pub class_name: String,
  pub kind: NodeKindTag,
  pub active: bool,
  pub time_in_state: f32,
  /// Path guids of the transitions leaving the state, by priority.
  pub outgoing: Vec<NodeId>,
  pub incoming: Vec<NodeId>,
  /// Class a reference resolved to; `None` for other kinds or an unset dynamic class.
  pub referenced_class: Option<String>,
  pub dynamic_reference: bool,
}

/// Runtime instance of a [StateMachineClass].
pub struct Instance {
  class: Arc<StateMachineClass>,
  registry: Arc<ClassRegistry>,
  config: InstanceConfig,
  context: SharedContext,
  guids: GuidMap,
  graph: Option<MachineGraph>,
  pending: Option<PendingInitialization>,
  has_started: bool,
  is_updating: bool,
  warnings: Vec<ValidationWarning>,
}

impl std::fmt::Debug for Instance {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Instance")
      .field("class", &self.class.name)
      .field("initialized", &self.graph.is_some())
      .field("initializing_async", &self.pending.is_some())
      .field("started", &self.has_started)
      .field("nodes", &self.guids.len())
      .finish()
  }
}

/// Builds the graph of a root instance, reading and filling the class's path guid cache.
fn build_graph(
  class: &Arc<StateMachineClass>,
  registry: &Arc<ClassRegistry>,
  config: &InstanceConfig,
  context: SharedContext,
) -> BuiltGraph {
  let cache = if config.use_path_guid_cache {
    class.path_guid_cache.get()
  } else {
    None
  };
  let mut paths = GuidPathBuilder::new();
  let mut built = MachineGraph::build(
    GraphBuildInput {
      class,
      registry,
      context,
      config,
      prefix: Vec::new(),
      ancestry: Vec::new(),
      cache,
      root_reuse: None,
    },
    &mut paths,
  );
  if config.use_path_guid_cache && cache.is_none() && built.cacheable {
    let computed = std::mem::take(&mut built.cache);
    if class.path_guid_cache.set(computed).is_ok() {
      debug!(class = %class.name, "path guid cache populated");
    }
  }
  built
}

fn split_qualified_name(name: &str) -> Vec<&str> {
  let mut segments: Vec<&str> = name.split('.').map(str::trim).collect();
  if segments.first() == Some(&ROOT_NODE_NAME) {
    segments.remove(0);
  }
  segments.retain(|s| !s.is_empty());
  segments
}

impl Instance {
  /// Instance of the registered class `class_name`.
  pub fn new(
    class_name: &str,
    registry: Arc<ClassRegistry>,
    config: InstanceConfig,
  ) -> Result<Self, InstanceError> {
    let class = registry
      .class(class_name)
      .ok_or_else(|| InstanceError::UnknownClass(class_name.to_string()))?;
    Ok(Self::from_class(class, registry, config))
  }

  pub fn from_class(
    class: Arc<StateMachineClass>,
    registry: Arc<ClassRegistry>,
    config: InstanceConfig,
  ) -> Self {
    Self {
      class,
      registry,
      config,
      context: SharedContext::default(),
      guids: GuidMap::new(),
      graph: None,
      pending: None,
      has_started: false,
      is_updating: false,
      warnings: Vec::new(),
    }
  }

  /// Child instance of a reference node, built as part of its parent's graph.
  pub(crate) fn from_built(
    class: Arc<StateMachineClass>,
    registry: Arc<ClassRegistry>,
    config: InstanceConfig,
    context: SharedContext,
    graph: MachineGraph,
  ) -> Self {
    let mut instance = Self::from_class(class, registry, config);
    instance.context = context;
    instance.install_graph(graph);
    instance
  }

  fn install_graph(&mut self, graph: MachineGraph) {
    self.guids.clear_nodes();
    for (i, node) in graph.nodes.iter().enumerate() {
      self.guids.register_node(node.path_guid, NodeIndex(i));
    }
    self.graph = Some(graph);
  }

  fn install(&mut self, built: BuiltGraph) {
    self.warnings.extend(built.warnings);
    self.install_graph(built.graph);
    info!(class = %self.class.name, nodes = self.guids.len(), "instance initialized");
  }

  /// Builds the runtime graph, resolving references against `context`.
  #[instrument(level = "trace", skip(self, context), fields(class = %self.class.name))]
  pub fn initialize(&mut self, context: impl Into<SharedContext>) -> Result<(), InstanceError> {
    if self.pending.is_some() {
      return Err(InstanceError::InitializingAsync);
    }
    if self.graph.is_some() {
      return Err(InstanceError::AlreadyInitialized);
    }
    self.context = context.into();
    let built = build_graph(&self.class, &self.registry, &self.config, self.context.clone());
    self.install(built);
    Ok(())
  }

  /// Builds the runtime graph on a worker thread. The result is installed by
  /// [Instance::poll_async_initialization] or [Instance::wait_for_async_initialization],
  /// which then run `on_complete`.
  #[instrument(level = "trace", skip(self, context, on_complete), fields(class = %self.class.name))]
  pub fn initialize_async<F>(
    &mut self,
    context: impl Into<SharedContext>,
    on_complete: F,
  ) -> Result<(), InstanceError>
  where
    F: FnOnce(&Instance) + Send + 'static,
  {
    if self.pending.is_some() {
      return Err(InstanceError::InitializingAsync);
    }
    if self.graph.is_some() {
      return Err(InstanceError::AlreadyInitialized);
    }
    self.context = context.into();
    let (sender, receiver) = oneshot::channel();
    let class = Arc::clone(&self.class);
    let registry = Arc::clone(&self.registry);
    let config = self.config.clone();
    let context = self.context.clone();
    std::thread::spawn(move || {
      let built = build_graph(&class, &registry, &config, context);
      if sender.send(built).is_err() {
        debug!(class = %class.name, "async initialization result was discarded");
      }
    });
    self.pending = Some(PendingInitialization {
      receiver,
      on_complete: Some(Box::new(on_complete)),
    });
    debug!(class = %self.class.name, "async initialization started");
    Ok(())
  }

  pub fn is_initializing_async(&self) -> bool {
    self.pending.is_some()
  }

  pub fn is_initialized(&self) -> bool {
    self.graph.is_some()
  }

  /// Installs a finished async build without blocking. `Ok(false)` while still building.
  pub fn poll_async_initialization(&mut self) -> Result<bool, InstanceError> {
    let Some(pending) = self.pending.as_mut() else {
      return Err(InstanceError::NoAsyncInitialization);
    };
    match pending.receiver.try_recv() {
      Ok(built) => {
        let callback = self.pending.take().and_then(|p| p.on_complete);
        self.finish_async(built, callback);
        Ok(true)
      }
      Err(TryRecvError::Empty) => Ok(false),
      Err(TryRecvError::Closed) => {
        self.pending = None;
        Err(InstanceError::AsyncInitializationDropped)
      }
    }
  }

  /// Blocks until the async build finishes and installs it. Must not be called from
  /// inside an async runtime.
  pub fn wait_for_async_initialization(&mut self) -> Result<(), InstanceError> {
    let Some(pending) = self.pending.take() else {
      return if self.graph.is_some() {
        Ok(())
      } else {
        Err(InstanceError::NoAsyncInitialization)
      };
    };
    let built = pending
      .receiver
      .blocking_recv()
      .map_err(|_| InstanceError::AsyncInitializationDropped)?;
    self.finish_async(built, pending.on_complete);
    Ok(())
  }

  fn finish_async(&mut self, built: BuiltGraph, callback: Option<AsyncCallback>) {
    self.install(built);
    if let Some(callback) = callback {
      callback(self);
    }
  }

  /// Enters the root machine. A no-op when already started.
  #[instrument(level = "trace", skip(self), fields(class = %self.class.name))]
  pub fn start(&mut self) -> Result<(), InstanceError> {
    if self.pending.is_some() {
      return Err(InstanceError::InitializingAsync);
    }
    let Some(graph) = self.graph.as_mut() else {
      return Err(InstanceError::NotInitialized);
    };
    if self.has_started {
      return Ok(());
    }
    self.has_started = true;
    info!(class = %self.class.name, "instance started");
    let root = graph.root;
    graph.start_state(root);
    self.stop_if_in_end_state();
    Ok(())
  }

  /// Start requested by the reference node that owns this instance.
  pub(crate) fn start_child(&mut self) {
    if let Err(error) = self.start() {
      warn!(class = %self.class.name, %error, "referenced instance could not start");
    }
  }

  /// Advances the instance by `delta_seconds`. Ignored when not started.
  #[instrument(level = "trace", skip(self), fields(class = %self.class.name))]
  pub fn update(&mut self, delta_seconds: f32) -> Result<(), InstanceError> {
    if self.pending.is_some() {
      return Err(InstanceError::InitializingAsync);
    }
    self.tick(delta_seconds);
    Ok(())
  }

  pub(crate) fn tick(&mut self, delta_seconds: f32) {
    if !self.has_started || self.is_updating {
      return;
    }
    let Some(graph) = self.graph.as_mut() else {
      return;
    };
    let root = graph.root;
    if !graph.is_active(root) {
      return;
    }
    self.is_updating = true;
    graph.update_state(root, delta_seconds);
    self.is_updating = false;
    self.stop_if_in_end_state();
  }

  fn stop_if_in_end_state(&mut self) {
    if self.config.stop_on_end_state && self.has_started && self.is_in_end_state() {
      info!(class = %self.class.name, "root reached an end state, stopping");
      self.stop();
    }
  }

  /// Exits every active state and the root. Idempotent.
  #[instrument(level = "trace", skip(self), fields(class = %self.class.name))]
  pub fn stop(&mut self) {
    if !self.has_started {
      return;
    }
    self.has_started = false;
    if let Some(graph) = self.graph.as_mut() {
      let root = graph.root;
      graph.end_state(root, 0.0);
      if let Some(log) = graph.log.as_mut() {
        log.finish();
      }
    }
    info!(class = %self.class.name, "instance stopped");
  }

  /// Stops and drops the runtime graph. The instance can be initialized again afterwards.
  pub fn shutdown(&mut self) {
    self.stop();
    self.pending = None;
    self.graph = None;
    self.guids.clear_nodes();
    info!(class = %self.class.name, "instance shut down");
  }

  pub fn restart(&mut self) -> Result<(), InstanceError> {
    self.stop();
    self.start()
  }

  pub fn is_active(&self) -> bool {
    self.graph.as_ref().is_some_and(|g| g.is_active(g.root))
  }

  pub fn has_started(&self) -> bool {
    self.has_started
  }

  /// The root is active and no active state can ever leave.
  pub fn is_in_end_state(&self) -> bool {
    self
      .graph
      .as_ref()
      .is_some_and(|g| g.is_active(g.root) && g.is_in_end_state(g.root))
  }

  /// One evaluation pass without updates. Transitions that pass are still taken.
  pub fn evaluate_transitions(&mut self) {
    if let Some(graph) = self.graph.as_mut()
      && graph.is_active(graph.root)
    {
      let root = graph.root;
      graph.process_states(root, 0.0, true);
    }
  }

  /// Path guids of every active node, the root and composite states included.
  pub fn get_all_active_state_guids(&self) -> Vec<NodeId> {
    let mut out = Vec::new();
    self.collect_active_into(true, &mut out);
    out
  }

  pub(crate) fn collect_active_into(&self, include_root: bool, out: &mut Vec<NodeId>) {
    if let Some(graph) = &self.graph {
      graph.collect_active(include_root, out);
    }
  }

  /// Path guids of the active leaf states, descending into nested machines and references.
  pub fn capture_active_set(&self) -> Vec<NodeId> {
    let mut out = Vec::new();
    self.capture_into(&mut out);
    out
  }

  pub(crate) fn capture_into(&self, out: &mut Vec<NodeId>) {
    if let Some(graph) = &self.graph {
      graph.capture_leaves(out);
    }
  }

  pub fn checkpoint(&self) -> Checkpoint {
    Checkpoint {
      class_name: self.class.name.clone(),
      active_states: self.capture_active_set(),
      context: self.context.snapshot(),
    }
  }

  /// Makes `guid` an entry state for the next start. See
  /// [Instance::load_from_multiple_states].
  pub fn load_from_state(&mut self, guid: NodeId) -> bool {
    self.load_from_multiple_states(&[guid]) == 1
  }

  /// Marks each guid, after redirects, and its ancestors as temporary entry states so the
  /// next start activates them instead of the entry states. Returns how many matched.
  #[instrument(level = "trace", skip(self, guids), fields(class = %self.class.name))]
  pub fn load_from_multiple_states(&mut self, guids: &[NodeId]) -> usize {
    if self.has_started {
      warn!(class = %self.class.name, "states can only be loaded before start");
      return 0;
    }
    let loaded = guids.iter().filter(|&&guid| self.load_guid(guid)).count();
    if loaded < guids.len() {
      warn!(
        class = %self.class.name,
        requested = guids.len(),
        loaded,
        "some saved states were not found"
      );
    }
    loaded
  }

  fn load_guid(&mut self, guid: NodeId) -> bool {
    let guid = self.guids.resolve(guid);
    self.load_resolved_guid(guid)
  }

  fn load_resolved_guid(&mut self, guid: NodeId) -> bool {
    let local = self.guids.lookup_exact(guid);
    let Some(graph) = self.graph.as_mut() else {
      return false;
    };
    if let Some(idx) = local
      && idx != graph.root
      && graph.node(idx).can_be_active()
    {
      graph.mark_temporary_entry(idx);
      return true;
    }
    let references: Vec<NodeIndex> = (0..graph.nodes.len())
      .map(NodeIndex)
      .filter(|&i| graph.node(i).referenced_instance().is_some())
      .collect();
    for reference in references {
      let found = graph
        .node_mut(reference)
        .referenced_instance_mut()
        .is_some_and(|child| child.load_resolved_guid(guid));
      if found {
        graph.mark_temporary_entry(reference);
        return true;
      }
    }
    false
  }

  /// Loads `guids` and starts the instance.
  pub fn restore_active_set(&mut self, guids: &[NodeId]) -> Result<usize, InstanceError> {
    if self.pending.is_some() {
      return Err(InstanceError::InitializingAsync);
    }
    if self.graph.is_none() {
      return Err(InstanceError::NotInitialized);
    }
    let loaded = self.load_from_multiple_states(guids);
    self.start()?;
    Ok(loaded)
  }

  /// Copies the checkpoint's context into this instance's context, then restores its states.
  pub fn restore_checkpoint(&mut self, checkpoint: &Checkpoint) -> Result<usize, InstanceError> {
    if checkpoint.class_name != self.class.name {
      warn!(
        class = %self.class.name,
        checkpoint_class = %checkpoint.class_name,
        "checkpoint was captured from another class"
      );
    }
    for (key, value) in &checkpoint.context {
      self.context.set(key.clone(), value.clone());
    }
    self.restore_active_set(&checkpoint.active_states)
  }

  /// Activates the state at a dot path such as `Root.Nested.State`. The leading `Root` is
  /// optional and paths descend into references. With `deactivate_others`, every active
  /// state that is not an ancestor of the target ends.
  #[instrument(level = "trace", skip(self), fields(class = %self.class.name))]
  pub fn switch_active_state_by_qualified_name(
    &mut self,
    name: &str,
    deactivate_others: bool,
  ) -> bool {
    let segments = split_qualified_name(name);
    if segments.is_empty() {
      return false;
    }
    let switched = self.switch_segments(&segments, deactivate_others);
    if !switched {
      warn!(class = %self.class.name, state = %name, "no state with this qualified name");
    }
    switched
  }

  fn switch_segments(&mut self, segments: &[&str], deactivate_others: bool) -> bool {
    let Some(graph) = self.graph.as_mut() else {
      return false;
    };
    let Some((chain, consumed)) = graph.resolve_name_chain(segments) else {
      return false;
    };
    let Some(&target) = chain.last() else {
      return false;
    };
    if consumed < segments.len() {
      let target_active = graph.is_active(target);
      if deactivate_others && target_active {
        graph.deactivate_all_except(&chain);
      }
      let switched = graph
        .node_mut(target)
        .referenced_instance_mut()
        .is_some_and(|child| child.switch_segments(&segments[consumed..], deactivate_others));
      if !switched {
        return false;
      }
      if target_active {
        return true;
      }
    } else if target == graph.root || !graph.node(target).can_be_active() {
      return false;
    }
    graph.activate_chain(&chain, deactivate_others);
    true
  }

  /// Path guid of the state at a dot path. See [Instance::switch_active_state_by_qualified_name].
  pub fn find_state_by_qualified_name(&self, name: &str) -> Option<NodeId> {
    self.find_segments(&split_qualified_name(name))
  }

  fn find_segments(&self, segments: &[&str]) -> Option<NodeId> {
    let graph = self.graph.as_ref()?;
    let (chain, consumed) = graph.resolve_name_chain(segments)?;
    let last = *chain.last()?;
    if consumed < segments.len() {
      return graph
        .node(last)
        .referenced_instance()?
        .find_segments(&segments[consumed..]);
    }
    Some(graph.node(last).path_guid)
  }

  /// Name, kind and activity of the node with path guid `guid`, here or in a reference.
  pub fn state_info(&self, guid: NodeId) -> Option<StateInfo> {
    self.resolved_state_info(self.guids.resolve(guid))
  }

  fn resolved_state_info(&self, guid: NodeId) -> Option<StateInfo> {
    let graph = self.graph.as_ref()?;
    if let Some(idx) = self.guids.lookup_exact(guid) {
      let node = graph.node(idx);
      let guids_of = |transitions: &[NodeIndex]| -> Vec<NodeId> {
        transitions.iter().map(|&t| graph.node(t).path_guid).collect()
      };
      let state = node.state();
      let reference = node.reference();
      return Some(StateInfo {
        guid: node.path_guid,
        node_id: node.node_id,
        name: node.name.clone(),
        class_name: self.class.name.clone(),
        kind: node.tag(),
        active: node.is_active(),
        time_in_state: state.map_or(0.0, |s| s.time_in_state),
        outgoing: state.map(|s| guids_of(&s.outgoing)).unwrap_or_default(),
        incoming: state.map(|s| guids_of(&s.incoming)).unwrap_or_default(),
        referenced_class: reference.and_then(|r| r.class_name.clone()),
        dynamic_reference: reference.is_some_and(|r| r.dynamic),
      });
    }
    self
      .get_all_referenced_instances(false)
      .into_iter()
      .find_map(|child| child.resolved_state_info(guid))
  }

  /// States that left this instance's machines, oldest first. Referenced instances keep
  /// their own history.
  pub fn state_history(&self) -> Vec<StateHistoryEntry> {
    self
      .graph
      .as_ref()
      .map(|g| g.history.entries())
      .unwrap_or_default()
  }

  /// Trims the history to `max_count` entries; zero disables it.
  pub fn set_state_history_max_count(&mut self, max_count: usize) {
    self.config.state_history_max_count = max_count;
    if let Some(graph) = self.graph.as_mut() {
      graph.history.set_max_count(max_count);
    }
  }

  /// Old path guid -> current path guid, consulted by loads and lookups.
  pub fn set_guid_redirect_map(&mut self, redirects: HashMap<NodeId, NodeId>) {
    self.guids.set_redirects(redirects);
  }

  /// Child instances of this instance's references; with `include_children`, theirs too.
  pub fn get_all_referenced_instances(&self, include_children: bool) -> Vec<&Instance> {
    let Some(graph) = &self.graph else {
      return Vec::new();
    };
    let mut out = Vec::new();
    for node in &graph.nodes {
      if let Some(child) = node.referenced_instance() {
        out.push(child);
        if include_children {
          out.extend(child.get_all_referenced_instances(true));
        }
      }
    }
    out
  }

  pub fn execution_log(&self) -> Option<&ExecutionLog> {
    self.graph.as_ref().and_then(|g| g.log.as_ref())
  }

  /// Path guid of the root machine.
  pub fn root_guid(&self) -> Option<NodeId> {
    self.graph.as_ref().map(|g| g.node(g.root).path_guid)
  }

  #[cfg(test)]
  pub(crate) fn graph(&self) -> Option<&MachineGraph> {
    self.graph.as_ref()
  }

  #[cfg(test)]
  pub(crate) fn graph_mut(&mut self) -> Option<&mut MachineGraph> {
    self.graph.as_mut()
  }

  pub fn class(&self) -> &Arc<StateMachineClass> {
    &self.class
  }

  pub fn class_name(&self) -> &str {
    &self.class.name
  }

  pub fn context(&self) -> &SharedContext {
    &self.context
  }

  pub fn config(&self) -> &InstanceConfig {
    &self.config
  }

  /// Defects found while building the graph, children included.
  pub fn warnings(&self) -> &[ValidationWarning] {
    &self.warnings
  }
}
