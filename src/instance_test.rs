//! Tests for `Instance`.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::builder::MachineBuilder;
use crate::nodes::NodeKindTag;
use crate::test_support::{HookCounts, active_names, name_of, registry, started};
use crate::types::{CompiledReference, InstanceConfig, RunContext, StateMachineClass};
use crate::{Instance, InstanceError, ValidationWarning};

fn linear() -> StateMachineClass {
  let mut b = MachineBuilder::new("Linear");
  let a = b.state_with_behavior("A", "record");
  let s = b.state_with_behavior("B", "record");
  let c = b.state_with_behavior("C", "record");
  b.transition(a, s);
  b.transition(s, c);
  b.build()
}

fn sub() -> StateMachineClass {
  let mut b = MachineBuilder::new("Sub");
  let x = b.state_with_behavior("X", "record");
  let y = b.state_with_behavior("Y", "record");
  b.conditional_transition(x, y, "context_flag:advance");
  b.build()
}

/// Two parallel references to `Sub`.
fn twin() -> StateMachineClass {
  let mut b = MachineBuilder::new("Twin");
  let left = b.reference("Left", "Sub");
  let right = b.reference("Right", "Sub");
  b.entry(left).entry(right);
  b.machine_mut().allow_parallel_entry_states = true;
  b.build()
}

#[test]
fn lifecycle_errors_are_reported() {
  let counts = HookCounts::default();
  let registry = registry(&counts, vec![linear()]);
  let err = Instance::new("Nope", Arc::clone(&registry), InstanceConfig::default()).unwrap_err();
  assert!(matches!(err, InstanceError::UnknownClass(name) if name == "Nope"));

  let mut instance = Instance::new("Linear", registry, InstanceConfig::default()).unwrap();
  assert!(matches!(instance.start(), Err(InstanceError::NotInitialized)));
  instance.initialize(RunContext::new()).unwrap();
  assert!(matches!(
    instance.initialize(RunContext::new()),
    Err(InstanceError::AlreadyInitialized)
  ));
}

#[test]
fn start_and_stop_are_idempotent() {
  let counts = HookCounts::default();
  let registry = registry(&counts, vec![linear()]);
  let mut instance = started(&registry, "Linear", InstanceConfig::default());
  instance.start().unwrap();
  assert_eq!(counts.get("A", "enter"), 1);
  instance.stop();
  instance.stop();
  assert_eq!(counts.get("A", "exit"), 1);
  assert_eq!(counts.get("A", "initialized"), 1);
  assert_eq!(counts.get("A", "shutdown"), 1);
  // Updates are ignored while stopped.
  instance.update(0.1).unwrap();
  assert_eq!(counts.get("A", "update"), 0);
}

#[test]
fn restart_enters_the_entry_state_again() {
  let counts = HookCounts::default();
  let registry = registry(&counts, vec![linear()]);
  let mut instance = started(&registry, "Linear", InstanceConfig::default());
  instance.update(0.1).unwrap();
  instance.restart().unwrap();
  assert_eq!(active_names(&instance), vec!["A"]);
  assert_eq!(counts.get("A", "enter"), 2);
}

#[test]
fn shutdown_requires_a_new_initialize() {
  let counts = HookCounts::default();
  let registry = registry(&counts, vec![linear()]);
  let mut instance = started(&registry, "Linear", InstanceConfig::default());
  instance.shutdown();
  assert!(!instance.is_initialized());
  assert!(matches!(instance.start(), Err(InstanceError::NotInitialized)));
  instance.initialize(RunContext::new()).unwrap();
  instance.start().unwrap();
  assert_eq!(active_names(&instance), vec!["A"]);
}

#[test]
fn references_get_distinct_path_guids() {
  let counts = HookCounts::default();
  let registry = registry(&counts, vec![sub(), twin()]);
  let instance = started(&registry, "Twin", InstanceConfig::default());
  let active = instance.capture_active_set();
  assert_eq!(active.len(), 2);
  assert_ne!(active[0], active[1]);
  assert_eq!(name_of(&instance, active[0]), "X");
  assert_eq!(name_of(&instance, active[1]), "X");

  let children = instance.get_all_referenced_instances(false);
  assert_eq!(children.len(), 2);
  assert!(children.iter().all(|c| c.class_name() == "Sub" && c.is_active()));
  // Every active node: root, both references and both leaves.
  assert_eq!(instance.get_all_active_state_guids().len(), 5);
}

#[test]
fn path_guids_are_stable_across_instances() {
  let counts = HookCounts::default();
  let registry = registry(&counts, vec![sub(), twin()]);
  let first = started(&registry, "Twin", InstanceConfig::default());
  assert!(registry.class("Twin").unwrap().has_path_guid_cache());
  let second = started(&registry, "Twin", InstanceConfig::default());
  let uncached = started(
    &registry,
    "Twin",
    InstanceConfig {
      use_path_guid_cache: false,
      ..InstanceConfig::default()
    },
  );
  assert_eq!(first.capture_active_set(), second.capture_active_set());
  assert_eq!(first.capture_active_set(), uncached.capture_active_set());
}

#[test]
fn referenced_instance_follows_its_reference() {
  let mut b = MachineBuilder::new("Outer");
  let a = b.state("A");
  let r = b.reference("Child", "Sub");
  let done = b.state("Done");
  b.transition(a, r);
  b.conditional_transition(r, done, "context_flag:finish");
  let counts = HookCounts::default();
  let registry = registry(&counts, vec![sub(), b.build()]);
  let mut instance = started(&registry, "Outer", InstanceConfig::default());
  instance.update(0.1).unwrap();
  assert_eq!(active_names(&instance), vec!["X"]);
  // The shared context drives the child.
  instance.context().set("advance", "true");
  instance.update(0.1).unwrap();
  assert_eq!(active_names(&instance), vec!["Y"]);
  instance.context().set("finish", "true");
  instance.update(0.1).unwrap();
  assert_eq!(active_names(&instance), vec!["Done"]);
  assert_eq!(counts.get("Y", "exit"), 1);
  let child = instance.get_all_referenced_instances(false)[0];
  assert!(!child.is_active());
}

#[test]
fn unshared_context_is_a_copy() {
  let mut b = MachineBuilder::new("Private");
  b.add_reference(
    "Child",
    CompiledReference {
      class: Some("Sub".to_string()),
      share_context: false,
      ..CompiledReference::default()
    },
  );
  let counts = HookCounts::default();
  let registry = registry(&counts, vec![sub(), b.build()]);
  let mut instance = started(&registry, "Private", InstanceConfig::default());
  instance.context().set("advance", "true");
  instance.update(0.1).unwrap();
  assert_eq!(active_names(&instance), vec!["X"]);
  let child = instance.get_all_referenced_instances(false)[0];
  assert!(!child.context().shares_with(instance.context()));
}

#[test]
fn dynamic_reference_reads_the_context() {
  let mut b = MachineBuilder::new("Dynamic");
  b.add_reference(
    "Child",
    CompiledReference {
      dynamic_class_variable: Some("child_class".to_string()),
      share_context: true,
      ..CompiledReference::default()
    },
  );
  let counts = HookCounts::default();
  let registry = registry(&counts, vec![sub(), b.build()]);
  let mut instance = Instance::new("Dynamic", Arc::clone(&registry), InstanceConfig::default())
    .unwrap();
  let context = RunContext::from([("child_class".to_string(), "Sub".to_string())]);
  instance.initialize(context).unwrap();
  instance.start().unwrap();
  assert_eq!(active_names(&instance), vec!["X"]);
  assert!(!registry.class("Dynamic").unwrap().has_path_guid_cache());

  // Unset variable leaves the reference empty; it is then a leaf of its own.
  let mut empty = Instance::new("Dynamic", registry, InstanceConfig::default()).unwrap();
  empty.initialize(RunContext::new()).unwrap();
  empty.start().unwrap();
  assert_eq!(active_names(&empty), vec!["Child"]);
  assert!(empty.get_all_referenced_instances(true).is_empty());
}

#[test]
fn self_reference_is_left_empty() {
  let mut b = MachineBuilder::new("Loop");
  b.reference("Again", "Loop");
  let counts = HookCounts::default();
  let registry = registry(&counts, vec![b.build()]);
  let instance = started(&registry, "Loop", InstanceConfig::default());
  assert!(
    instance
      .warnings()
      .iter()
      .any(|w| matches!(w, ValidationWarning::ReferenceCycle { .. }))
  );
  assert_eq!(active_names(&instance), vec!["Again"]);
}

#[test]
fn restore_with_redirect_skips_the_entry_state() {
  let counts = HookCounts::default();
  let registry = registry(&counts, vec![linear()]);
  let mut first = started(&registry, "Linear", InstanceConfig::default());
  first.update(0.1).unwrap();
  let saved = first.capture_active_set();
  assert_eq!(active_names(&first), vec!["B"]);

  let before = counts.get("A", "enter");
  let old = crate::NodeId::from_path("renamed/B");
  let mut second = Instance::new("Linear", registry, InstanceConfig::default()).unwrap();
  second.initialize(RunContext::new()).unwrap();
  second.set_guid_redirect_map(HashMap::from([(old, saved[0])]));
  assert_eq!(second.restore_active_set(&[old]).unwrap(), 1);
  assert_eq!(active_names(&second), vec!["B"]);
  assert_eq!(counts.get("A", "enter"), before);
  // Loading is only possible before start.
  assert_eq!(second.load_from_multiple_states(&saved), 0);
}

fn layered() -> StateMachineClass {
  let mut inner = MachineBuilder::new("Inner");
  let p = inner.state("P");
  let q = inner.state("Q");
  inner.conditional_transition(p, q, "context_flag:advance");

  let mut b = MachineBuilder::new("Layered");
  let nested = b.nested(inner);
  let reference = b.reference("Ref", "Sub");
  let lamp = b.state("Lamp");
  let lit = b.state("Lit");
  b.conditional_transition(lamp, lit, "context_flag:advance");
  b.entry(nested).entry(reference).entry(lamp);
  b.machine_mut().allow_parallel_entry_states = true;
  b.build()
}

#[test]
fn parallel_nested_and_referenced_states_restore_identically() {
  let counts = HookCounts::default();
  let registry = registry(&counts, vec![sub(), layered()]);
  let mut first = started(&registry, "Layered", InstanceConfig::default());
  first.context().set("advance", "true");
  for _ in 0..4 {
    first.update(0.1).unwrap();
  }
  let mut expected = active_names(&first);
  expected.sort();
  assert_eq!(expected, vec!["Lit", "Q", "Y"]);
  let mut saved = first.capture_active_set();
  assert_eq!(saved.len(), 3);

  let mut second = Instance::new("Layered", registry, InstanceConfig::default()).unwrap();
  second.initialize(RunContext::new()).unwrap();
  assert_eq!(second.restore_active_set(&saved).unwrap(), 3);
  let mut names = active_names(&second);
  names.sort();
  assert_eq!(names, expected);
  let mut restored = second.capture_active_set();
  restored.sort();
  saved.sort();
  assert_eq!(restored, saved);
}

#[test]
fn redirect_chains_are_not_followed_on_load() {
  let counts = HookCounts::default();
  let registry = registry(&counts, vec![linear()]);
  let mut first = started(&registry, "Linear", InstanceConfig::default());
  first.update(0.1).unwrap();
  let saved = first.capture_active_set();

  let oldest = crate::NodeId::from_path("renamed/twice/B");
  let old = crate::NodeId::from_path("renamed/B");
  let mut second = Instance::new("Linear", registry, InstanceConfig::default()).unwrap();
  second.initialize(RunContext::new()).unwrap();
  second.set_guid_redirect_map(HashMap::from([(oldest, old), (old, saved[0])]));
  assert_eq!(second.load_from_multiple_states(&[oldest]), 0);
  assert!(second.state_info(oldest).is_none());
  assert_eq!(second.load_from_multiple_states(&[old]), 1);
  assert_eq!(second.state_info(old).map(|info| info.name), Some("B".to_string()));
}

#[test]
fn restore_into_reference_marks_the_reference() {
  let counts = HookCounts::default();
  let registry = registry(&counts, vec![sub(), twin()]);
  let mut first = started(&registry, "Twin", InstanceConfig::default());
  first.context().set("advance", "true");
  first.update(0.1).unwrap();
  let saved = first.checkpoint();
  assert_eq!(active_names(&first), vec!["Y", "Y"]);

  let mut second = Instance::new("Twin", registry, InstanceConfig::default()).unwrap();
  second.initialize(RunContext::new()).unwrap();
  // Restore only the right reference's leaf.
  assert_eq!(second.restore_active_set(&saved.active_states[1..]).unwrap(), 1);
  assert_eq!(second.capture_active_set(), saved.active_states[1..].to_vec());
}

#[test]
fn switch_by_qualified_name_descends_into_nested_machines() {
  let mut inner = MachineBuilder::new("Inner");
  inner.state("X");
  inner.state("Y");
  let mut b = MachineBuilder::new("Switch");
  b.state("A");
  b.nested(inner);
  let counts = HookCounts::default();
  let registry = registry(&counts, vec![b.build()]);
  let mut instance = started(&registry, "Switch", InstanceConfig::default());

  assert!(instance.switch_active_state_by_qualified_name("Root.Inner.Y", true));
  assert_eq!(active_names(&instance), vec!["Y"]);
  assert_eq!(
    instance.find_state_by_qualified_name("Inner.Y"),
    instance.capture_active_set().first().copied()
  );
  assert!(instance.switch_active_state_by_qualified_name("A", false));
  assert_eq!(active_names(&instance), vec!["Y", "A"]);
  assert!(!instance.switch_active_state_by_qualified_name("Inner.Missing", true));
}

#[test]
fn switch_by_qualified_name_descends_into_references() {
  let counts = HookCounts::default();
  let registry = registry(&counts, vec![sub(), twin()]);
  let mut instance = started(&registry, "Twin", InstanceConfig::default());
  assert!(instance.switch_active_state_by_qualified_name("Right.Y", true));
  assert_eq!(active_names(&instance), vec!["Y"]);
  let right_y = instance.find_state_by_qualified_name("Root.Right.Y").unwrap();
  assert_eq!(instance.capture_active_set(), vec![right_y]);
}

#[test]
fn state_info_reports_kind_and_activity() {
  let counts = HookCounts::default();
  let registry = registry(&counts, vec![sub(), twin()]);
  let mut instance = started(&registry, "Twin", InstanceConfig::default());
  instance.update(0.25).unwrap();
  let root = instance.state_info(instance.root_guid().unwrap()).unwrap();
  assert_eq!(root.kind, NodeKindTag::StateMachine);
  assert_eq!(root.name, "Root");
  let left = instance.find_state_by_qualified_name("Left").unwrap();
  let info = instance.state_info(left).unwrap();
  assert_eq!(info.kind, NodeKindTag::Reference);
  assert_eq!(info.referenced_class.as_deref(), Some("Sub"));
  assert!(!info.dynamic_reference);
  assert!(info.active);
  assert!((info.time_in_state - 0.25).abs() < f32::EPSILON);
  let x = instance.find_state_by_qualified_name("Left.X").unwrap();
  assert_eq!(instance.state_info(x).unwrap().class_name, "Sub");
}

#[test]
fn state_info_lists_transitions_of_a_state() {
  let class = linear();
  let b_id = class.machine.states[1].id;
  let counts = HookCounts::default();
  let registry = registry(&counts, vec![class]);
  let instance = started(&registry, "Linear", InstanceConfig::default());
  let a = instance.find_state_by_qualified_name("A").unwrap();
  let b = instance.find_state_by_qualified_name("B").unwrap();
  let a = instance.state_info(a).unwrap();
  let b = instance.state_info(b).unwrap();
  assert_eq!(b.node_id, b_id);
  assert!(a.incoming.is_empty());
  assert_eq!(a.outgoing.len(), 1);
  assert_eq!(b.incoming, a.outgoing);
  assert_eq!(b.outgoing.len(), 1);
  assert_eq!(b.referenced_class, None);
}

#[test]
fn async_initialization_installs_the_graph() {
  let counts = HookCounts::default();
  let registry = registry(&counts, vec![linear()]);
  let mut instance = Instance::new("Linear", registry, InstanceConfig::default()).unwrap();
  let done = Arc::new(AtomicBool::new(false));
  let flag = Arc::clone(&done);
  instance
    .initialize_async(RunContext::new(), move |i: &Instance| {
      flag.store(i.is_initialized(), Ordering::SeqCst);
    })
    .unwrap();
  assert!(instance.is_initializing_async());
  assert!(matches!(instance.start(), Err(InstanceError::InitializingAsync)));
  assert!(matches!(instance.update(0.1), Err(InstanceError::InitializingAsync)));
  instance.wait_for_async_initialization().unwrap();
  assert!(done.load(Ordering::SeqCst));
  assert!(!instance.is_initializing_async());
  instance.start().unwrap();
  assert_eq!(active_names(&instance), vec!["A"]);
}

#[test]
fn polling_without_async_initialization_is_an_error() {
  let counts = HookCounts::default();
  let registry = registry(&counts, vec![linear()]);
  let mut instance = Instance::new("Linear", registry, InstanceConfig::default()).unwrap();
  assert!(matches!(
    instance.poll_async_initialization(),
    Err(InstanceError::NoAsyncInitialization)
  ));
}

#[test]
fn execution_log_records_each_chain() {
  let counts = HookCounts::default();
  let registry = registry(&counts, vec![linear()]);
  let config = InstanceConfig {
    record_execution_log: true,
    ..InstanceConfig::default()
  };
  let mut instance = started(&registry, "Linear", config);
  instance.update(0.1).unwrap();
  instance.update(0.1).unwrap();
  let log = instance.execution_log().unwrap();
  assert_eq!(log.steps.len(), 2);
  assert_eq!(log.steps[0].step, 1);
  assert_eq!(log.steps[1].destination_name, "C");
  assert_eq!(log.steps[1].active_states_after, instance.capture_active_set());
}
