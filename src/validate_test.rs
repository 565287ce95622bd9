//! Tests for class validation.

use crate::builder::MachineBuilder;
use crate::registry::ClassRegistry;
use crate::types::{CompiledState, CompiledStateKind, NodeId};
use crate::validate::{ValidationWarning, find_reference_cycles, validate_class};

#[test]
fn clean_class_has_no_warnings() {
  let mut b = MachineBuilder::new("Clean");
  let a = b.state("A");
  let c = b.state("B");
  b.transition(a, c);
  let mut class = b.build();
  assert!(validate_class(&mut class).is_empty());
}

#[test]
fn duplicate_guid_in_same_machine_is_regenerated() {
  let mut b = MachineBuilder::new("Dup");
  let a = b.state("A");
  let mut twin = CompiledState::new("Twin", CompiledStateKind::State);
  twin.id = a;
  b.add_state(twin);
  let mut class = b.build();
  let warnings = validate_class(&mut class);
  assert!(matches!(
    &warnings[..],
    [ValidationWarning::DuplicateGuid { name, old, .. }] if name == "Twin" && *old == a
  ));
  assert_eq!(class.machine.states[0].id, a);
  assert_ne!(class.machine.states[1].id, a);
}

#[test]
fn duplicate_guid_in_nested_machine_rewrites_its_scope() {
  let mut inner = MachineBuilder::new("Inner");
  let x = inner.state("X");
  let y = inner.state("Y");
  inner.transition(x, y);
  let mut b = MachineBuilder::new("Outer");
  let mut outer_x = CompiledState::new("OuterX", CompiledStateKind::State);
  outer_x.id = x;
  b.add_state(outer_x);
  b.nested(inner);
  let mut class = b.build();
  let warnings = validate_class(&mut class);
  assert_eq!(warnings.len(), 1);
  let nested = class.machine.states[1].machine().unwrap();
  let new_x = nested.states[0].id;
  assert_ne!(new_x, x);
  assert_eq!(nested.transitions[0].from, new_x);
  assert_eq!(nested.entry_states, vec![new_x]);
}

#[test]
fn structural_defects_are_reported() {
  let mut b = MachineBuilder::new("Broken");
  let a = b.state("A");
  let safe = b.state("Safe");
  b.state_mut(safe).unwrap().exclude_from_any_state = true;
  let any = b.any_state("Any", false);
  b.transition(any, safe);
  b.transition(a, NodeId::new());
  b.link_state("Nowhere", NodeId::new());
  b.entry(NodeId::new());
  let mut class = b.build();
  let warnings = validate_class(&mut class);
  let has = |f: fn(&ValidationWarning) -> bool| warnings.iter().any(f);
  assert!(has(|w| matches!(w, ValidationWarning::UnknownTransitionEndpoint { .. })));
  assert!(has(|w| matches!(w, ValidationWarning::AnyStateTargetExcluded { .. })));
  assert!(has(|w| matches!(w, ValidationWarning::DanglingLinkState { .. })));
  assert!(has(|w| matches!(w, ValidationWarning::UnknownEntryState { .. })));
}

#[test]
fn reference_cycles_and_missing_classes_are_found() {
  let mut registry = ClassRegistry::new();
  let mut a = MachineBuilder::new("A");
  a.reference("ToB", "B");
  let mut b = MachineBuilder::new("B");
  b.reference("ToA", "A");
  b.reference("ToGhost", "Ghost");
  registry.register_class(a.build());
  registry.register_class(b.build());
  let warnings = find_reference_cycles(&registry, "A");
  assert!(warnings.contains(&ValidationWarning::ReferenceCycle {
    path: vec!["A".to_string(), "B".to_string(), "A".to_string()],
  }));
  assert!(warnings.contains(&ValidationWarning::MissingReferenceClass {
    class: "B".to_string(),
    missing: "Ghost".to_string(),
  }));
}

#[test]
fn warnings_render_readable_messages() {
  let warning = ValidationWarning::ReferenceCycle {
    path: vec!["A".to_string(), "B".to_string(), "A".to_string()],
  };
  assert_eq!(warning.to_string(), "reference cycle: A -> B -> A");
}
