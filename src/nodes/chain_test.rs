//! Tests for transition chain resolution.

use crate::builder::MachineBuilder;
use crate::test_support::{HookCounts, active_names, registry, started};
use crate::types::{CompiledStateKind, InstanceConfig};

fn run(class: MachineBuilder, ticks: usize) -> (crate::Instance, HookCounts) {
  let counts = HookCounts::default();
  let class = class.build();
  let name = class.name.clone();
  let registry = registry(&counts, vec![class]);
  let mut instance = started(&registry, &name, InstanceConfig::default());
  for _ in 0..ticks {
    instance.update(0.1).unwrap();
  }
  (instance, counts)
}

#[test]
fn inline_conduit_is_passed_through() {
  let mut b = MachineBuilder::new("Inline");
  let a = b.state("A");
  let c = b.conduit("C", true, Some("yes"));
  let target = b.state("B");
  b.transition(a, c);
  b.transition(c, target);
  let (instance, counts) = run(b, 1);
  assert_eq!(active_names(&instance), vec!["B"]);
  assert_eq!(counts.get("C", "enter"), 0);
  assert_eq!(counts.get("C", "eval"), 1);
}

#[test]
fn closed_conduit_stalls_the_source() {
  let mut b = MachineBuilder::new("Stall");
  let a = b.state("A");
  let c = b.conduit("C", true, Some("no"));
  let target = b.state("B");
  b.transition(a, c);
  b.transition(c, target);
  let (instance, _) = run(b, 3);
  assert_eq!(active_names(&instance), vec!["A"]);
  assert!(!instance.is_in_end_state());
}

#[test]
fn conduit_that_cannot_evaluate_stalls_the_source() {
  let mut b = MachineBuilder::new("Disabled");
  let a = b.state("A");
  let c = b.conduit("C", true, Some("yes"));
  let target = b.state("B");
  b.transition(a, c);
  b.transition(c, target);
  if let Some(CompiledStateKind::Conduit { can_evaluate, .. }) =
    b.state_mut(c).map(|s| &mut s.kind)
  {
    *can_evaluate = false;
  }
  let (instance, counts) = run(b, 10);
  assert_eq!(active_names(&instance), vec!["A"]);
  assert_eq!(counts.get("C", "eval"), 0);
  assert_eq!(counts.get("B", "enter"), 0);
}

#[test]
fn any_state_chain_through_conduit_skips_excluded_state() {
  let mut b = MachineBuilder::new("Excluding");
  let a = b.state("A");
  let c = b.conduit("C", true, None);
  let excluded = b.state("Excluded");
  let any = b.any_state("Any", false);
  b.transition(any, c);
  b.transition(c, excluded);
  b.state_mut(excluded).unwrap().exclude_from_any_state = true;
  b.entry(a);
  let (instance, _) = run(b, 3);
  assert_eq!(active_names(&instance), vec!["A"]);
}

#[test]
fn any_state_chain_through_conduit_does_not_reenter_source() {
  let mut b = MachineBuilder::new("Looping");
  let a = b.state_with_behavior("A", "record");
  let c = b.conduit("C", true, None);
  let any = b.any_state("Any", false);
  b.transition(any, c);
  b.transition(c, a);
  b.entry(a);
  let (instance, counts) = run(b, 3);
  assert_eq!(active_names(&instance), vec!["A"]);
  assert_eq!(counts.get("A", "enter"), 1);
  assert_eq!(counts.get("A", "exit"), 0);
}

#[test]
fn stateful_conduit_becomes_active() {
  let mut b = MachineBuilder::new("Stateful");
  let a = b.state("A");
  let c = b.conduit("C", false, None);
  let target = b.state("B");
  b.transition(a, c);
  b.transition(c, target);
  let (instance, _) = run(b.clone(), 1);
  assert_eq!(active_names(&instance), vec!["C"]);
  let (instance, _) = run(b, 2);
  assert_eq!(active_names(&instance), vec!["B"]);
}

#[test]
fn link_state_is_transparent() {
  let mut b = MachineBuilder::new("Link");
  let a = b.state("A");
  let target = b.state("B");
  let last = b.state("C");
  let link = b.link_state("ToB", target);
  b.transition(a, link);
  b.transition(link, last);
  let (instance, _) = run(b.clone(), 1);
  assert_eq!(active_names(&instance), vec!["B"]);
  // The transition leaving the link belongs to its target.
  let (instance, _) = run(b, 2);
  assert_eq!(active_names(&instance), vec!["C"]);
}

#[test]
fn lowest_priority_wins() {
  let mut b = MachineBuilder::new("Priority");
  let a = b.state("A");
  let late = b.state("Late");
  let early = b.state("Early");
  b.transition(a, late).priority = 2;
  b.transition(a, early).priority = 1;
  let (instance, _) = run(b, 1);
  assert_eq!(active_names(&instance), vec!["Early"]);
}

#[test]
fn equal_priority_keeps_declaration_order() {
  let mut b = MachineBuilder::new("Ties");
  let a = b.state("A");
  let first = b.state("First");
  let second = b.state("Second");
  b.transition(a, first);
  b.transition(a, second);
  let (instance, _) = run(b, 1);
  assert_eq!(active_names(&instance), vec!["First"]);
}

#[test]
fn parallel_transitions_keep_the_source() {
  let mut b = MachineBuilder::new("Parallel");
  let a = b.state("A");
  let left = b.state("Left");
  let right = b.state("Right");
  b.transition(a, left).run_parallel = true;
  b.transition(a, right).run_parallel = true;
  let (instance, _) = run(b, 1);
  assert_eq!(active_names(&instance), vec!["A", "Left", "Right"]);
}

#[test]
fn conduit_cycle_does_not_loop() {
  let mut b = MachineBuilder::new("Cycle");
  let a = b.state("A");
  let one = b.conduit("One", true, None);
  let two = b.conduit("Two", true, None);
  b.transition(a, one);
  b.transition(one, two);
  b.transition(two, one);
  let (instance, _) = run(b, 2);
  assert_eq!(active_names(&instance), vec!["A"]);
}
