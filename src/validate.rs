//! Structural checks over compiled classes, run when a class is registered.
//!
//! Duplicate guids are repaired in place. Every other defect is reported and the offending
//! construct is left inert at runtime.

use std::collections::HashSet;
use tracing::{instrument, warn};

use crate::nodes::ROOT_NODE_NAME;
use crate::registry::ClassRegistry;
use crate::types::{CompiledStateKind, CompiledStateMachine, NodeId, StateMachineClass};

/// A structural defect found in a compiled class.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationWarning {
  #[error("duplicate guid {old} on `{name}` in class `{class}` regenerated as {new}")]
  DuplicateGuid {
    class: String,
    name: String,
    old: NodeId,
    new: NodeId,
  },
  #[error("transition {transition} in class `{class}` references unknown node {missing}")]
  UnknownTransitionEndpoint {
    class: String,
    transition: NodeId,
    missing: NodeId,
  },
  #[error("link state `{name}` in class `{class}` has no valid target")]
  DanglingLinkState { class: String, name: String },
  #[error("entry state {id} in class `{class}` is not a state of its machine")]
  UnknownEntryState { class: String, id: NodeId },
  #[error("state machine `{name}` in class `{class}` has no entry state")]
  EmptyStateMachine { class: String, name: String },
  #[error(
    "any state transition {transition} in class `{class}` targets `{target}`, which is excluded from any state"
  )]
  AnyStateTargetExcluded {
    class: String,
    transition: NodeId,
    target: String,
  },
  #[error("class `{class}` references unknown class `{missing}`")]
  MissingReferenceClass { class: String, missing: String },
  #[error("reference cycle: {}", path.join(" -> "))]
  ReferenceCycle { path: Vec<String> },
}

/// Repairs duplicate guids and reports structural defects of `class`.
#[instrument(level = "trace", skip(class), fields(class = %class.name))]
pub fn validate_class(class: &mut StateMachineClass) -> Vec<ValidationWarning> {
  let mut warnings = Vec::new();
  let mut seen = HashSet::from([class.root_id]);
  repair_duplicate_guids(&class.name, &mut class.machine, &mut seen, &mut warnings);

  let class_name = class.name.clone();
  class.for_each_machine(&mut |owner, machine| {
    let name = if owner == class.root_id {
      ROOT_NODE_NAME.to_string()
    } else {
      find_state_name(&class.machine, owner).unwrap_or_default()
    };
    check_machine(&class_name, &name, machine, &mut warnings);
  });

  for warning in &warnings {
    warn!(%warning, "class validation");
  }
  warnings
}

fn find_state_name(machine: &CompiledStateMachine, id: NodeId) -> Option<String> {
  machine.states.iter().find_map(|s| {
    if s.id == id {
      Some(s.name.clone())
    } else {
      s.machine().and_then(|m| find_state_name(m, id))
    }
  })
}

/// First occurrence keeps its guid. A later one is regenerated and, when the first lives in
/// another machine, every reference in its own machine is rewritten.
fn repair_duplicate_guids(
  class: &str,
  machine: &mut CompiledStateMachine,
  seen: &mut HashSet<NodeId>,
  warnings: &mut Vec<ValidationWarning>,
) {
  for i in 0..machine.states.len() {
    let old = machine.states[i].id;
    if seen.insert(old) {
      continue;
    }
    let new = NodeId::new();
    let same_scope = machine.states[..i].iter().any(|s| s.id == old);
    machine.states[i].id = new;
    seen.insert(new);
    if !same_scope {
      rewrite_scoped_references(machine, old, new);
    }
    warnings.push(ValidationWarning::DuplicateGuid {
      class: class.to_string(),
      name: machine.states[i].name.clone(),
      old,
      new,
    });
  }
  for transition in &mut machine.transitions {
    if seen.insert(transition.id) {
      continue;
    }
    let old = transition.id;
    transition.id = NodeId::new();
    seen.insert(transition.id);
    warnings.push(ValidationWarning::DuplicateGuid {
      class: class.to_string(),
      name: transition.name.clone(),
      old,
      new: transition.id,
    });
  }
  for state in &mut machine.states {
    if let Some(nested) = state.machine_mut() {
      repair_duplicate_guids(class, nested, seen, warnings);
    }
  }
}

fn rewrite_scoped_references(machine: &mut CompiledStateMachine, old: NodeId, new: NodeId) {
  for t in &mut machine.transitions {
    if t.from == old {
      t.from = new;
    }
    if t.to == old {
      t.to = new;
    }
  }
  for entry in &mut machine.entry_states {
    if *entry == old {
      *entry = new;
    }
  }
  for state in &mut machine.states {
    if let CompiledStateKind::LinkState { linked_state } = &mut state.kind
      && *linked_state == Some(old)
    {
      *linked_state = Some(new);
    }
  }
}

fn check_machine(
  class: &str,
  name: &str,
  machine: &CompiledStateMachine,
  warnings: &mut Vec<ValidationWarning>,
) {
  let ids: HashSet<NodeId> = machine.states.iter().map(|s| s.id).collect();
  let kind_of = |id: NodeId| machine.states.iter().find(|s| s.id == id).map(|s| &s.kind);

  for t in &machine.transitions {
    for endpoint in [t.from, t.to] {
      if !ids.contains(&endpoint) {
        warnings.push(ValidationWarning::UnknownTransitionEndpoint {
          class: class.to_string(),
          transition: t.id,
          missing: endpoint,
        });
      }
    }
    if matches!(kind_of(t.from), Some(CompiledStateKind::AnyState { .. }))
      && let Some(target) = machine.states.iter().find(|s| s.id == t.to)
      && target.exclude_from_any_state
    {
      warnings.push(ValidationWarning::AnyStateTargetExcluded {
        class: class.to_string(),
        transition: t.id,
        target: target.name.clone(),
      });
    }
  }

  for state in &machine.states {
    if let CompiledStateKind::LinkState { linked_state } = &state.kind {
      let valid = linked_state.is_some_and(|target| {
        !matches!(
          kind_of(target),
          None | Some(CompiledStateKind::LinkState { .. } | CompiledStateKind::AnyState { .. })
        )
      });
      if !valid {
        warnings.push(ValidationWarning::DanglingLinkState {
          class: class.to_string(),
          name: state.name.clone(),
        });
      }
    }
  }

  for entry in &machine.entry_states {
    if !ids.contains(entry) {
      warnings.push(ValidationWarning::UnknownEntryState {
        class: class.to_string(),
        id: *entry,
      });
    }
  }
  if machine.entry_states.is_empty() {
    warnings.push(ValidationWarning::EmptyStateMachine {
      class: class.to_string(),
      name: name.to_string(),
    });
  }
}

/// Reports static reference cycles and missing referenced classes reachable from `root`.
#[instrument(level = "trace", skip(registry))]
pub fn find_reference_cycles(registry: &ClassRegistry, root: &str) -> Vec<ValidationWarning> {
  fn visit(
    registry: &ClassRegistry,
    name: &str,
    path: &mut Vec<String>,
    done: &mut HashSet<String>,
    warnings: &mut Vec<ValidationWarning>,
  ) {
    if let Some(pos) = path.iter().position(|p| p == name) {
      let mut cycle = path[pos..].to_vec();
      cycle.push(name.to_string());
      warnings.push(ValidationWarning::ReferenceCycle { path: cycle });
      return;
    }
    if !done.insert(name.to_string()) {
      return;
    }
    let Some(class) = registry.class(name) else {
      return;
    };
    path.push(name.to_string());
    for referenced in class.referenced_class_names() {
      if registry.class(&referenced).is_none() {
        warnings.push(ValidationWarning::MissingReferenceClass {
          class: name.to_string(),
          missing: referenced,
        });
        continue;
      }
      visit(registry, &referenced, path, done, warnings);
    }
    path.pop();
  }

  let mut warnings = Vec::new();
  visit(registry, root, &mut Vec::new(), &mut HashSet::new(), &mut warnings);
  warnings
}
