//! Runtime node graph of an instance and the algorithms that drive it.

mod chain;
#[cfg(test)]
mod chain_test;
pub(crate) mod graph;
pub(crate) mod runtime_node;
mod state;
mod state_machine;
mod transition;

pub use graph::ROOT_NODE_NAME;
pub use runtime_node::{NodeIndex, NodeKindTag};
pub use transition::{EvaluatedLeaf, TransitionEvaluation, fold_transition_stack};
