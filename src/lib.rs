//! # logic-driver-runtime
//!
//! Runtime engine for hierarchical finite state machines compiled from visual graphs.
//!
//! ## Architecture
//!
//! A compiled [types::StateMachineClass] is registered in a [ClassRegistry] together with
//! the behavior factories its nodes name. An [Instance] builds a runtime graph from the
//! class: states, conduits, nested and referenced machines, link and any-state markers, and
//! transitions. Each [Instance::update] ticks the root machine, which evaluates transition
//! chains, moves its active set and recurses into nested machines and references.
//!
//! Active sets are persisted as path guids ([Instance::capture_active_set],
//! [checkpoint_io]) and restored before start ([Instance::restore_active_set]).

pub mod behavior;
pub mod builder;
pub mod checkpoint_io;
#[cfg(test)]
mod checkpoint_io_test;
pub mod error;
pub mod execution_log_io;
pub mod guid_map;
pub mod guid_path;
pub mod instance;
#[cfg(test)]
mod instance_test;
pub mod nodes;
pub mod registry;
#[cfg(test)]
mod test_support;
pub mod types;
pub mod validate;
#[cfg(test)]
mod validate_test;

pub use behavior::{HookContext, NodeBehavior};
pub use builder::MachineBuilder;
pub use error::InstanceError;
pub use instance::{Instance, StateInfo};
pub use registry::ClassRegistry;
pub use types::{Checkpoint, InstanceConfig, NodeId, SharedContext, StateMachineClass};
pub use validate::ValidationWarning;
