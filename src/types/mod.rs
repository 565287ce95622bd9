//! Plain data types: node ids, the compiled node contract, configuration and the records an
//! instance persists (checkpoints, execution logs, state history).

use std::collections::HashMap;

mod checkpoint;
mod compiled;
mod config;
mod context;
mod execution_log;
mod node_id;
mod state_history;
#[cfg(test)]
mod state_history_test;

pub use checkpoint::Checkpoint;
pub use compiled::{
  BooleanMode, CompiledReference, CompiledState, CompiledStateKind, CompiledStateMachine,
  CompiledTransition, ConditionMode, StateMachineClass, TransitionStackEntry,
};
pub use config::InstanceConfig;
pub use context::SharedContext;
pub use execution_log::{ExecutionLog, TransitionStepEntry};
pub use node_id::NodeId;
pub use state_history::{DEFAULT_STATE_HISTORY_MAX_COUNT, StateHistory, StateHistoryEntry};

/// Key-value context owned by an instance and visible to behaviors.
pub type RunContext = HashMap<String, String>;
