//! Errors returned by the instance API.

/// Caller-contract violations and build failures of an [crate::Instance].
#[derive(Debug, thiserror::Error)]
pub enum InstanceError {
  #[error("instance is not initialized")]
  NotInitialized,
  #[error("instance is already initialized")]
  AlreadyInitialized,
  #[error("instance is still initializing asynchronously")]
  InitializingAsync,
  #[error("asynchronous initialization ended without a result")]
  AsyncInitializationDropped,
  #[error("no asynchronous initialization is pending")]
  NoAsyncInitialization,
  #[error("unknown state machine class `{0}`")]
  UnknownClass(String),
}
