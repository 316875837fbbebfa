//! Engine errors.

use operon_workspace::WorkspaceError;

/// Errors reported synchronously to the engine's caller.
///
/// Job submission and polling failures are not surfaced here; they
/// transition the affected block to `Failed` and the status snapshot is
/// the signal.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
  /// A store operation was rejected; nothing was mutated.
  #[error(transparent)]
  Workspace(#[from] WorkspaceError),

  /// `start_loop` preconditions were not met; loop state is unchanged.
  #[error("loop is not ready to start: {0}")]
  LoopPrecondition(String),

  /// The event loop was started twice.
  #[error("engine event loop already running")]
  AlreadyRunning,
}
