//! Orchestrator errors.

use std::time::Duration;

use pact_store::PromiseState;

/// Errors surfaced by the scheduler and the query interface.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// No promise exists for the key.
  #[error("promise not found: {key}")]
  NotFound { key: String },

  /// A transition was attempted from a state that does not permit it.
  #[error("invalid transition for '{key}': {from} -> {to}")]
  InvalidTransition {
    key: String,
    from: PromiseState,
    to: PromiseState,
  },

  /// The step (or one of its stages) failed; `message` is the captured error.
  #[error("step failed for '{key}': {message}")]
  StepFailure { key: String, message: String },

  /// A batch query could not be read as a list of keys.
  #[error("invalid input: {message}")]
  InvalidInput { message: String },

  /// A blocking retrieval exceeded its wait budget. The execution keeps running.
  #[error("timed out after {waited:?} waiting for '{key}'")]
  Timeout { key: String, waited: Duration },

  /// No step is registered under the submitted name.
  #[error("unknown step '{name}'")]
  UnknownStep { name: String },

  /// The scheduler no longer accepts submissions.
  #[error("scheduler is shut down")]
  ShutDown,

  /// The promise store failed.
  #[error("store error: {0}")]
  Store(#[source] pact_store::Error),
}

impl From<pact_store::Error> for Error {
  fn from(err: pact_store::Error) -> Self {
    match err {
      pact_store::Error::NotFound(key) => Self::NotFound { key },
      pact_store::Error::InvalidTransition { key, from, to } => {
        Self::InvalidTransition { key, from, to }
      }
      other => Self::Store(other),
    }
  }
}
