//! Pact Store
//!
//! This crate provides the storage trait and implementations for promises:
//! the durable records that track one keyed step invocation from submission
//! to its terminal result.
//!
//! The [`PromiseStore`] trait defines operations for:
//! - Atomically creating (or reusing) a promise for a key
//! - Moving a promise through `pending → running → resolved | rejected`
//! - Reading promises back, from this process or another one
//!
//! Two implementations are provided: [`InMemoryStore`] for tests and
//! single-process use, and [`SqliteStore`] for records that must be visible
//! to a different process than the one that submitted the work.

mod memory;
mod sqlite;
mod types;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;
pub use types::{Promise, PromiseState};

use async_trait::async_trait;
use tokio::sync::watch;

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// No promise exists for the key.
  #[error("promise not found: {0}")]
  NotFound(String),

  /// The promise is not in a state that permits the requested transition.
  #[error("invalid transition for '{key}': {from} -> {to}")]
  InvalidTransition {
    key: String,
    from: PromiseState,
    to: PromiseState,
  },

  /// A database error occurred.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),

  /// Applying the schema migrations failed.
  #[error("migration error: {0}")]
  Migrate(#[from] sqlx::migrate::MigrateError),

  /// An in-process lock was poisoned by a panicking holder.
  #[error("lock error: {0}")]
  Lock(String),
}

/// Storage trait for promises.
///
/// Every transition is atomic per key: two callers racing on the same key
/// observe exactly one winner, the other gets [`Error::InvalidTransition`].
#[async_trait]
pub trait PromiseStore: Send + Sync {
  /// Return the promise for `key`, creating it in `Pending` if absent.
  ///
  /// `step_name` and `args` are only recorded when the promise is created.
  async fn create_if_absent(
    &self,
    key: &str,
    step_name: &str,
    args: &serde_json::Value,
  ) -> Result<Promise, Error>;

  /// Transition `Pending → Running`.
  async fn mark_running(&self, key: &str) -> Result<Promise, Error>;

  /// Transition `Running → Resolved`, recording the result.
  async fn resolve(&self, key: &str, result: serde_json::Value) -> Result<Promise, Error>;

  /// Transition `Running → Rejected`, recording the failure description.
  async fn reject(&self, key: &str, error: String) -> Result<Promise, Error>;

  /// Get a promise by key.
  async fn get(&self, key: &str) -> Result<Promise, Error>;

  /// List promises, optionally filtered by state, oldest first.
  async fn list(&self, state: Option<PromiseState>) -> Result<Vec<Promise>, Error>;

  /// Subscribe to completions.
  ///
  /// The value is a counter bumped after every terminal write made through
  /// this store instance. Writes from other processes are not signalled.
  fn subscribe(&self) -> watch::Receiver<u64>;
}
