//! Query interface: readiness checks, blocking retrieval and batch probes.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use pact_store::{Promise, PromiseState, PromiseStore};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::json;
use tracing::debug;

use crate::error::Error;
use crate::input::KeyList;

/// Backoff used while waiting for a promise written by another process.
///
/// In-process completions wake waiters immediately; the interval only bounds
/// how long a completion recorded elsewhere can go unnoticed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
  pub initial_interval: Duration,
  pub max_interval: Duration,
  pub multiplier: u32,
}

impl Default for PollConfig {
  fn default() -> Self {
    Self {
      initial_interval: Duration::from_millis(25),
      max_interval: Duration::from_secs(1),
      multiplier: 2,
    }
  }
}

impl PollConfig {
  fn next(&self, current: Duration) -> Duration {
    current.saturating_mul(self.multiplier).min(self.max_interval)
  }
}

/// Observed status of one key in a batch probe.
#[derive(Debug, Clone, PartialEq)]
pub enum Status {
  /// Pending or running.
  Running,
  Resolved(serde_json::Value),
  Rejected(String),
  /// The key could not be read (unknown key or store failure).
  Unavailable(String),
}

/// One element of a [`Queries::probe_status`] response.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusEntry {
  pub key: String,
  pub status: Status,
}

impl Serialize for StatusEntry {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(2))?;
    map.serialize_entry("key", &self.key)?;
    match &self.status {
      Status::Running => map.serialize_entry("status", "running")?,
      Status::Resolved(value) => map.serialize_entry("status", value)?,
      Status::Rejected(error) => map.serialize_entry("status", &json!({ "error": error }))?,
      Status::Unavailable(error) => map.serialize_entry("error", error)?,
    }
    map.end()
  }
}

/// Read-only access to promises.
#[derive(Clone)]
pub struct Queries {
  store: Arc<dyn PromiseStore>,
  poll: PollConfig,
}

impl Queries {
  pub fn new(store: Arc<dyn PromiseStore>) -> Self {
    Self::with_poll_config(store, PollConfig::default())
  }

  pub fn with_poll_config(store: Arc<dyn PromiseStore>, poll: PollConfig) -> Self {
    Self { store, poll }
  }

  /// Whether the promise has reached a terminal state. Never blocks.
  pub async fn check_ready(&self, key: &str) -> Result<bool, Error> {
    Ok(self.store.get(key).await?.is_terminal())
  }

  /// Current lifecycle state of the promise. Never blocks.
  pub async fn state(&self, key: &str) -> Result<PromiseState, Error> {
    Ok(self.store.get(key).await?.state)
  }

  /// Wait for the promise to finish and return its result.
  ///
  /// A rejected promise yields [`Error::StepFailure`]. With a timeout, giving
  /// up yields [`Error::Timeout`] and leaves the execution running; a later
  /// call can still collect it.
  pub async fn get_result(
    &self,
    key: &str,
    timeout: Option<Duration>,
  ) -> Result<serde_json::Value, Error> {
    match timeout {
      None => self.wait(key).await,
      Some(limit) => tokio::time::timeout(limit, self.wait(key))
        .await
        .map_err(|_| Error::Timeout {
          key: key.to_string(),
          waited: limit,
        })?,
    }
  }

  /// Status of every key, in input order. Never blocks and never fails as a
  /// whole: unreadable keys become [`Status::Unavailable`] entries.
  pub async fn probe_status(&self, keys: &[String]) -> Vec<StatusEntry> {
    let mut entries = Vec::with_capacity(keys.len());
    for key in keys {
      let status = match self.store.get(key).await {
        Ok(promise) => match settle(promise) {
          None => Status::Running,
          Some(Ok(value)) => Status::Resolved(value),
          Some(Err(Error::StepFailure { message, .. })) => Status::Rejected(message),
          Some(Err(e)) => Status::Unavailable(e.to_string()),
        },
        Err(e) => Status::Unavailable(Error::from(e).to_string()),
      };
      entries.push(StatusEntry {
        key: key.clone(),
        status,
      });
    }
    entries
  }

  /// Wait for every key and collect each outcome.
  ///
  /// Keys are awaited concurrently under one shared timeout. A rejected,
  /// unknown or timed-out key only affects its own entry.
  pub async fn await_results(
    &self,
    keys: &[String],
    timeout: Option<Duration>,
  ) -> BTreeMap<String, Result<serde_json::Value, Error>> {
    let waits = keys.iter().map(|key| async move {
      let outcome = self.get_result(key, timeout).await;
      (key.clone(), outcome)
    });
    futures::future::join_all(waits).await.into_iter().collect()
  }

  /// Like [`Queries::await_results`], but returns the first failure as soon
  /// as it happens instead of a mixed mapping.
  pub async fn await_results_strict(
    &self,
    keys: &[String],
    timeout: Option<Duration>,
  ) -> Result<BTreeMap<String, serde_json::Value>, Error> {
    let waits = keys.iter().map(|key| async move {
      let value = self.get_result(key, timeout).await?;
      Ok::<_, Error>((key.clone(), value))
    });
    Ok(futures::future::try_join_all(waits).await?.into_iter().collect())
  }

  /// JSON form of [`Queries::probe_status`].
  ///
  /// Input that is not a key list yields `{"error": "invalid input"}`.
  pub async fn probe_status_json(&self, input: &serde_json::Value) -> serde_json::Value {
    let keys = match KeyList::parse(input) {
      Ok(keys) => keys,
      Err(e) => return invalid_input(e),
    };
    let entries = self.probe_status(keys.keys()).await;
    serde_json::to_value(entries).unwrap_or_else(|e| json!({ "error": e.to_string() }))
  }

  /// JSON form of [`Queries::await_results`]: a map from key to result, with
  /// failed keys mapped to `{"error": message}`.
  pub async fn await_results_json(
    &self,
    input: &serde_json::Value,
    timeout: Option<Duration>,
  ) -> serde_json::Value {
    let keys = match KeyList::parse(input) {
      Ok(keys) => keys,
      Err(e) => return invalid_input(e),
    };
    let results = self.await_results(keys.keys(), timeout).await;
    let map: serde_json::Map<String, serde_json::Value> = results
      .into_iter()
      .map(|(key, outcome)| {
        let value = outcome.unwrap_or_else(|e| json!({ "error": failure_message(e) }));
        (key, value)
      })
      .collect();
    serde_json::Value::Object(map)
  }

  async fn wait(&self, key: &str) -> Result<serde_json::Value, Error> {
    let mut completions = self.store.subscribe();
    let mut interval = self.poll.initial_interval;

    loop {
      // Mark the current completion count seen before reading, so a
      // completion landing between the read and the wait is not missed.
      completions.borrow_and_update();
      let promise = self.store.get(key).await?;
      if let Some(outcome) = settle(promise) {
        return outcome;
      }

      tokio::select! {
        changed = completions.changed() => {
          if changed.is_err() {
            tokio::time::sleep(interval).await;
          }
        }
        _ = tokio::time::sleep(interval) => {
          interval = self.poll.next(interval);
          debug!(key = %key, next_interval = ?interval, "promise still pending");
        }
      }
    }
  }
}

/// The outcome of a terminal promise, or `None` while it is still in flight.
fn settle(promise: Promise) -> Option<Result<serde_json::Value, Error>> {
  match promise.state {
    PromiseState::Pending | PromiseState::Running => None,
    PromiseState::Resolved => Some(Ok(promise.result.unwrap_or(serde_json::Value::Null))),
    PromiseState::Rejected => Some(Err(Error::StepFailure {
      key: promise.key,
      message: promise.error.unwrap_or_default(),
    })),
  }
}

/// The message stored for a failed key: the captured step error itself for
/// rejections, the error description otherwise.
fn failure_message(err: Error) -> String {
  match err {
    Error::StepFailure { message, .. } => message,
    other => other.to_string(),
  }
}

fn invalid_input(err: Error) -> serde_json::Value {
  debug!(error = %err, "rejecting batch query");
  json!({ "error": "invalid input" })
}
