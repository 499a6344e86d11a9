use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;

use crate::{Error, Promise, PromiseState, PromiseStore};

/// In-memory promise store.
///
/// Records live as long as the process. Suitable for tests and for
/// deployments where submitter and pollers share one process.
#[derive(Clone)]
pub struct InMemoryStore {
  promises: Arc<Mutex<HashMap<String, Promise>>>,
  completions: Arc<watch::Sender<u64>>,
}

impl InMemoryStore {
  pub fn new() -> Self {
    let (completions, _) = watch::channel(0);
    Self {
      promises: Arc::new(Mutex::new(HashMap::new())),
      completions: Arc::new(completions),
    }
  }

  fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Promise>>, Error> {
    self
      .promises
      .lock()
      .map_err(|e| Error::Lock(e.to_string()))
  }

  /// Apply `update` to the promise for `key` if it is currently in `from`.
  fn transition(
    &self,
    key: &str,
    from: PromiseState,
    to: PromiseState,
    update: impl FnOnce(&mut Promise),
  ) -> Result<Promise, Error> {
    let mut promises = self.lock()?;
    let promise = promises
      .get_mut(key)
      .ok_or_else(|| Error::NotFound(key.to_string()))?;

    if promise.state != from {
      return Err(Error::InvalidTransition {
        key: key.to_string(),
        from: promise.state,
        to,
      });
    }

    promise.state = to;
    update(promise);
    Ok(promise.clone())
  }

  fn complete(
    &self,
    key: &str,
    to: PromiseState,
    update: impl FnOnce(&mut Promise),
  ) -> Result<Promise, Error> {
    let promise = self.transition(key, PromiseState::Running, to, |p| {
      update(p);
      p.completed_at = Some(Utc::now());
    })?;
    self.completions.send_modify(|n| *n += 1);
    Ok(promise)
  }
}

impl Default for InMemoryStore {
  fn default() -> Self {
    Self::new()
  }
}

#[async_trait]
impl PromiseStore for InMemoryStore {
  async fn create_if_absent(
    &self,
    key: &str,
    step_name: &str,
    args: &serde_json::Value,
  ) -> Result<Promise, Error> {
    let mut promises = self.lock()?;
    let promise = promises
      .entry(key.to_string())
      .or_insert_with(|| Promise::pending(key, step_name, args.clone()));
    Ok(promise.clone())
  }

  async fn mark_running(&self, key: &str) -> Result<Promise, Error> {
    self.transition(key, PromiseState::Pending, PromiseState::Running, |p| {
      p.started_at = Some(Utc::now());
    })
  }

  async fn resolve(&self, key: &str, result: serde_json::Value) -> Result<Promise, Error> {
    self.complete(key, PromiseState::Resolved, |p| p.result = Some(result))
  }

  async fn reject(&self, key: &str, error: String) -> Result<Promise, Error> {
    self.complete(key, PromiseState::Rejected, |p| p.error = Some(error))
  }

  async fn get(&self, key: &str) -> Result<Promise, Error> {
    self
      .lock()?
      .get(key)
      .cloned()
      .ok_or_else(|| Error::NotFound(key.to_string()))
  }

  async fn list(&self, state: Option<PromiseState>) -> Result<Vec<Promise>, Error> {
    let mut promises: Vec<Promise> = self
      .lock()?
      .values()
      .filter(|p| state.is_none_or(|s| p.state == s))
      .cloned()
      .collect();
    promises.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.key.cmp(&b.key)));
    Ok(promises)
  }

  fn subscribe(&self) -> watch::Receiver<u64> {
    self.completions.subscribe()
  }
}
