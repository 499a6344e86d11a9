//! Execution scheduler.
//!
//! Accepts keyed submissions, makes sure at most one execution proceeds per
//! key, runs the step on its own task and records the outcome in the store.

use std::any::Any;
use std::sync::Arc;

use pact_step::{Step, StepRegistry};
use pact_store::{Promise, PromiseState, PromiseStore};
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, error, info, info_span, instrument, warn};

use crate::error::Error;

/// Dispatches steps and writes their terminal state.
///
/// Cloning is cheap; clones share the store, the registry and the set of
/// in-flight executions.
#[derive(Clone)]
pub struct Scheduler {
  store: Arc<dyn PromiseStore>,
  steps: StepRegistry,
  tracker: TaskTracker,
}

impl Scheduler {
  pub fn new(store: Arc<dyn PromiseStore>, steps: StepRegistry) -> Self {
    Self {
      store,
      steps,
      tracker: TaskTracker::new(),
    }
  }

  pub fn store(&self) -> &Arc<dyn PromiseStore> {
    &self.store
  }

  pub fn steps(&self) -> &StepRegistry {
    &self.steps
  }

  /// Submit `step_name(args)` under `key` and return the key.
  ///
  /// Returns as soon as the step is dispatched. Submitting a key that already
  /// has a running or finished promise does nothing and returns the key; the
  /// original submission's step and arguments stay authoritative, even when
  /// this scheduler has no step registered under `step_name`.
  #[instrument(name = "submit", skip_all, fields(key = %key, step = %step_name))]
  pub async fn submit(
    &self,
    key: &str,
    step_name: &str,
    args: serde_json::Value,
  ) -> Result<String, Error> {
    if self.tracker.is_closed() {
      return Err(Error::ShutDown);
    }
    if !self.steps.contains(step_name) {
      // Nothing is recorded for a step this scheduler cannot run.
      return match self.store.get(key).await {
        Ok(existing) if existing.state != PromiseState::Pending => {
          debug!(state = %existing.state, "promise already dispatched");
          Ok(existing.key)
        }
        Ok(_) | Err(pact_store::Error::NotFound(_)) => Err(Error::UnknownStep {
          name: step_name.to_string(),
        }),
        Err(e) => Err(e.into()),
      };
    }

    let promise = self.store.create_if_absent(key, step_name, &args).await?;
    if promise.state != PromiseState::Pending {
      debug!(state = %promise.state, "promise already dispatched");
      return Ok(promise.key);
    }

    let key = promise.key.clone();
    self.start(promise).await?;
    Ok(key)
  }

  /// Dispatch promises left `Pending` by a process that stopped before
  /// starting them. Returns the keys that were started here.
  ///
  /// `Running` promises are left alone: another live process may own them.
  pub async fn recover(&self) -> Result<Vec<String>, Error> {
    let pending = self.store.list(Some(PromiseState::Pending)).await?;
    let mut started = Vec::new();

    for promise in pending {
      let key = promise.key.clone();
      match self.start(promise).await {
        Ok(true) => started.push(key),
        Ok(false) => {}
        Err(Error::UnknownStep { name }) => {
          warn!(key = %key, step = %name, "skipping pending promise for unregistered step");
        }
        Err(e) => return Err(e),
      }
    }

    info!(recovered = started.len(), "recovered pending promises");
    Ok(started)
  }

  /// Stop accepting submissions and wait for in-flight steps to finish.
  pub async fn shutdown(&self) {
    self.tracker.close();
    self.tracker.wait().await;
  }

  /// Number of executions started by this scheduler that have not finished.
  pub fn in_flight(&self) -> usize {
    self.tracker.len()
  }

  /// Claim the promise and spawn its step. `Ok(false)` means another
  /// dispatcher claimed it first.
  async fn start(&self, promise: Promise) -> Result<bool, Error> {
    let step = self
      .steps
      .get(&promise.step_name)
      .ok_or_else(|| Error::UnknownStep {
        name: promise.step_name.clone(),
      })?;

    match self.store.mark_running(&promise.key).await {
      Ok(_) => {}
      Err(pact_store::Error::InvalidTransition { from, .. }) => {
        debug!(key = %promise.key, state = %from, "lost dispatch race");
        return Ok(false);
      }
      Err(e) => return Err(e.into()),
    }

    let span = info_span!("step", key = %promise.key, step = %promise.step_name);
    let store = self.store.clone();
    self
      .tracker
      .spawn(execute(store, promise.key, step, promise.args).instrument(span));
    Ok(true)
  }
}

/// Run the step and record its outcome. Never fails outward.
async fn execute(
  store: Arc<dyn PromiseStore>,
  key: String,
  step: Arc<dyn Step>,
  args: serde_json::Value,
) {
  info!("step_started");

  // The step runs on its own task so a panic becomes a rejection.
  let outcome = match tokio::spawn(async move { step.run(args).await }).await {
    Ok(Ok(value)) => Ok(value),
    Ok(Err(e)) => Err(format!("{e:#}")),
    Err(e) if e.is_panic() => Err(format!("step panicked: {}", panic_message(e.into_panic()))),
    Err(e) => Err(format!("step task aborted: {e}")),
  };

  let recorded = match outcome {
    Ok(value) => store.resolve(&key, value).await.map(|_| {
      info!("step_resolved");
    }),
    Err(message) => {
      warn!(error = %message, "step_rejected");
      store.reject(&key, message).await.map(|_| ())
    }
  };

  if let Err(e) = recorded {
    error!(error = %e, "failed to record step outcome");
  }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
  if let Some(s) = payload.downcast_ref::<&str>() {
    (*s).to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "unknown panic".to_string()
  }
}
