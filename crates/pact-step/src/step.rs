use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;

/// An externally supplied unit of work.
///
/// Errors carry their full context chain; the orchestrator records them as
/// the promise's failure description.
#[async_trait]
pub trait Step: Send + Sync {
  /// Run the step with the submitted arguments.
  async fn run(&self, args: serde_json::Value) -> anyhow::Result<serde_json::Value>;
}

/// A step backed by an async closure. See [`step_fn`].
pub struct FnStep<F> {
  f: F,
}

/// Wrap an async closure as a [`Step`].
///
/// ```ignore
/// let double = step_fn(|args| async move {
///   let n = args["n"].as_i64().context("missing n")?;
///   Ok::<_, anyhow::Error>(json!(n * 2))
/// });
/// ```
pub fn step_fn<F, Fut>(f: F) -> FnStep<F>
where
  F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send + 'static,
{
  FnStep { f }
}

#[async_trait]
impl<F, Fut> Step for FnStep<F>
where
  F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send + 'static,
{
  async fn run(&self, args: serde_json::Value) -> anyhow::Result<serde_json::Value> {
    (self.f)(args).await
  }
}

/// A pipeline of dependent stages run as one step.
///
/// Each stage receives the previous stage's output; the first receives the
/// submitted arguments. The first failing stage fails the whole chain and
/// nothing produced by earlier stages is kept.
#[derive(Clone)]
pub struct Chain {
  stages: Vec<Arc<dyn Step>>,
}

impl Chain {
  pub fn new(first: impl Step + 'static) -> Self {
    Self {
      stages: vec![Arc::new(first)],
    }
  }

  /// Append a stage fed with the output of the previous one.
  pub fn then(mut self, next: impl Step + 'static) -> Self {
    self.stages.push(Arc::new(next));
    self
  }

  pub fn len(&self) -> usize {
    self.stages.len()
  }

  pub fn is_empty(&self) -> bool {
    self.stages.is_empty()
  }
}

#[async_trait]
impl Step for Chain {
  async fn run(&self, args: serde_json::Value) -> anyhow::Result<serde_json::Value> {
    let mut value = args;
    for (index, stage) in self.stages.iter().enumerate() {
      value = stage
        .run(value)
        .await
        .with_context(|| format!("stage {} of {} failed", index + 1, self.stages.len()))?;
    }
    Ok(value)
  }
}
