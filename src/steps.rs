//! Built-in steps available from the command line.

use std::time::Duration;

use anyhow::Context;
use pact_step::{StepRegistry, step_fn};
use serde_json::json;
use tracing::debug;

/// Registry with the `echo`, `sleep` and `fail` steps.
pub fn builtin() -> StepRegistry {
  StepRegistry::new()
    .with(
      "echo",
      step_fn(|args| async move { Ok::<_, anyhow::Error>(args) }),
    )
    .with(
      "sleep",
      step_fn(|args| async move {
        let ms = args
          .get("ms")
          .and_then(|v| v.as_u64())
          .context("sleep requires an integer 'ms' argument")?;
        debug!(ms, "sleeping");
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok::<_, anyhow::Error>(args.get("value").cloned().unwrap_or(json!({ "slept_ms": ms })))
      }),
    )
    .with(
      "fail",
      step_fn(|args| async move {
        let message = args
          .get("message")
          .and_then(|v| v.as_str())
          .unwrap_or("step failed")
          .to_string();
        Err::<serde_json::Value, _>(anyhow::anyhow!(message))
      }),
    )
}
