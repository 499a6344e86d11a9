//! Submission and polling from separate store handles sharing one database,
//! standing in for separate processes.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use pact_orchestrator::{PollConfig, Queries, Scheduler};
use pact_step::{StepRegistry, step_fn};
use pact_store::{PromiseState, PromiseStore, SqliteStore};
use serde_json::json;

fn fast_polling() -> PollConfig {
  PollConfig {
    initial_interval: Duration::from_millis(10),
    max_interval: Duration::from_millis(50),
    multiplier: 2,
  }
}

#[tokio::test]
async fn test_result_is_visible_to_another_connection() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("promises.db");

  let submitter_store = Arc::new(SqliteStore::connect(&path).await.unwrap());
  let poller_store = Arc::new(SqliteStore::connect(&path).await.unwrap());

  let steps = StepRegistry::new().with(
    "weather",
    step_fn(|_| async move {
      tokio::time::sleep(Duration::from_millis(100)).await;
      Ok::<_, anyhow::Error>(json!({"temp": 20}))
    }),
  );
  let scheduler = Scheduler::new(submitter_store, steps);
  let queries = Queries::with_poll_config(poller_store, fast_polling());

  scheduler.submit("job-1", "weather", json!({})).await.unwrap();
  assert!(!queries.check_ready("job-1").await.unwrap());

  // The poller's store never sees the completion signal, so this relies on polling.
  let result = queries
    .get_result("job-1", Some(Duration::from_secs(5)))
    .await
    .unwrap();
  assert_eq!(result, json!({"temp": 20}));
  assert!(queries.check_ready("job-1").await.unwrap());
}

#[tokio::test]
async fn test_restarted_scheduler_recovers_pending_promise() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("promises.db");

  // A previous process recorded the promise but never dispatched it.
  {
    let store = SqliteStore::connect(&path).await.unwrap();
    store
      .create_if_absent("orphan", "echo", &json!({"v": 7}))
      .await
      .unwrap();
  }

  let store = Arc::new(SqliteStore::connect(&path).await.unwrap());
  let steps = StepRegistry::new().with(
    "echo",
    step_fn(|args| async move { Ok::<_, anyhow::Error>(args) }),
  );
  let scheduler = Scheduler::new(store.clone(), steps);

  assert_eq!(scheduler.recover().await.unwrap(), vec!["orphan".to_string()]);
  scheduler.shutdown().await;

  let promise = store.get("orphan").await.unwrap();
  assert_eq!(promise.state, PromiseState::Resolved);
  assert_eq!(promise.result, Some(json!({"v": 7})));
}

#[tokio::test]
async fn test_resubmission_after_restart_does_not_rerun() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("promises.db");

  let first = Arc::new(SqliteStore::connect(&path).await.unwrap());
  let steps = StepRegistry::new().with(
    "stamp",
    step_fn(|_| async move { Ok::<_, anyhow::Error>(json!(chrono::Utc::now().to_rfc3339())) }),
  );
  let scheduler = Scheduler::new(first.clone(), steps.clone());
  scheduler.submit("once", "stamp", json!(null)).await.unwrap();
  scheduler.shutdown().await;
  let original = first.get("once").await.unwrap().result;

  let second = Arc::new(SqliteStore::connect(&path).await.unwrap());
  let restarted = Scheduler::new(second.clone(), steps);
  restarted.submit("once", "stamp", json!(null)).await.unwrap();
  restarted.shutdown().await;

  assert_eq!(second.get("once").await.unwrap().result, original);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_submissions_across_handles_run_once() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("promises.db");

  let runs = Arc::new(AtomicUsize::new(0));
  let counter = runs.clone();
  let steps = StepRegistry::new().with(
    "counted",
    step_fn(move |_| {
      let counter = counter.clone();
      async move {
        counter.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok::<_, anyhow::Error>(json!("once"))
      }
    }),
  );

  let mut schedulers = Vec::new();
  for _ in 0..6 {
    let store = Arc::new(SqliteStore::connect(&path).await.unwrap());
    schedulers.push(Scheduler::new(store, steps.clone()));
  }

  let submits: Vec<_> = schedulers
    .iter()
    .cloned()
    .map(|scheduler| {
      tokio::spawn(async move { scheduler.submit("shared", "counted", json!(null)).await })
    })
    .collect();
  for handle in futures::future::join_all(submits).await {
    assert_eq!(handle.unwrap().unwrap(), "shared");
  }

  for scheduler in &schedulers {
    scheduler.shutdown().await;
  }

  let reader = SqliteStore::connect(&path).await.unwrap();
  let promise = reader.get("shared").await.unwrap();
  assert_eq!(promise.state, PromiseState::Resolved);
  assert_eq!(promise.result, Some(json!("once")));
  assert_eq!(runs.load(Ordering::SeqCst), 1);
}
