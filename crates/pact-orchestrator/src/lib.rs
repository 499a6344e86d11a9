//! Pact Orchestrator
//!
//! Promise-keyed durable execution: callers submit a step under an
//! idempotency key, the step runs out of band, and callers later poll or wait
//! for the outcome by the same key.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Scheduler                           │
//! │  - submit(key, step, args) → key, returns immediately       │
//! │  - at most one execution per key                            │
//! │  - recover() re-dispatches never-started promises           │
//! └─────────────────────────────────────────────────────────────┘
//!                 │ writes                        ▲ runs
//!                 ▼                               │
//! ┌──────────────────────────────┐   ┌──────────────────────────┐
//! │         PromiseStore         │   │      StepRegistry        │
//! │  pending → running → done    │   │  name → Step             │
//! └──────────────────────────────┘   └──────────────────────────┘
//!                 ▲ reads
//!                 │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Queries                            │
//! │  - check_ready / state (non-blocking)                       │
//! │  - get_result (blocking, optional timeout)                  │
//! │  - probe_status / await_results (batch)                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use pact_orchestrator::{Queries, Scheduler};
//! use pact_step::{StepRegistry, step_fn};
//! use pact_store::SqliteStore;
//!
//! let store = Arc::new(SqliteStore::connect("promises.db").await?);
//! let steps = StepRegistry::new().with("echo", step_fn(|args| async move { Ok(args) }));
//!
//! let scheduler = Scheduler::new(store.clone(), steps);
//! let key = scheduler.submit("job-1", "echo", json!({"temp": 20})).await?;
//!
//! let queries = Queries::new(store);
//! let result = queries.get_result(&key, Some(Duration::from_secs(30))).await?;
//! ```

mod error;
mod input;
mod query;
mod scheduler;

pub use error::Error;
pub use input::KeyList;
pub use query::{PollConfig, Queries, Status, StatusEntry};
pub use scheduler::Scheduler;
