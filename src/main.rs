mod steps;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use pact_key::{KeyBuilder, TimeBucket};
use pact_orchestrator::{KeyList, Queries, Scheduler};
use pact_store::{PromiseState, PromiseStore, SqliteStore};

/// Pact - durable, promise-keyed step execution
#[derive(Parser)]
#[command(name = "pact")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.pact)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Submit a step and wait for its result
  ///
  /// The step runs inside this process. When the wait times out the timeout is
  /// reported right away, and the process stays alive until the step finishes
  /// so its outcome is still recorded.
  Run {
    /// Name of the step to run
    step: String,

    /// Idempotency key (derived from the step, args and bucket when omitted)
    #[arg(long)]
    key: Option<String>,

    /// Step arguments as JSON
    #[arg(long, default_value = "{}")]
    args: String,

    /// Time bucket used when deriving the key: none, day or month
    #[arg(long, default_value = "day")]
    bucket: TimeBucket,

    /// Give up waiting after this many milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,
  },

  /// Check whether a promise has finished
  Check {
    key: String,
  },

  /// Wait for a promise and print its result
  Result {
    key: String,

    /// Give up waiting after this many milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,
  },

  /// Print the status of several promises without waiting
  Probe {
    /// Keys, or a single JSON array of keys
    #[arg(required = true)]
    keys: Vec<String>,
  },

  /// Wait for several promises and print their results
  Await {
    /// Keys, or a single JSON array of keys
    #[arg(required = true)]
    keys: Vec<String>,

    /// Give up waiting after this many milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Fail on the first rejected promise instead of reporting each one
    #[arg(long)]
    strict: bool,
  },

  /// List stored promises
  List {
    /// Only list promises in this state
    #[arg(long)]
    state: Option<PromiseState>,
  },

  /// Dispatch promises that were recorded but never started
  Recover,
}

fn main() -> Result<()> {
  init_tracing();

  let cli = Cli::parse();

  let data_dir = match cli.data_dir {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".pact"),
  };

  match cli.command {
    Some(command) => {
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(async { execute(command, data_dir).await })
    }
    None => {
      println!("pact - use --help to see available commands");
      Ok(())
    }
  }
}

fn init_tracing() {
  tracing_subscriber::registry()
    .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
    .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
    .init();
}

async fn open_store(data_dir: &Path) -> Result<Arc<SqliteStore>> {
  tokio::fs::create_dir_all(data_dir)
    .await
    .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

  let path = data_dir.join("promises.db");
  let store = SqliteStore::connect(&path)
    .await
    .with_context(|| format!("failed to open promise store: {}", path.display()))?;
  Ok(Arc::new(store))
}

async fn execute(command: Commands, data_dir: PathBuf) -> Result<()> {
  let store = open_store(&data_dir).await?;
  let queries = Queries::new(store.clone());

  match command {
    Commands::Run {
      step,
      key,
      args,
      bucket,
      timeout_ms,
    } => {
      let args: serde_json::Value =
        serde_json::from_str(&args).context("failed to parse --args as JSON")?;
      let key = key.unwrap_or_else(|| {
        KeyBuilder::new(&step)
          .args(&args)
          .bucket(bucket, chrono::Utc::now())
          .build()
      });

      let scheduler = Scheduler::new(store.clone(), steps::builtin());
      let key = scheduler.submit(&key, &step, args).await?;
      eprintln!("{}", serde_json::json!({ "key": key }));

      let result = queries.get_result(&key, timeout(timeout_ms)).await;
      if let Some(notice) = drain_notice(&result, scheduler.in_flight()) {
        eprintln!("{notice}");
      }
      scheduler.shutdown().await;
      print_json(&result?)?;
    }
    Commands::Check { key } => {
      let is_ready = queries.check_ready(&key).await?;
      print_json(&serde_json::json!({ "key": key, "is_ready": is_ready }))?;
    }
    Commands::Result { key, timeout_ms } => {
      let result = queries.get_result(&key, timeout(timeout_ms)).await?;
      print_json(&result)?;
    }
    Commands::Probe { keys } => {
      let output = queries.probe_status_json(&key_input(keys)).await;
      print_json(&output)?;
    }
    Commands::Await {
      keys,
      timeout_ms,
      strict,
    } => {
      if strict {
        let keys = KeyList::parse(&key_input(keys))?;
        let results = queries
          .await_results_strict(keys.keys(), timeout(timeout_ms))
          .await?;
        print_json(&serde_json::to_value(results)?)?;
      } else {
        let output = queries
          .await_results_json(&key_input(keys), timeout(timeout_ms))
          .await;
        print_json(&output)?;
      }
    }
    Commands::List { state } => {
      let promises = store.list(state).await?;
      print_json(&serde_json::to_value(promises)?)?;
    }
    Commands::Recover => {
      let scheduler = Scheduler::new(store.clone(), steps::builtin());
      let started = scheduler.recover().await?;
      eprintln!("Recovered {} promise(s)", started.len());
      scheduler.shutdown().await;
      print_json(&serde_json::to_value(started)?)?;
    }
  }

  Ok(())
}

/// A single argument that looks like a JSON array is passed through as an
/// encoded key list; anything else is a list of plain keys.
fn key_input(mut keys: Vec<String>) -> serde_json::Value {
  if keys.len() == 1 && keys[0].trim_start().starts_with('[') {
    return serde_json::Value::String(keys.remove(0));
  }
  serde_json::Value::Array(keys.into_iter().map(serde_json::Value::String).collect())
}

/// Message shown before waiting for a step that outlived the caller's wait.
fn drain_notice(
  result: &Result<serde_json::Value, pact_orchestrator::Error>,
  in_flight: usize,
) -> Option<String> {
  match result {
    Err(err @ pact_orchestrator::Error::Timeout { key, .. }) if in_flight > 0 => Some(format!(
      "{err}; use `pact result {key}` from another shell, this process exits once the step finishes"
    )),
    _ => None,
  }
}

fn timeout(ms: Option<u64>) -> Option<Duration> {
  ms.map(Duration::from_millis)
}

fn print_json(value: &serde_json::Value) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}
